use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};

/// Serialize a value to CBOR bytes for the wire.
///
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    ciborium::ser::into_writer(value, &mut bytes)
        .map_err(|e| Error::transport(format!("encode: {}", e)))?;
    Ok(bytes)
}

/// Deserialize a value from CBOR bytes received off the wire.
///
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    ciborium::de::from_reader(bytes).map_err(|e| Error::transport(format!("decode: {}", e)))
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn garbage_is_a_transport_error() {
        let bytes = encode(&(7u64, vec![1.5f64, 2.5])).unwrap();
        let (a, b): (u64, Vec<f64>) = decode(&bytes).unwrap();
        assert_eq!(a, 7);
        assert_eq!(b, vec![1.5, 2.5]);
        assert!(matches!(decode::<(u64, Vec<f64>)>(&bytes[..3]), Err(Error::Transport(_))));
    }
}
