//! Results output. A snapshot is a single file per label, written
//! cooperatively: every rank encodes its own cells with MessagePack and
//! writes them at its own offset, after rank 0 has written the header.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::cell::Payload;
use crate::config::GridConfig;
use crate::driver::Clock;
use crate::error::{Error, Result};
use crate::grid::Grid;
use crate::message::util::read_u64;
use crate::message::Communicator;
use crate::topology::CellId;




/// Interface for anything that can record the state of a grid. Saving is a
/// collective operation: every rank must call it with the same label, and
/// it returns once the state has been recorded.
///
pub trait ResultsSink<P: Payload> {
    fn save<C: Communicator>(&mut self, label: &str, clock: Clock, grid: &Grid<P>, comm: &C) -> Result<()>;
}

/// A sink that records nothing.
///
#[derive(Clone, Copy, Debug, Default)]
pub struct Discard;

impl<P: Payload> ResultsSink<P> for Discard {
    fn save<C: Communicator>(&mut self, _label: &str, _clock: Clock, _grid: &Grid<P>, _comm: &C) -> Result<()> {
        Ok(())
    }
}




/// The description of a snapshot, stored at the start of its file.
///
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SnapshotHeader {
    pub label: String,
    pub step: u64,
    pub time: f64,
    pub grid: GridConfig,

    /// Size in bytes of each rank's block of cells, in rank order.
    pub blocks: Vec<u64>,
}

/// A snapshot read back from disk.
///
#[derive(Clone, Debug)]
pub struct Snapshot<P> {
    pub header: SnapshotHeader,
    pub cells: BTreeMap<CellId, P>,
}




/**
 * Writes one snapshot file per label into a directory. The file starts with
 * the length of the header as a little-endian u64, followed by the header
 * and then the blocks of cells of ranks 0, 1, ... back to back. Each block
 * is a MessagePack list of (cell id, payload) pairs in id order.
 */
#[derive(Clone, Debug)]
pub struct SnapshotFile {
    directory: PathBuf,
    saved: Vec<PathBuf>,
}




// ============================================================================
impl SnapshotFile {

    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self { directory: directory.into(), saved: Vec::new() }
    }

    /// Return the path of the file for the given label.
    pub fn path(&self, label: &str) -> PathBuf {
        self.directory.join(format!("{}.snap", label))
    }

    /// Return the paths written so far, in order.
    pub fn saved(&self) -> &[PathBuf] {
        &self.saved
    }

    fn encode_block<P: Payload>(grid: &Grid<P>) -> io::Result<Vec<u8>> {
        let mut cells: Vec<(CellId, &P)> = grid.local_payloads().collect();
        cells.sort_by_key(|(id, _)| *id);
        rmp_serde::encode::to_vec(&cells).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))
    }

    fn write_header(path: &Path, header: &[u8]) -> io::Result<()> {
        let mut file = File::create(path)?;
        file.write_all(&(header.len() as u64).to_le_bytes())?;
        file.write_all(header)?;
        file.flush()
    }

    fn write_block(path: &Path, offset: u64, block: &[u8]) -> io::Result<()> {
        let mut file = OpenOptions::new().write(true).open(path)?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(block)?;
        file.flush()
    }
}

impl<P: Payload> ResultsSink<P> for SnapshotFile {
    fn save<C: Communicator>(&mut self, label: &str, clock: Clock, grid: &Grid<P>, comm: &C) -> Result<()> {
        let rank = comm.rank();
        let path = self.path(label);

        let (block, mut status) = match Self::encode_block(grid) {
            Ok(block) => (block, Ok(())),
            Err(e) => (Vec::new(), Err(e)),
        };
        let size = block.len() as u64;
        let blocks: Vec<u64> = comm.all_gather_value(&size)?;

        let header = SnapshotHeader {
            label: label.to_string(),
            step: clock.step,
            time: clock.time,
            grid: grid.config().clone(),
            blocks,
        };
        // Every rank encodes the same header, so every rank knows its
        // length without waiting for rank 0.
        let header_bytes = rmp_serde::encode::to_vec(&header)
            .map_err(|e| Error::transport(format!("cannot encode snapshot header: {}", e)))?;

        if rank == 0 && status.is_ok() {
            status = Self::write_header(&path, &header_bytes)
        }
        let written = status.is_ok();
        let created = comm.broadcast_value(if rank == 0 { Some(&written) } else { None })?;

        if created && status.is_ok() {
            let offset = 8 + header_bytes.len() as u64 + header.blocks[..rank].iter().sum::<u64>();
            status = Self::write_block(&path, offset, &block)
        }
        let failures: Vec<Option<String>> = comm.all_gather_value(&status.as_ref().err().map(|e| e.to_string()))?;

        if let Err(source) = status {
            return Err(Error::Io { rank, path, source });
        }
        if let Some((failed, reason)) = failures.into_iter().enumerate().find_map(|(r, f)| f.map(|f| (r, f))) {
            return Err(Error::Io {
                rank: failed,
                path,
                source: io::Error::new(io::ErrorKind::Other, reason),
            });
        }
        if !created {
            return Err(Error::Io {
                rank: 0,
                path,
                source: io::Error::new(io::ErrorKind::Other, "snapshot header was not written"),
            });
        }
        if rank == 0 {
            info!("saved {} (step {}, t = {:.4})", path.display(), clock.step, clock.time);
        }
        debug!("rank {} wrote {} bytes to {}", rank, size, path.display());

        self.saved.push(path);
        Ok(())
    }
}




/**
 * Read a snapshot file written by `SnapshotFile`. A read failure is reported
 * as an i/o error on the given rank.
 */
pub fn read_snapshot<P: DeserializeOwned>(path: impl AsRef<Path>, rank: usize) -> Result<Snapshot<P>> {
    let path = path.as_ref();
    let io_error = |source: io::Error| Error::Io { rank, path: path.to_path_buf(), source };
    let invalid = |e: rmp_serde::decode::Error| io_error(io::Error::new(io::ErrorKind::InvalidData, e.to_string()));

    let truncated = |what: &str| io_error(io::Error::new(io::ErrorKind::InvalidData, format!("{} runs past the end of the file", what)));

    let mut file = File::open(path).map_err(io_error)?;
    let file_len = file.metadata().map_err(io_error)?.len();
    let header_len = read_u64(&mut file).map_err(io_error)?;
    let mut remaining = file_len.saturating_sub(8);

    if header_len > remaining {
        return Err(truncated("snapshot header"));
    }
    remaining -= header_len;

    let mut header_bytes = vec![0; header_len as usize];
    file.read_exact(&mut header_bytes).map_err(io_error)?;

    let header: SnapshotHeader = rmp_serde::decode::from_slice(&header_bytes).map_err(invalid)?;

    match header.blocks.iter().try_fold(0u64, |total, &size| total.checked_add(size)) {
        Some(total) if total <= remaining => {}
        _ => return Err(truncated("cell data")),
    }
    let mut cells = BTreeMap::new();

    for &size in &header.blocks {
        let mut block = vec![0; size as usize];
        file.read_exact(&mut block).map_err(io_error)?;
        let pairs: Vec<(CellId, P)> = rmp_serde::decode::from_slice(&block).map_err(invalid)?;
        cells.extend(pairs);
    }
    Ok(Snapshot { header, cells })
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::*;
    use crate::message::ChannelCommunicator;

    #[test]
    fn snapshot_of_one_rank_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let comm = ChannelCommunicator::group(1).pop().unwrap();
        let mut grid: Grid<u64> = Grid::initialize(GridConfig::new([3, 2, 1]), 0, 1).unwrap();

        for id in grid.local_cells() {
            *grid.payload_mut(id).unwrap() = 100 + id;
        }
        let mut sink = SnapshotFile::new(dir.path());
        sink.save("000004", Clock { step: 4, time: 0.5 }, &grid, &comm).unwrap();

        let snapshot: Snapshot<u64> = read_snapshot(sink.path("000004"), 0).unwrap();
        assert_eq!(snapshot.header.step, 4);
        assert_eq!(snapshot.header.time, 0.5);
        assert_eq!(snapshot.header.grid.length, [3, 2, 1]);
        assert_eq!(snapshot.cells.len(), 6);
        assert_eq!(snapshot.cells[&6], 106);
        assert_eq!(sink.saved().len(), 1);
    }

    #[test]
    fn unwritable_directory_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let comm = ChannelCommunicator::group(1).pop().unwrap();
        let grid: Grid<u64> = Grid::initialize(GridConfig::new([2, 2, 1]), 0, 1).unwrap();
        let mut sink = SnapshotFile::new(dir.path().join("missing"));

        let result = sink.save("000000", Clock::default(), &grid, &comm);
        assert!(matches!(result, Err(Error::Io { rank: 0, .. })));
    }

    fn invalid_data<T>(result: Result<T>) -> bool {
        matches!(result, Err(Error::Io { rank: 2, source, .. }) if source.kind() == io::ErrorKind::InvalidData)
    }

    #[test]
    fn corrupt_lengths_are_rejected_before_reading() {
        let dir = tempfile::tempdir().unwrap();
        let comm = ChannelCommunicator::group(1).pop().unwrap();
        let grid: Grid<u64> = Grid::initialize(GridConfig::new([3, 2, 1]), 0, 1).unwrap();
        let mut sink = SnapshotFile::new(dir.path());
        sink.save("000000", Clock::default(), &grid, &comm).unwrap();

        let path = sink.path("000000");
        let length = std::fs::metadata(&path).unwrap().len();
        std::fs::OpenOptions::new().write(true).open(&path).unwrap().set_len(length - 1).unwrap();
        assert!(invalid_data(read_snapshot::<u64>(&path, 2)));

        let huge = dir.path().join("huge.snap");
        std::fs::write(&huge, u64::MAX.to_le_bytes()).unwrap();
        assert!(invalid_data(read_snapshot::<u64>(&huge, 2)));
    }
}
