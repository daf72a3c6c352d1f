use std::thread;
use std::time::Duration;

use gridflow::ChannelCommunicator;

/// Run a closure on every rank of an in-process group, each on its own
/// thread, and return the results in rank order. A receive that waits for
/// more than a minute fails instead of hanging the test.
pub fn on_ranks<T, F>(size: usize, f: F) -> Vec<T>
where
    T: Send + 'static,
    F: Fn(ChannelCommunicator) -> T + Send + Sync + Clone + 'static,
{
    let handles: Vec<_> = ChannelCommunicator::group_with_timeout(size, Some(Duration::from_secs(60)))
        .into_iter()
        .map(|comm| {
            let f = f.clone();
            thread::spawn(move || f(comm))
        })
        .collect();

    handles.into_iter().map(|h| h.join().unwrap()).collect()
}
