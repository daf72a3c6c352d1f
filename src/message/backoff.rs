use std::{iter::Take, time::Duration};

/// An infinite stream of back off durations, where the duration grows by a
/// constant factor up to some maximum delay. Upon reaching the maximum
/// delay, that value is returned from then on.
///
/// Combined with [Retry] it manages attempting an operation, sleeping, and
/// attempting it again. The delay uses [std::thread::sleep], so do not use
/// this from asynchronous code.
pub struct ExponentialBackoff {
    curr: Duration,
    max: Duration,
    factor: u32,
}

impl ExponentialBackoff {
    pub fn new(start: Duration, max: Duration, factor: u32) -> ExponentialBackoff {
        ExponentialBackoff {
            curr: start,
            max,
            factor,
        }
    }
}

impl Iterator for ExponentialBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        let delay = self.curr;
        self.curr = (self.curr * self.factor).min(self.max);
        Some(delay)
    }
}

/// Retry a fallible function over an iterator of delays.
pub trait Retry {
    /// Call `f` until it returns [Ok]. After every failed attempt but the
    /// last, `sleep` is called with the error and the delay, so the caller
    /// can log before waiting. If the iterator runs out, the last error is
    /// returned; if it was empty to begin with, `None` is returned.
    fn retry<F, S, T, E>(&mut self, mut f: F, sleep: S) -> Option<Result<T, E>>
    where
        F: FnMut() -> Result<T, E>,
        S: Fn(&E, Duration),
        Self: Iterator<Item = Duration> + Sized,
    {
        let mut last_err = None;
        let mut iter = self.peekable();

        while let Some(delay) = iter.next() {
            match f() {
                Ok(v) => return Some(Ok(v)),
                Err(e) => {
                    if iter.peek().is_some() {
                        sleep(&e, delay);
                    }
                    last_err = Some(Err(e));
                }
            }
        }
        last_err
    }
}

impl Retry for ExponentialBackoff {}

impl Retry for Take<ExponentialBackoff> {}




// ============================================================================
#[cfg(test)]
mod test {

    use super::*;
    use std::cell::Cell;

    #[test]
    fn delays_grow_and_saturate() {
        let delays: Vec<_> = ExponentialBackoff::new(Duration::from_millis(1), Duration::from_millis(5), 2)
            .take(5)
            .map(|d| d.as_millis())
            .collect();
        assert_eq!(delays, vec![1, 2, 4, 5, 5]);
    }

    #[test]
    fn retry_stops_at_first_success() {
        let calls = Cell::new(0);
        let result = ExponentialBackoff::new(Duration::ZERO, Duration::ZERO, 2)
            .take(5)
            .retry(|| {
                calls.set(calls.get() + 1);
                if calls.get() < 3 { Err("nope") } else { Ok(calls.get()) }
            }, |_, d| std::thread::sleep(d));
        assert_eq!(result, Some(Ok(3)));
    }

    #[test]
    fn retry_returns_the_last_error() {
        let sleeps = Cell::new(0);
        let result: Option<Result<(), &str>> = ExponentialBackoff::new(Duration::ZERO, Duration::ZERO, 2)
            .take(3)
            .retry(|| Err("nope"), |_, _| sleeps.set(sleeps.get() + 1));
        assert_eq!(result, Some(Err("nope")));
        assert_eq!(sleeps.get(), 2);
    }
}
