//! Bounded retry with fixed backoff.

use std::thread;
use std::time::Duration;

/// What a single attempt decided.
#[derive(Debug)]
pub enum Attempt<T, E> {
    /// The operation succeeded.
    Done(T),
    /// Transient failure, try again after the backoff.
    Retry(E),
    /// Permanent failure, stop retrying.
    Abort(E),
}

/// Final result of [`retry_with_backoff`].
#[derive(Debug, PartialEq, Eq)]
pub enum RetryOutcome<T, E> {
    Ready(T),
    GaveUp { attempts: u32, last: E },
    Aborted(E),
}

/// Run `op` up to `attempts` times, sleeping `backoff` between attempts.
///
/// `op` receives the 1-based attempt number. No sleep happens after the
/// last attempt. Zero attempts is treated as one.
pub fn retry_with_backoff<T, E, F>(attempts: u32, backoff: Duration, mut op: F) -> RetryOutcome<T, E>
where
    F: FnMut(u32) -> Attempt<T, E>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt) {
            Attempt::Done(value) => return RetryOutcome::Ready(value),
            Attempt::Abort(err) => return RetryOutcome::Aborted(err),
            Attempt::Retry(err) if attempt >= attempts => {
                return RetryOutcome::GaveUp { attempts, last: err };
            }
            Attempt::Retry(_) => {
                if !backoff.is_zero() {
                    thread::sleep(backoff);
                }
                attempt += 1;
            }
        }
    }
}
