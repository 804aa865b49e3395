//! Racing work against a timer.
//!
//! The loser is cancelled by being dropped. The outcome is a plain value, not
//! an error, so callers branch on it without `?`.

use std::future::Future;
use std::time::Duration;

/// Which side of a race finished first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Raced<T> {
    Completed(T),
    TimedOut,
}

impl<T> Raced<T> {
    pub fn is_timed_out(&self) -> bool {
        matches!(self, Raced::TimedOut)
    }
}

/// Run `work`, bounded by `limit` if one is given.
pub async fn race<F: Future>(work: F, limit: Option<Duration>) -> Raced<F::Output> {
    let Some(limit) = limit else {
        return Raced::Completed(work.await);
    };

    tokio::select! {
        output = work => Raced::Completed(output),
        _ = tokio::time::sleep(limit) => Raced::TimedOut,
    }
}

/// Whole seconds from config; zero means no limit.
pub fn from_secs(secs: Option<u64>) -> Option<Duration> {
    secs.filter(|s| *s > 0).map(Duration::from_secs)
}
