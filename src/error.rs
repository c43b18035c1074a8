//! Error types surfaced by scheduler lifecycle calls.
//!
//! Job-level misuse (counter underflow, panicking jobs) is not reported
//! through these: it is fatal to the worker or the process.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("failed to spawn worker thread {worker}: {source}")]
    Spawn {
        worker: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("{count} worker thread(s) panicked")]
    WorkerPanicked { count: usize },
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
