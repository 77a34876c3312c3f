//! Error taxonomy for external process supervision.

use thiserror::Error;

/// Failures of a single external process invocation.
///
/// `Launch` and `Timeout` are fatal to the invocation and surface as a
/// failed phase; pipeline code converts them into structured results
/// instead of propagating them to the request handler.
#[derive(Debug, Error)]
pub enum ExecError {
    /// The executable could not be started at all.
    #[error("failed to launch '{program}': {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The process did not exit within its wall-clock budget. The whole
    /// process tree has been killed before this is returned.
    #[error("process '{program}' timed out after {timeout_ms} ms")]
    Timeout { program: String, timeout_ms: u64 },

    /// I/O failure while supervising an already-started process.
    #[error("i/o error while supervising '{program}': {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl ExecError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ExecError::Timeout { .. })
    }
}
