//! Error types for extractor subprocess execution.

use thiserror::Error;

/// Errors from spawning or supervising the extraction subprocess.
#[derive(Debug, Error, Clone)]
pub enum ExtractorError {
    /// The scratch directory could not be created.
    #[error("failed to create scratch directory: {0}")]
    ScratchDir(String),

    /// The subprocess could not be spawned (binary missing, permissions, ...).
    #[error("failed to start extractor process: {0}")]
    Spawn(String),

    /// The subprocess exited with a non-zero status.
    #[error("extractor exited with status {status}")]
    ExitStatus {
        /// Process exit code, when the OS reported one.
        status: i32,
    },

    /// The subprocess's scratch directory did not contain exactly one file
    /// after exit.
    #[error("expected exactly 1 output file in scratch directory, found {found}")]
    UnexpectedOutputCount {
        /// Number of entries actually found.
        found: usize,
    },

    /// The subprocess was killed because the parent cancellation token fired.
    #[error("extractor cancelled")]
    Cancelled,

    /// An I/O error occurred reading the subprocess's output streams.
    #[error("io error reading extractor output: {0}")]
    Io(String),
}
