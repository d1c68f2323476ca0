use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Command not found: {0}")]
    CommandNotFound(String),

    #[error("Process timed out after {0:?}")]
    Timeout(Duration),

    #[error("Failed to spawn {command}: {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Mock expectation not met: {0}")]
    MockExpectationNotMet(String),
}

impl ProcessError {
    /// Errors that may go away if the same command is tried again later
    pub fn is_transient(&self) -> bool {
        match self {
            ProcessError::CommandNotFound(_) => false,
            ProcessError::MockExpectationNotMet(_) => false,
            ProcessError::Timeout(_) => true,
            ProcessError::SpawnFailed { source, .. } | ProcessError::Io(source) => {
                source.kind() != std::io::ErrorKind::NotFound
            }
        }
    }
}
