use thiserror::Error;

pub const UNEXPECTED_SHUTDOWN_MESSAGE: &str = "The driver was unexpectedly shut down!";

/// Failure kinds of [`SessionExecutor::execute`](crate::SessionExecutor::execute).
/// The HTTP layer maps each variant to its own status.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecError {
    #[error("Method '{0}' has not yet been implemented")]
    NotImplemented(String),
    #[error("{0}")]
    SessionTerminal(String),
    #[error("{0}")]
    InvalidArgument(String),
    #[error("A new session could not be created. Details: {0}")]
    SessionNotCreated(String),
    #[error("Command '{command}' failed: {message}")]
    Failed { command: String, message: String },
}

impl ExecError {
    pub fn failed(command: impl Into<String>, message: impl ToString) -> Self {
        ExecError::Failed {
            command: command.into(),
            message: message.to_string(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecError::SessionTerminal(_))
    }
}

impl From<ExecError> for mcloud_core_types::CoreError {
    fn from(value: ExecError) -> Self {
        mcloud_core_types::CoreError::new(value.to_string())
    }
}

pub type ExecResult<T> = Result<T, ExecError>;
