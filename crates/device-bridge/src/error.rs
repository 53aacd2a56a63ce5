use thiserror::Error;

/// Device tooling failures. Every variant names what was attempted and the
/// underlying cause; process failures also carry the raw output.
#[derive(Debug, Error)]
pub enum DeviceBridgeError {
    #[error("Error executing '{command}'. Original error: '{cause}'; Command output: {output}")]
    Exec {
        command: String,
        cause: String,
        output: String,
    },
    #[error(
        "Error executing '{command}'. Original error: timed out after {timeout_ms}ms. \
         Try to increase the execution timeout; Command output: {}",
        crate::shell::pick_output(.stderr, .stdout)
    )]
    Timeout {
        command: String,
        timeout_ms: u64,
        stdout: String,
        stderr: String,
    },
    #[error("Could not start '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Could not install '{app}':\n  - {cause}\n  - {detail}")]
    Install {
        app: String,
        cause: String,
        detail: String,
    },
    #[error("Could not transfer '{remote}': {message}")]
    Transfer { remote: String, message: String },
}

impl DeviceBridgeError {
    /// Best raw output for diagnostics: stderr, else stdout, else the message.
    pub fn detail(&self) -> String {
        match self {
            DeviceBridgeError::Exec { output, .. } => output.clone(),
            DeviceBridgeError::Timeout { stdout, stderr, .. } => {
                crate::shell::pick_output(stderr, stdout)
            }
            other => other.to_string(),
        }
    }
}

pub type DeviceResult<T> = Result<T, DeviceBridgeError>;
