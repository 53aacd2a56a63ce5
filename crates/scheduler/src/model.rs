use std::time::Duration;

use mcloud_core_types::{ProtocolVariant, SessionId};
use serde_json::Value;

pub const CREATE_SESSION: &str = "createSession";
pub const DELETE_SESSION: &str = "deleteSession";
pub const EXECUTE_DRIVER_SCRIPT: &str = "executeDriverScript";

pub const EVENT_SESSION_INIT: &str = "newSessionRequested";
pub const EVENT_SESSION_START: &str = "newSessionStarted";
pub const EVENT_SESSION_QUIT_START: &str = "quitSessionRequested";
pub const EVENT_SESSION_QUIT_DONE: &str = "quitSessionFinished";

pub const DEFAULT_NEW_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Clone, Debug)]
pub struct ExecutorConfig {
    /// Serialize command bodies per driver instance.
    pub commands_queue: bool,
    /// Zero disables the timer.
    pub new_command_timeout: Duration,
    /// Commands that bypass the queue even when it is enabled.
    pub queue_exempt: Vec<String>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            commands_queue: true,
            new_command_timeout: DEFAULT_NEW_COMMAND_TIMEOUT,
            queue_exempt: vec![EXECUTE_DRIVER_SCRIPT.to_string()],
        }
    }
}

/// Mutable per-session data owned by the executor.
#[derive(Clone, Debug, Default)]
pub struct SessionState {
    pub session_id: Option<SessionId>,
    pub protocol: Option<ProtocolVariant>,
    pub capabilities: Value,
    pub implicit_wait_ms: u64,
    pub page_load_ms: Option<u64>,
    pub script_ms: Option<u64>,
}
