use tracing::{span, Level, Span};

#[derive(Clone, Default)]
pub struct BridgeTracer;

impl BridgeTracer {
    pub fn span(&self, command: &str, session_id: Option<&str>) -> Span {
        span!(
            Level::INFO,
            "wd.command",
            command = command,
            session = session_id.unwrap_or("-")
        )
    }
}
