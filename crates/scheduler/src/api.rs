use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use mcloud_core_types::{ProtocolVariant, SessionId};
use serde_json::Value;

use crate::error::ExecResult;
use crate::executor::SessionExecutor;

/// What a command handler sees of the session it runs in.
#[derive(Clone)]
pub struct SessionContext {
    executor: Arc<SessionExecutor>,
    command: String,
}

impl SessionContext {
    pub(crate) fn new(executor: Arc<SessionExecutor>, command: &str) -> Self {
        Self {
            executor,
            command: command.to_string(),
        }
    }

    pub fn executor(&self) -> &Arc<SessionExecutor> {
        &self.executor
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.executor.session_id()
    }

    pub fn protocol(&self) -> Option<ProtocolVariant> {
        self.executor.protocol()
    }
}

#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn call(&self, ctx: &SessionContext, args: Vec<Value>) -> ExecResult<Value>;
}

#[async_trait]
impl<H> CommandHandler for Arc<H>
where
    H: CommandHandler + ?Sized,
{
    async fn call(&self, ctx: &SessionContext, args: Vec<Value>) -> ExecResult<Value> {
        (**self).call(ctx, args).await
    }
}

/// Command name to handler map, filled once at startup.
#[derive(Clone, Default)]
pub struct CommandRegistry {
    handlers: HashMap<String, Arc<dyn CommandHandler>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, command: impl Into<String>, handler: Arc<dyn CommandHandler>) {
        self.handlers.insert(command.into(), handler);
    }

    pub fn with(mut self, command: impl Into<String>, handler: Arc<dyn CommandHandler>) -> Self {
        self.register(command, handler);
        self
    }

    pub fn get(&self, command: &str) -> Option<Arc<dyn CommandHandler>> {
        self.handlers.get(command).cloned()
    }

    pub fn contains(&self, command: &str) -> bool {
        self.handlers.contains_key(command)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Sorted handler names.
    pub fn commands(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }
}
