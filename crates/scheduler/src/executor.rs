use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use mcloud_core_types::{epoch_millis, DriverId, KeyedLocks, ProtocolVariant, SessionId};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::api::{CommandRegistry, SessionContext};
use crate::error::{ExecError, ExecResult, UNEXPECTED_SHUTDOWN_MESSAGE};
use crate::history::EventHistory;
use crate::model::{
    ExecutorConfig, SessionState, CREATE_SESSION, DELETE_SESSION, EVENT_SESSION_INIT,
    EVENT_SESSION_QUIT_DONE, EVENT_SESSION_QUIT_START, EVENT_SESSION_START,
};
use crate::security::SecurityPolicy;

const NO_SESSION_MESSAGE: &str = "A session is either terminated or not started";

/// Runs the commands of one driver instance.
///
/// With queueing enabled, command bodies run one at a time in arrival order
/// under a named mutex keyed by the driver id. Every body races the
/// unexpected-shutdown signal; once that fires, or once the session was
/// deleted, the executor only answers with [`ExecError::SessionTerminal`].
/// A new session needs a new executor.
pub struct SessionExecutor {
    driver_id: DriverId,
    config: ExecutorConfig,
    registry: Arc<CommandRegistry>,
    locks: KeyedLocks,
    security: SecurityPolicy,
    state: RwLock<SessionState>,
    command_timeout: Mutex<Duration>,
    history: Mutex<EventHistory>,
    shutdown: CancellationToken,
    shutdown_reason: Mutex<Option<String>>,
    shutting_down: AtomicBool,
    closed: AtomicBool,
    timer: Mutex<Option<JoinHandle<()>>>,
    me: Weak<SessionExecutor>,
}

impl SessionExecutor {
    pub fn new(registry: Arc<CommandRegistry>, config: ExecutorConfig) -> Arc<Self> {
        Self::with_policy(registry, config, KeyedLocks::new(), SecurityPolicy::default())
    }

    pub fn with_policy(
        registry: Arc<CommandRegistry>,
        config: ExecutorConfig,
        locks: KeyedLocks,
        security: SecurityPolicy,
    ) -> Arc<Self> {
        let timeout = config.new_command_timeout;
        Arc::new_cyclic(|me| Self {
            driver_id: DriverId::new(),
            config,
            registry,
            locks,
            security,
            state: RwLock::new(SessionState::default()),
            command_timeout: Mutex::new(timeout),
            history: Mutex::new(EventHistory::default()),
            shutdown: CancellationToken::new(),
            shutdown_reason: Mutex::new(None),
            shutting_down: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            timer: Mutex::new(None),
            me: me.clone(),
        })
    }

    /// Runs `command` and records it in the ledger whatever the outcome.
    pub async fn execute(&self, command: &str, args: Vec<Value>) -> ExecResult<Value> {
        let start_time = epoch_millis();
        match command {
            CREATE_SESSION => self.record_event(EVENT_SESSION_INIT),
            DELETE_SESSION => self.record_event(EVENT_SESSION_QUIT_START),
            _ => {}
        }
        self.clear_new_command_timeout();

        let result = self.run(command, args).await;

        if self.config.commands_queue && command != DELETE_SESSION && !self.is_terminal() {
            self.start_new_command_timeout();
        }
        self.history
            .lock()
            .record_command(command, start_time, epoch_millis());

        match (&result, command) {
            (Ok(_), CREATE_SESSION) => self.record_event(EVENT_SESSION_START),
            (Ok(_), DELETE_SESSION) => {
                self.record_event(EVENT_SESSION_QUIT_DONE);
                self.closed.store(true, Ordering::SeqCst);
            }
            (Err(err), _) => debug!(driver = %self.driver_id, command, %err, "command failed"),
            _ => {}
        }
        result
    }

    async fn run(&self, command: &str, args: Vec<Value>) -> ExecResult<Value> {
        if self.is_terminal() {
            return Err(self.terminal_error());
        }
        let handler = self
            .registry
            .get(command)
            .ok_or_else(|| ExecError::NotImplemented(command.to_string()))?;
        let ctx = self.context(command)?;
        let span = info_span!("session.command", driver = %self.driver_id, command);

        async move {
            let _slot = if self.queues(command) {
                Some(self.locks.acquire(self.driver_id.as_str()).await)
            } else {
                None
            };
            // Dropping the losing branch abandons the handler future and
            // releases the queue slot with it.
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => Err(self.terminal_error()),
                result = handler.call(&ctx, args) => result,
            }
        }
        .instrument(span)
        .await
    }

    /// Broadcasts the shutdown signal, fails every in-flight and future
    /// command and tears the session down through the `deleteSession`
    /// handler. A call made while a teardown is already running is ignored.
    pub async fn start_unexpected_shutdown(&self, reason: impl Into<String>) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            debug!(driver = %self.driver_id, "shutdown already in progress");
            return;
        }
        let reason = reason.into();
        warn!(driver = %self.driver_id, %reason, "driver shutting down unexpectedly");
        *self.shutdown_reason.lock() = Some(reason);
        self.shutdown.cancel();
        self.clear_new_command_timeout();

        if let (Some(handler), Ok(ctx)) = (self.registry.get(DELETE_SESSION), self.context(DELETE_SESSION)) {
            if let Err(err) = handler.call(&ctx, Vec::new()).await {
                warn!(driver = %self.driver_id, %err, "session teardown after shutdown failed");
            }
        }
        self.closed.store(true, Ordering::SeqCst);
        self.shutting_down.store(false, Ordering::SeqCst);
        info!(driver = %self.driver_id, "driver teardown finished");
    }

    fn start_new_command_timeout(&self) {
        let timeout = *self.command_timeout.lock();
        if timeout.is_zero() {
            return;
        }
        let weak = self.me.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let Some(executor) = weak.upgrade() else {
                return;
            };
            // Detach instead of aborting: this task is the one running.
            executor.timer.lock().take();
            let reason = format!(
                "New Command Timeout of {} seconds expired. Try customizing the timeout \
                 using the 'newCommandTimeout' desired capability",
                timeout.as_secs_f64()
            );
            executor.start_unexpected_shutdown(reason).await;
        });
        if let Some(previous) = self.timer.lock().replace(handle) {
            previous.abort();
        }
    }

    pub fn clear_new_command_timeout(&self) {
        if let Some(handle) = self.timer.lock().take() {
            handle.abort();
        }
    }

    pub fn new_command_timeout(&self) -> Duration {
        *self.command_timeout.lock()
    }

    pub fn set_new_command_timeout(&self, timeout: Duration) {
        *self.command_timeout.lock() = timeout;
    }

    pub fn has_pending_timeout(&self) -> bool {
        self.timer.lock().is_some()
    }

    /// Appends a custom named event. `commands` names the ledger and is reserved.
    pub fn log_event(&self, name: &str) -> ExecResult<()> {
        if name.trim().is_empty() || name == "commands" {
            return Err(ExecError::InvalidArgument(format!(
                "Cannot log event '{name}': the name is reserved or empty"
            )));
        }
        self.record_event(name);
        Ok(())
    }

    fn record_event(&self, name: &str) {
        let at = epoch_millis();
        self.history.lock().record_event(name, at);
        debug!(driver = %self.driver_id, event = name, at, "event logged");
    }

    /// Snapshot of the event history.
    pub fn event_history(&self) -> EventHistory {
        self.history.lock().clone()
    }

    pub fn driver_id(&self) -> &DriverId {
        &self.driver_id
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<CommandRegistry> {
        &self.registry
    }

    pub fn state(&self) -> SessionState {
        self.state.read().clone()
    }

    pub fn update_state<R>(&self, update: impl FnOnce(&mut SessionState) -> R) -> R {
        update(&mut self.state.write())
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.state.read().session_id.clone()
    }

    pub fn protocol(&self) -> Option<ProtocolVariant> {
        self.state.read().protocol
    }

    pub fn capabilities(&self) -> Value {
        self.state.read().capabilities.clone()
    }

    pub fn session_exists(&self, session_id: &str) -> bool {
        !session_id.is_empty()
            && self
                .state
                .read()
                .session_id
                .as_ref()
                .map(|current| current.as_str() == session_id)
                .unwrap_or(false)
    }

    pub fn is_feature_enabled(&self, name: &str) -> bool {
        self.security.is_feature_enabled(name)
    }

    pub fn ensure_feature_enabled(&self, name: &str) -> ExecResult<()> {
        self.security.ensure_feature_enabled(name)
    }

    /// True once shutdown fired or the session was deleted.
    pub fn is_terminal(&self) -> bool {
        self.shutdown.is_cancelled() || self.closed.load(Ordering::SeqCst)
    }

    /// True only while a shutdown teardown is running.
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    fn queues(&self, command: &str) -> bool {
        self.config.commands_queue && !self.config.queue_exempt.iter().any(|c| c == command)
    }

    fn terminal_error(&self) -> ExecError {
        let reason = self.shutdown_reason.lock().clone();
        match reason {
            Some(reason) if reason.is_empty() => {
                ExecError::SessionTerminal(UNEXPECTED_SHUTDOWN_MESSAGE.to_string())
            }
            Some(reason) => ExecError::SessionTerminal(reason),
            None => ExecError::SessionTerminal(NO_SESSION_MESSAGE.to_string()),
        }
    }

    fn context(&self, command: &str) -> ExecResult<SessionContext> {
        self.me
            .upgrade()
            .map(|executor| SessionContext::new(executor, command))
            .ok_or_else(|| ExecError::SessionTerminal(NO_SESSION_MESSAGE.to_string()))
    }
}

impl Drop for SessionExecutor {
    fn drop(&mut self) {
        if let Some(handle) = self.timer.get_mut().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::CommandHandler;
    use crate::model::EXECUTE_DRIVER_SCRIPT;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;
    use tokio::sync::Barrier;

    struct Sleepy {
        spans: Arc<Mutex<Vec<(Instant, Instant)>>>,
    }

    #[async_trait]
    impl CommandHandler for Sleepy {
        async fn call(&self, _ctx: &SessionContext, _args: Vec<Value>) -> ExecResult<Value> {
            let start = Instant::now();
            tokio::time::sleep(Duration::from_millis(30)).await;
            self.spans.lock().push((start, Instant::now()));
            Ok(Value::Null)
        }
    }

    struct Hang;

    #[async_trait]
    impl CommandHandler for Hang {
        async fn call(&self, _ctx: &SessionContext, _args: Vec<Value>) -> ExecResult<Value> {
            std::future::pending::<()>().await;
            Ok(Value::Null)
        }
    }

    struct Fail;

    #[async_trait]
    impl CommandHandler for Fail {
        async fn call(&self, ctx: &SessionContext, _args: Vec<Value>) -> ExecResult<Value> {
            Err(ExecError::failed(ctx.command(), "boom"))
        }
    }

    struct Rendezvous(Arc<Barrier>);

    #[async_trait]
    impl CommandHandler for Rendezvous {
        async fn call(&self, _ctx: &SessionContext, _args: Vec<Value>) -> ExecResult<Value> {
            self.0.wait().await;
            Ok(json!(true))
        }
    }

    #[derive(Default)]
    struct CountingDelete(AtomicUsize);

    #[async_trait]
    impl CommandHandler for CountingDelete {
        async fn call(&self, _ctx: &SessionContext, _args: Vec<Value>) -> ExecResult<Value> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Null)
        }
    }

    struct CreateOk;

    #[async_trait]
    impl CommandHandler for CreateOk {
        async fn call(&self, ctx: &SessionContext, _args: Vec<Value>) -> ExecResult<Value> {
            ctx.executor().update_state(|state| {
                state.session_id = Some(SessionId::from("abc"));
                state.protocol = Some(ProtocolVariant::W3c);
            });
            Ok(json!({"sessionId": "abc"}))
        }
    }

    fn registry(deletes: Arc<CountingDelete>) -> Arc<CommandRegistry> {
        let spans = Arc::new(Mutex::new(Vec::new()));
        Arc::new(
            CommandRegistry::new()
                .with("sleepy", Arc::new(Sleepy { spans }))
                .with("hang", Arc::new(Hang))
                .with("fail", Arc::new(Fail))
                .with(CREATE_SESSION, Arc::new(CreateOk))
                .with(DELETE_SESSION, deletes),
        )
    }

    fn quiet_config() -> ExecutorConfig {
        ExecutorConfig {
            new_command_timeout: Duration::ZERO,
            ..ExecutorConfig::default()
        }
    }

    #[tokio::test]
    async fn queued_commands_never_overlap() {
        let spans = Arc::new(Mutex::new(Vec::new()));
        let registry = Arc::new(
            CommandRegistry::new().with("sleepy", Arc::new(Sleepy { spans: spans.clone() })),
        );
        let executor = SessionExecutor::new(registry, quiet_config());

        let (a, b) = tokio::join!(
            executor.execute("sleepy", Vec::new()),
            executor.execute("sleepy", Vec::new())
        );
        a.unwrap();
        b.unwrap();

        let mut spans = spans.lock().clone();
        spans.sort_by_key(|(start, _)| *start);
        assert_eq!(spans.len(), 2);
        assert!(spans[1].0 >= spans[0].1, "second body started before first ended");
    }

    #[tokio::test]
    async fn exempt_command_runs_concurrently() {
        let barrier = Arc::new(Barrier::new(2));
        let registry = Arc::new(
            CommandRegistry::new().with(EXECUTE_DRIVER_SCRIPT, Arc::new(Rendezvous(barrier))),
        );
        let executor = SessionExecutor::new(registry, quiet_config());
        let both = async {
            tokio::join!(
                executor.execute(EXECUTE_DRIVER_SCRIPT, Vec::new()),
                executor.execute(EXECUTE_DRIVER_SCRIPT, Vec::new())
            )
        };
        let (a, b) = tokio::time::timeout(Duration::from_secs(2), both)
            .await
            .expect("exempt commands must not queue behind each other");
        assert!(a.is_ok() && b.is_ok());
    }

    #[tokio::test]
    async fn unknown_command_is_not_implemented_and_recorded() {
        let executor = SessionExecutor::new(registry(Arc::default()), quiet_config());
        let err = executor.execute("getPageSource", Vec::new()).await.unwrap_err();
        assert_eq!(err, ExecError::NotImplemented("getPageSource".into()));
        let history = executor.event_history();
        assert_eq!(history.commands.len(), 1);
        assert_eq!(history.commands[0].cmd, "getPageSource");
    }

    #[tokio::test]
    async fn failures_still_reach_the_ledger() {
        let executor = SessionExecutor::new(registry(Arc::default()), quiet_config());
        let err = executor.execute("fail", Vec::new()).await.unwrap_err();
        assert!(matches!(err, ExecError::Failed { .. }));
        let ledger = executor.event_history().commands;
        assert_eq!(ledger.len(), 1);
        assert!(ledger[0].end_time >= ledger[0].start_time);
    }

    #[tokio::test]
    async fn shutdown_cancels_in_flight_command() {
        let deletes = Arc::new(CountingDelete::default());
        let locks = KeyedLocks::new();
        let executor = SessionExecutor::with_policy(
            registry(deletes.clone()),
            quiet_config(),
            locks.clone(),
            SecurityPolicy::default(),
        );

        let running = {
            let executor = executor.clone();
            tokio::spawn(async move { executor.execute("hang", Vec::new()).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(locks.is_locked(executor.driver_id().as_str()));

        executor.start_unexpected_shutdown("device went away").await;
        let err = running.await.unwrap().unwrap_err();
        assert_eq!(err, ExecError::SessionTerminal("device went away".into()));
        assert_eq!(deletes.0.load(Ordering::SeqCst), 1);
        assert!(!locks.is_locked(executor.driver_id().as_str()));
        assert!(!executor.is_shutting_down());

        let again = executor.execute("sleepy", Vec::new()).await.unwrap_err();
        assert!(again.is_terminal());
    }

    #[tokio::test]
    async fn idle_session_is_torn_down() {
        let deletes = Arc::new(CountingDelete::default());
        let executor = SessionExecutor::new(
            registry(deletes.clone()),
            ExecutorConfig {
                new_command_timeout: Duration::from_millis(40),
                ..ExecutorConfig::default()
            },
        );
        executor.execute(CREATE_SESSION, Vec::new()).await.unwrap();
        assert!(executor.has_pending_timeout());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(executor.is_terminal());
        assert_eq!(deletes.0.load(Ordering::SeqCst), 1);
        let err = executor.execute("sleepy", Vec::new()).await.unwrap_err();
        assert!(err.to_string().contains("New Command Timeout"));
    }

    #[tokio::test]
    async fn activity_postpones_the_timeout() {
        let deletes = Arc::new(CountingDelete::default());
        let executor = SessionExecutor::new(
            registry(deletes.clone()),
            ExecutorConfig {
                new_command_timeout: Duration::from_millis(120),
                ..ExecutorConfig::default()
            },
        );
        for _ in 0..4 {
            executor.execute("sleepy", Vec::new()).await.unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(!executor.is_terminal());
        assert_eq!(deletes.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn delete_session_closes_without_timer() {
        let executor = SessionExecutor::new(
            registry(Arc::default()),
            ExecutorConfig {
                new_command_timeout: Duration::from_secs(30),
                ..ExecutorConfig::default()
            },
        );
        executor.execute(CREATE_SESSION, Vec::new()).await.unwrap();
        assert!(executor.session_exists("abc"));
        assert!(!executor.session_exists("other"));
        assert_eq!(executor.protocol(), Some(ProtocolVariant::W3c));

        executor.execute(DELETE_SESSION, Vec::new()).await.unwrap();
        assert!(!executor.has_pending_timeout());
        assert!(executor.is_terminal());

        let history = executor.event_history();
        for event in [
            EVENT_SESSION_INIT,
            EVENT_SESSION_START,
            EVENT_SESSION_QUIT_START,
            EVENT_SESSION_QUIT_DONE,
        ] {
            assert_eq!(history.events.get(event).map(Vec::len), Some(1), "{event}");
        }
    }

    #[tokio::test]
    async fn custom_events_reject_reserved_name() {
        let executor = SessionExecutor::new(registry(Arc::default()), quiet_config());
        executor.log_event("vendor:thing").unwrap();
        assert!(executor.log_event("commands").is_err());
        assert_eq!(
            executor.event_history().events.get("vendor:thing").map(Vec::len),
            Some(1)
        );
    }
}
