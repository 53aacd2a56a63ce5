use std::sync::Arc;

use axum::Router;
use mcloud_app_cache::AppProvisioner;
use mcloud_core_types::KeyedLocks;
use mcloud_device_bridge::AppInstaller;
use mcloud_scheduler::CommandHandler;

use crate::commands::{builtin_registry, DriverServices};
use crate::handlers;
use crate::policy::WebDriverBridgePolicyHandle;
use crate::state::SessionStore;
use crate::trace::BridgeTracer;

#[derive(Clone)]
pub struct WebDriverBridge {
    policy: WebDriverBridgePolicyHandle,
    state: Arc<SessionStore>,
    tracer: BridgeTracer,
    provisioner: Option<Arc<AppProvisioner>>,
    installers: Vec<Arc<dyn AppInstaller>>,
    handlers: Vec<(String, Arc<dyn CommandHandler>)>,
}

impl WebDriverBridge {
    pub fn new(policy: WebDriverBridgePolicyHandle) -> Self {
        Self {
            policy,
            state: Arc::new(SessionStore::default()),
            tracer: BridgeTracer::default(),
            provisioner: None,
            installers: Vec::new(),
            handlers: Vec::new(),
        }
    }

    pub fn with_tracer(mut self, tracer: BridgeTracer) -> Self {
        self.tracer = tracer;
        self
    }

    pub fn with_provisioner(mut self, provisioner: Arc<AppProvisioner>) -> Self {
        self.provisioner = Some(provisioner);
        self
    }

    pub fn with_installer(mut self, installer: Arc<dyn AppInstaller>) -> Self {
        self.installers.push(installer);
        self
    }

    /// Registers (or replaces) the handler of a command name.
    pub fn with_handler(mut self, command: impl Into<String>, handler: Arc<dyn CommandHandler>) -> Self {
        self.handlers.push((command.into(), handler));
        self
    }

    /// Live sessions; shared with the router returned by [`Self::build`].
    pub fn sessions(&self) -> Arc<SessionStore> {
        self.state.clone()
    }

    pub fn build(self) -> Router {
        let services = Arc::new(DriverServices {
            provisioner: self.provisioner,
            installers: self.installers,
            sessions: Arc::downgrade(&self.state),
        });
        let mut registry = builtin_registry(services);
        for (command, handler) in self.handlers {
            registry.register(command, handler);
        }

        Router::new()
            .fallback(handlers::dispatch)
            .with_state(handlers::BridgeCtx {
                policy: self.policy,
                state: self.state,
                tracer: self.tracer,
                registry: Arc::new(registry),
                locks: KeyedLocks::new(),
            })
    }
}
