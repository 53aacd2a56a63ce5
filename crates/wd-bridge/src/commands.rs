use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use mcloud_app_cache::AppProvisioner;
use mcloud_core_types::SessionId;
use mcloud_device_bridge::AppInstaller;
use mcloud_scheduler::{CommandHandler, CommandRegistry, ExecError, ExecResult, SessionContext};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::errors::BridgeError;
use crate::protocol::{determine_protocol, is_package_or_bundle, merge_capabilities, parse_caps_array};
use crate::state::SessionStore;

pub const WDA_ENV: &str = "WDA_ENV";
const WDA_STATUS_TIMEOUT: Duration = Duration::from_secs(5);

/// Collaborators the built-in handlers reach out to.
pub struct DriverServices {
    pub provisioner: Option<Arc<AppProvisioner>>,
    pub installers: Vec<Arc<dyn AppInstaller>>,
    pub sessions: Weak<SessionStore>,
}

impl DriverServices {
    async fn provision(
        &self,
        app: &str,
        accepted: &[String],
        fail: impl Fn(String) -> ExecError,
    ) -> ExecResult<PathBuf> {
        let Some(provisioner) = &self.provisioner else {
            return Err(fail(format!(
                "application provisioning is not configured, cannot resolve '{app}'"
            )));
        };
        provisioner
            .configure_app(app, accepted)
            .await
            .map_err(|err| fail(err.to_string()))
    }

    fn installer(&self, platform: Option<&str>) -> Option<&Arc<dyn AppInstaller>> {
        let platform = platform?;
        self.installers
            .iter()
            .find(|installer| installer.platform().eq_ignore_ascii_case(platform))
    }
}

/// Extensions an app capability may resolve to on the given platform.
pub fn accepted_extensions(platform: Option<&str>) -> Vec<String> {
    let extensions: &[&str] = match platform.map(str::to_ascii_lowercase).as_deref() {
        Some("android") => &[".apk", ".apks"],
        Some("ios") | Some("tvos") => &[".app", ".ipa"],
        _ => &[],
    };
    extensions.iter().map(|ext| ext.to_string()).collect()
}

pub fn builtin_registry(services: Arc<DriverServices>) -> CommandRegistry {
    CommandRegistry::new()
        .with("getStatus", Arc::new(GetStatus))
        .with("getStatusWDA", Arc::new(GetStatusWda))
        .with("createSession", Arc::new(CreateSession { services: services.clone() }))
        .with("deleteSession", Arc::new(DeleteSession { services: services.clone() }))
        .with("getSession", Arc::new(GetSession))
        .with("getSessions", Arc::new(GetSessions { services: services.clone() }))
        .with("getTimeouts", Arc::new(GetTimeouts))
        .with("timeouts", Arc::new(SetTimeouts))
        .with("implicitWait", Arc::new(ImplicitWait))
        .with("asyncScriptTimeout", Arc::new(AsyncScriptTimeout))
        .with("getLogEvents", Arc::new(GetLogEvents))
        .with("logCustomEvent", Arc::new(LogCustomEvent))
        .with("installApp", Arc::new(InstallApp { services }))
}

fn invalid_argument(err: BridgeError) -> ExecError {
    ExecError::InvalidArgument(err.to_string())
}

fn arg(args: &[Value], index: usize) -> &Value {
    args.get(index).unwrap_or(&Value::Null)
}

/// Whole non-negative number from a JSON number or a numeric string.
fn non_negative(value: &Value, name: &str) -> ExecResult<u64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed {
        Some(ms) if ms >= 0.0 && ms.is_finite() => Ok(ms as u64),
        _ => Err(ExecError::InvalidArgument(format!(
            "'{name}' must be a non-negative number, got {value}"
        ))),
    }
}

struct GetStatus;

#[async_trait]
impl CommandHandler for GetStatus {
    async fn call(&self, _ctx: &SessionContext, _args: Vec<Value>) -> ExecResult<Value> {
        Ok(json!({
            "build": { "version": env!("CARGO_PKG_VERSION") },
            "ready": true,
        }))
    }
}

struct GetStatusWda;

#[async_trait]
impl CommandHandler for GetStatusWda {
    async fn call(&self, _ctx: &SessionContext, _args: Vec<Value>) -> ExecResult<Value> {
        let Ok(base) = std::env::var(WDA_ENV) else {
            return Ok(json!({
                "status": "error",
                "details": format!("Environment variable {WDA_ENV} is undefined"),
            }));
        };
        match probe_wda(&base).await {
            Ok(details) => Ok(json!({ "status": "success", "details": details })),
            Err(err) => {
                warn!(url = %base, %err, "WDA status probe failed");
                Ok(json!({
                    "status": "error",
                    "details": "Error for sending of WDA status http call. See logs for details",
                }))
            }
        }
    }
}

async fn probe_wda(base: &str) -> reqwest::Result<Value> {
    let client = reqwest::Client::builder().timeout(WDA_STATUS_TIMEOUT).build()?;
    let url = format!("{}/status", base.trim_end_matches('/'));
    client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .json::<Value>()
        .await
}

struct CreateSession {
    services: Arc<DriverServices>,
}

impl CreateSession {
    async fn resolve_app(&self, app: &str, accepted: &[String]) -> ExecResult<PathBuf> {
        self.services
            .provision(app, accepted, ExecError::SessionNotCreated)
            .await
    }
}

#[async_trait]
impl CommandHandler for CreateSession {
    async fn call(&self, ctx: &SessionContext, args: Vec<Value>) -> ExecResult<Value> {
        let executor = ctx.executor();
        if let Some(existing) = executor.session_id() {
            return Err(ExecError::SessionNotCreated(format!(
                "Cannot create a new session while session '{existing}' is in progress"
            )));
        }

        let body = json!({
            "desiredCapabilities": arg(&args, 0),
            "capabilities": arg(&args, 2),
        });
        let protocol = determine_protocol(&body);
        let mut caps = merge_capabilities(&body, protocol).map_err(invalid_argument)?;

        if let Some(timeout) = caps.get("newCommandTimeout") {
            let secs = non_negative(timeout, "newCommandTimeout")?;
            executor.set_new_command_timeout(Duration::from_secs(secs));
        }

        let platform = caps
            .get("platformName")
            .and_then(Value::as_str)
            .map(str::to_string);
        let accepted = accepted_extensions(platform.as_deref());
        let mut provisioned = Vec::new();

        if let Some(app) = caps.get("app").and_then(Value::as_str).map(str::to_string) {
            if !is_package_or_bundle(&app) {
                let path = self.resolve_app(&app, &accepted).await?;
                caps.insert("app".into(), Value::String(path.display().to_string()));
                provisioned.push(path);
            }
        }

        if let Some(other) = caps.get("otherApps").cloned() {
            let mut resolved = Vec::new();
            for item in parse_caps_array(&other).map_err(invalid_argument)? {
                let Some(app) = item.as_str() else {
                    return Err(ExecError::InvalidArgument(format!(
                        "'otherApps' entries must be strings, got {item}"
                    )));
                };
                let path = self.resolve_app(app, &accepted).await?;
                resolved.push(Value::String(path.display().to_string()));
                provisioned.push(path);
            }
            caps.insert("otherApps".into(), Value::Array(resolved));
        }

        if let Some(udid) = caps.get("udid").and_then(Value::as_str) {
            match self.services.installer(platform.as_deref()) {
                Some(installer) => {
                    for path in &provisioned {
                        installer
                            .install(udid, path)
                            .await
                            .map_err(|err| ExecError::SessionNotCreated(err.to_string()))?;
                    }
                }
                None if !provisioned.is_empty() => {
                    debug!(udid, platform = ?platform, "no installer for platform, skipping install")
                }
                None => {}
            }
        }

        let session_id = SessionId::new();
        let capabilities = Value::Object(caps);
        executor.update_state(|state| {
            state.session_id = Some(session_id.clone());
            state.protocol = Some(protocol);
            state.capabilities = capabilities.clone();
        });
        info!(session = %session_id, protocol = protocol.name(), "session created");

        Ok(json!({
            "sessionId": session_id.as_str(),
            "capabilities": capabilities,
        }))
    }
}

struct DeleteSession {
    services: Arc<DriverServices>,
}

#[async_trait]
impl CommandHandler for DeleteSession {
    async fn call(&self, ctx: &SessionContext, _args: Vec<Value>) -> ExecResult<Value> {
        if let (Some(store), Some(id)) = (self.services.sessions.upgrade(), ctx.session_id()) {
            if store.remove(id.as_str()).is_some() {
                info!(session = %id, "session removed");
            }
        }
        Ok(Value::Null)
    }
}

struct GetSession;

#[async_trait]
impl CommandHandler for GetSession {
    async fn call(&self, ctx: &SessionContext, _args: Vec<Value>) -> ExecResult<Value> {
        Ok(ctx.executor().capabilities())
    }
}

struct GetSessions {
    services: Arc<DriverServices>,
}

#[async_trait]
impl CommandHandler for GetSessions {
    async fn call(&self, _ctx: &SessionContext, _args: Vec<Value>) -> ExecResult<Value> {
        let summaries = self
            .services
            .sessions
            .upgrade()
            .map(|store| store.summaries())
            .unwrap_or_default();
        Ok(Value::Array(summaries))
    }
}

struct GetTimeouts;

#[async_trait]
impl CommandHandler for GetTimeouts {
    async fn call(&self, ctx: &SessionContext, _args: Vec<Value>) -> ExecResult<Value> {
        let executor = ctx.executor();
        let state = executor.state();
        if ctx.protocol().map(|p| p.is_w3c()).unwrap_or(true) {
            Ok(json!({
                "script": state.script_ms,
                "pageLoad": state.page_load_ms,
                "implicit": state.implicit_wait_ms,
            }))
        } else {
            Ok(json!({
                "command": executor.new_command_timeout().as_millis() as u64,
                "implicit": state.implicit_wait_ms,
            }))
        }
    }
}

/// Arguments: `[type, ms, script, pageLoad, implicit]`.
struct SetTimeouts;

#[async_trait]
impl CommandHandler for SetTimeouts {
    async fn call(&self, ctx: &SessionContext, args: Vec<Value>) -> ExecResult<Value> {
        let executor = ctx.executor();
        let legacy_type = arg(&args, 0).as_str();
        if let (Some(kind), false) = (legacy_type, arg(&args, 1).is_null()) {
            let ms = non_negative(arg(&args, 1), "ms")?;
            match kind {
                "command" => executor.set_new_command_timeout(Duration::from_millis(ms)),
                "implicit" => executor.update_state(|s| s.implicit_wait_ms = ms),
                "page load" | "pageLoad" => executor.update_state(|s| s.page_load_ms = Some(ms)),
                "script" => executor.update_state(|s| s.script_ms = Some(ms)),
                other => {
                    return Err(ExecError::InvalidArgument(format!(
                        "Unknown timeout type '{other}'"
                    )))
                }
            }
            return Ok(Value::Null);
        }

        let script = optional_millis(arg(&args, 2), "script")?;
        let page_load = optional_millis(arg(&args, 3), "pageLoad")?;
        let implicit = optional_millis(arg(&args, 4), "implicit")?;
        executor.update_state(|state| {
            if script.is_some() {
                state.script_ms = script;
            }
            if page_load.is_some() {
                state.page_load_ms = page_load;
            }
            if let Some(ms) = implicit {
                state.implicit_wait_ms = ms;
            }
        });
        Ok(Value::Null)
    }
}

fn optional_millis(value: &Value, name: &str) -> ExecResult<Option<u64>> {
    if value.is_null() {
        Ok(None)
    } else {
        non_negative(value, name).map(Some)
    }
}

struct ImplicitWait;

#[async_trait]
impl CommandHandler for ImplicitWait {
    async fn call(&self, ctx: &SessionContext, args: Vec<Value>) -> ExecResult<Value> {
        let ms = non_negative(arg(&args, 0), "ms")?;
        ctx.executor().update_state(|state| state.implicit_wait_ms = ms);
        Ok(Value::Null)
    }
}

struct AsyncScriptTimeout;

#[async_trait]
impl CommandHandler for AsyncScriptTimeout {
    async fn call(&self, ctx: &SessionContext, args: Vec<Value>) -> ExecResult<Value> {
        let ms = non_negative(arg(&args, 0), "ms")?;
        ctx.executor().update_state(|state| state.script_ms = Some(ms));
        Ok(Value::Null)
    }
}

struct GetLogEvents;

#[async_trait]
impl CommandHandler for GetLogEvents {
    async fn call(&self, ctx: &SessionContext, args: Vec<Value>) -> ExecResult<Value> {
        let history = ctx.executor().event_history();
        let history = match arg(&args, 0) {
            Value::Null => history,
            types => {
                let types: Vec<String> = parse_caps_array(types)
                    .map_err(invalid_argument)?
                    .into_iter()
                    .filter_map(|t| t.as_str().map(str::to_string))
                    .collect();
                history.filtered(&types)
            }
        };
        serde_json::to_value(history).map_err(|err| ExecError::failed(ctx.command(), err))
    }
}

struct LogCustomEvent;

#[async_trait]
impl CommandHandler for LogCustomEvent {
    async fn call(&self, ctx: &SessionContext, args: Vec<Value>) -> ExecResult<Value> {
        let (Some(vendor), Some(event)) = (arg(&args, 0).as_str(), arg(&args, 1).as_str()) else {
            return Err(ExecError::InvalidArgument(
                "'vendor' and 'event' must be strings".into(),
            ));
        };
        ctx.executor().log_event(&format!("{vendor}:{event}"))?;
        Ok(Value::Null)
    }
}

/// Arguments: `[appPath, options]`.
struct InstallApp {
    services: Arc<DriverServices>,
}

#[async_trait]
impl CommandHandler for InstallApp {
    async fn call(&self, ctx: &SessionContext, args: Vec<Value>) -> ExecResult<Value> {
        let Some(app) = arg(&args, 0).as_str() else {
            return Err(ExecError::InvalidArgument("'appPath' must be a string".into()));
        };
        let caps = ctx.executor().capabilities();
        let caps = caps.as_object().cloned().unwrap_or_else(Map::new);
        let platform = caps.get("platformName").and_then(Value::as_str);
        let accepted = accepted_extensions(platform);

        let path = self
            .services
            .provision(app, &accepted, |message| ExecError::failed(ctx.command(), message))
            .await?;

        let Some(udid) = caps.get("udid").and_then(Value::as_str) else {
            return Err(ExecError::failed(
                ctx.command(),
                "the session has no 'udid' capability to install onto",
            ));
        };
        let Some(installer) = self.services.installer(platform) else {
            return Err(ExecError::failed(
                ctx.command(),
                format!("no installer is registered for platform {platform:?}"),
            ));
        };
        installer
            .install(udid, &path)
            .await
            .map_err(|err| ExecError::failed(ctx.command(), err))?;
        info!(udid, app = %path.display(), "application installed");
        Ok(Value::Null)
    }
}
