use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{Method, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;
use mcloud_core_types::{KeyedLocks, ProtocolVariant};
use mcloud_scheduler::model::{CREATE_SESSION, DELETE_SESSION};
use mcloud_scheduler::{CommandRegistry, ExecutorConfig, SessionExecutor};
use serde_json::{json, Value};
use tracing::{debug, info, Instrument};

use crate::errors::{BridgeError, BridgeResult};
use crate::payload::build_args;
use crate::policy::{WebDriverBridgePolicy, WebDriverBridgePolicyHandle};
use crate::protocol::{determine_protocol, duplicate_keys, LEGACY_ELEMENT_KEY, W3C_ELEMENT_KEY};
use crate::routes::{self, CommandSpec, HttpMethod, RouteMatch, NO_SESSION_ID_COMMANDS};
use crate::state::SessionStore;
use crate::trace::BridgeTracer;

#[derive(Clone)]
pub struct BridgeCtx {
    pub policy: WebDriverBridgePolicyHandle,
    pub state: Arc<SessionStore>,
    pub tracer: BridgeTracer,
    pub registry: Arc<CommandRegistry>,
    pub locks: KeyedLocks,
}

/// Single entry point for every request under the base path.
pub async fn dispatch(
    State(ctx): State<BridgeCtx>,
    method: Method,
    uri: Uri,
    body: Bytes,
) -> Response {
    match handle(&ctx, method.as_str(), uri.path(), &body).await {
        Ok(response) => response,
        Err(err) => {
            debug!(%method, path = uri.path(), code = err.code(), %err, "request rejected");
            err.into_response()
        }
    }
}

async fn handle(ctx: &BridgeCtx, method: &str, path: &str, body: &[u8]) -> BridgeResult<Response> {
    let policy = ctx.policy.snapshot();
    let base = policy.normalized_base_path();
    let not_found = || BridgeError::RouteNotFound {
        method: method.to_string(),
        path: path.to_string(),
    };

    let relative = path.strip_prefix(base.as_str()).ok_or_else(not_found)?;
    let relative = if relative.is_empty() { "/" } else { relative };
    let matched = routes::match_route(relative).ok_or_else(not_found)?;
    let http_method = HttpMethod::parse(method).ok_or_else(not_found)?;
    let spec = matched.route.spec(http_method).ok_or_else(not_found)?;
    let command = spec
        .command
        .ok_or_else(|| BridgeError::CommandNotImplemented(format!("{method} {path}")))?;
    let body = parse_body(body)?;

    match command {
        CREATE_SESSION => create_session(ctx, &policy, spec, body).await,
        c if NO_SESSION_ID_COMMANDS.contains(&c) => stateless(ctx, c, spec, &matched, body).await,
        c => in_session(ctx, c, spec, &matched, body).await,
    }
}

fn parse_body(body: &[u8]) -> BridgeResult<Value> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(body).map_err(|err| {
        BridgeError::PayloadValidation(format!("Could not parse the request body as JSON: {err}"))
    })
}

async fn create_session(
    ctx: &BridgeCtx,
    policy: &WebDriverBridgePolicy,
    spec: &CommandSpec,
    body: Value,
) -> BridgeResult<Response> {
    let protocol = determine_protocol(&body);
    let args = build_args(spec.payload.as_ref(), body, protocol, &[])?;
    let executor = SessionExecutor::with_policy(
        ctx.registry.clone(),
        policy.executor_config(),
        ctx.locks.clone(),
        policy.security.clone(),
    );

    let value = executor
        .execute(CREATE_SESSION, args)
        .instrument(ctx.tracer.span(CREATE_SESSION, None))
        .await
        .map_err(|err| BridgeError::from_exec(CREATE_SESSION, err))?;
    let session_id = executor.session_id().ok_or_else(|| {
        BridgeError::SessionNotCreated("the driver did not assign a session id".into())
    })?;
    let protocol = executor.protocol().unwrap_or(protocol);
    ctx.state.insert(session_id.as_str(), executor);
    info!(session = %session_id, sessions = ctx.state.len(), "session registered");

    Ok(match protocol {
        ProtocolVariant::W3c => Json(json!({ "value": value })).into_response(),
        ProtocolVariant::Legacy => Json(json!({
            "status": 0,
            "sessionId": session_id.as_str(),
            "value": value.get("capabilities").cloned().unwrap_or(Value::Null),
        }))
        .into_response(),
    })
}

/// Runs a session-less command on a throwaway executor.
async fn stateless(
    ctx: &BridgeCtx,
    command: &'static str,
    spec: &CommandSpec,
    matched: &RouteMatch,
    body: Value,
) -> BridgeResult<Response> {
    let protocol = ProtocolVariant::W3c;
    let args = build_args(spec.payload.as_ref(), body, protocol, &matched.params)?;
    let executor = SessionExecutor::new(
        ctx.registry.clone(),
        ExecutorConfig {
            commands_queue: false,
            new_command_timeout: Duration::ZERO,
            ..ExecutorConfig::default()
        },
    );
    let value = executor
        .execute(command, args)
        .instrument(ctx.tracer.span(command, None))
        .await
        .map_err(|err| BridgeError::from_exec(command, err))?;
    Ok(success(protocol, None, value))
}

async fn in_session(
    ctx: &BridgeCtx,
    command: &'static str,
    spec: &CommandSpec,
    matched: &RouteMatch,
    body: Value,
) -> BridgeResult<Response> {
    let session_id = matched
        .param("sessionId")
        .ok_or_else(|| BridgeError::unknown_session(""))?;
    let executor = ctx
        .state
        .get(session_id)
        .ok_or_else(|| BridgeError::unknown_session(session_id))?;
    if executor.is_terminal() {
        ctx.state.remove(session_id);
        return Err(BridgeError::unknown_session(session_id));
    }

    let protocol = executor.protocol().unwrap_or(ProtocolVariant::W3c);
    let args = build_args(spec.payload.as_ref(), body, protocol, &matched.params)?;
    let result = executor
        .execute(command, args)
        .instrument(ctx.tracer.span(command, Some(session_id)))
        .await;
    if command == DELETE_SESSION && result.is_ok() {
        ctx.state.remove(session_id);
    }
    let value = result.map_err(|err| BridgeError::from_exec(command, err))?;
    Ok(success(protocol, Some(session_id), value))
}

fn success(protocol: ProtocolVariant, session_id: Option<&str>, value: Value) -> Response {
    let value = duplicate_keys(&value, LEGACY_ELEMENT_KEY, W3C_ELEMENT_KEY);
    let body = match protocol {
        ProtocolVariant::W3c => json!({ "value": value }),
        ProtocolVariant::Legacy => json!({
            "status": 0,
            "sessionId": session_id,
            "value": value,
        }),
    };
    Json(body).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_bodies_are_null() {
        assert_eq!(parse_body(b"").unwrap(), Value::Null);
        assert_eq!(parse_body(b"  \n").unwrap(), Value::Null);
        assert_eq!(parse_body(br#"{"a":1}"#).unwrap(), json!({ "a": 1 }));
        assert!(matches!(
            parse_body(b"{nope"),
            Err(BridgeError::PayloadValidation(_))
        ));
    }

    #[test]
    fn legacy_responses_carry_status_and_session() {
        let response = success(ProtocolVariant::Legacy, Some("abc"), json!(true));
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }
}
