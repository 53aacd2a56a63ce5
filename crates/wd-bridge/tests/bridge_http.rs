use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use mcloud_app_cache::{AppProvisioner, ApplicationCache, CacheConfig, HttpFetcher, ProvisionerConfig};
use mcloud_device_bridge::{AppInstaller, DeviceResult};
use mcloud_scheduler::{CommandHandler, ExecResult, SessionContext};
use mcloud_wd_bridge::{WebDriverBridge, WebDriverBridgePolicyHandle};
use serde_json::{json, Value};
use serial_test::serial;
use tempfile::TempDir;
use tower::ServiceExt;

#[derive(Default)]
struct RecordingInstaller {
    installs: Mutex<Vec<(String, PathBuf)>>,
}

#[async_trait]
impl AppInstaller for RecordingInstaller {
    fn platform(&self) -> &'static str {
        "android"
    }

    async fn install(&self, udid: &str, app: &Path) -> DeviceResult<()> {
        self.installs
            .lock()
            .unwrap()
            .push((udid.to_string(), app.to_path_buf()));
        Ok(())
    }
}

struct FindsButton;

#[async_trait]
impl CommandHandler for FindsButton {
    async fn call(&self, _ctx: &SessionContext, args: Vec<Value>) -> ExecResult<Value> {
        Ok(json!({ "ELEMENT": "btn-1", "using": args[0] }))
    }
}

struct Harness {
    router: Router,
    installer: Arc<RecordingInstaller>,
    apk: PathBuf,
    _dir: TempDir,
}

fn harness() -> Harness {
    let dir = TempDir::new().unwrap();
    let apk = dir.path().join("demo.apk");
    std::fs::write(&apk, b"apk bytes").unwrap();

    let provisioner = Arc::new(AppProvisioner::new(
        Arc::new(ApplicationCache::new(CacheConfig::default())),
        Arc::new(HttpFetcher::new(
            std::time::Duration::from_secs(5),
            std::time::Duration::from_secs(30),
        )),
        ProvisionerConfig {
            work_dir: dir.path().to_path_buf(),
            ..ProvisionerConfig::default()
        },
    ));
    let installer = Arc::new(RecordingInstaller::default());
    let router = WebDriverBridge::new(WebDriverBridgePolicyHandle::default())
        .with_provisioner(provisioner)
        .with_installer(installer.clone())
        .with_handler("findElement", Arc::new(FindsButton))
        .build();
    Harness {
        router,
        installer,
        apk,
        _dir: dir,
    }
}

async fn call(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let body = body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty);
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(body)
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

async fn create_w3c_session(h: &Harness) -> String {
    let (status, body) = call(
        &h.router,
        "POST",
        "/wd/hub/session",
        Some(json!({
            "capabilities": {
                "alwaysMatch": {
                    "platformName": "Android",
                    "appium:app": h.apk.display().to_string(),
                    "appium:udid": "emulator-5554"
                }
            }
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    body["value"]["sessionId"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn status_reports_ready() {
    let h = harness();
    let (status, body) = call(&h.router, "GET", "/wd/hub/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["value"]["ready"], true);
    assert!(body["value"]["build"]["version"].is_string());
}

#[tokio::test]
#[serial]
async fn wda_status_without_env_is_an_error_report() {
    std::env::remove_var("WDA_ENV");
    let h = harness();
    let (status, body) = call(&h.router, "GET", "/wd/hub/status-wda", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["value"]["status"], "error");
    assert_eq!(
        body["value"]["details"],
        "Environment variable WDA_ENV is undefined"
    );
}

#[tokio::test]
async fn unknown_routes_are_404() {
    let h = harness();
    let (status, body) = call(&h.router, "GET", "/wd/hub/nowhere", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["value"]["error"], "unknown command");

    let (status, _) = call(&h.router, "PUT", "/wd/hub/status", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = call(&h.router, "GET", "/status", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn reserved_routes_are_not_implemented() {
    let h = harness();
    let (status, body) = call(&h.router, "POST", "/wd/hub/session/abc/frame/parent", None).await;
    assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
    assert_eq!(body["value"]["error"], "unknown method");
}

#[tokio::test]
async fn create_session_needs_capabilities() {
    let h = harness();
    let (status, body) = call(&h.router, "POST", "/wd/hub/session", Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["value"]["error"], "invalid argument");

    let request = Request::builder()
        .method("POST")
        .uri("/wd/hub/session")
        .body(Body::from("{not json"))
        .unwrap();
    let response = h.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn missing_app_fails_session_creation() {
    let h = harness();
    let (status, body) = call(
        &h.router,
        "POST",
        "/wd/hub/session",
        Some(json!({ "desiredCapabilities": { "platformName": "Android", "app": "/no/such/app.apk" } })),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["value"]["error"], "session not created");
    assert!(body["value"]["message"].as_str().unwrap().contains("/no/such/app.apk"));
}

#[tokio::test]
async fn w3c_session_lifecycle() {
    let h = harness();
    let session = create_w3c_session(&h).await;

    let installs = h.installer.installs.lock().unwrap().clone();
    assert_eq!(installs, vec![("emulator-5554".to_string(), h.apk.clone())]);

    let (status, body) = call(&h.router, "GET", &format!("/wd/hub/session/{session}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["value"]["platformName"], "Android");
    assert_eq!(body["value"]["udid"], "emulator-5554");

    let (status, body) = call(&h.router, "GET", "/wd/hub/sessions", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["value"][0]["id"], session.as_str());

    let uri = format!("/wd/hub/session/{session}/timeouts");
    let (status, _) = call(&h.router, "POST", &uri, Some(json!({ "implicit": 1500 }))).await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = call(&h.router, "GET", &uri, None).await;
    assert_eq!(body["value"]["implicit"], 1500);

    let (status, body) = call(&h.router, "POST", &uri, Some(json!({ "type": "implicit" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");

    let (status, body) = call(
        &h.router,
        "POST",
        &format!("/wd/hub/session/{session}/element"),
        Some(json!({ "using": "id", "value": "login" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["value"]["element-6066-11e4-a52e-4f735466cecf"], "btn-1");
    assert_eq!(body["value"]["using"], "id");

    let (status, body) = call(&h.router, "GET", &format!("/wd/hub/session/{session}/title"), None).await;
    assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
    assert_eq!(body["value"]["error"], "unknown method");

    let (status, _) = call(&h.router, "DELETE", &format!("/wd/hub/session/{session}"), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(&h.router, "GET", &format!("/wd/hub/session/{session}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["value"]["error"], "invalid session id");
}

#[tokio::test]
async fn legacy_sessions_answer_in_legacy_shape() {
    let h = harness();
    let (status, body) = call(
        &h.router,
        "POST",
        "/wd/hub/session",
        Some(json!({ "desiredCapabilities": { "platformName": "Android", "app": "io.appium.android.apis" } })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["status"], 0);
    let session = body["sessionId"].as_str().unwrap().to_string();
    assert_eq!(body["value"]["app"], "io.appium.android.apis");
    assert!(h.installer.installs.lock().unwrap().is_empty());

    let uri = format!("/wd/hub/session/{session}/timeouts");
    let (status, _) = call(&h.router, "POST", &uri, Some(json!({ "type": "command", "ms": 5000 }))).await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = call(&h.router, "GET", &uri, None).await;
    assert_eq!(body["status"], 0);
    assert_eq!(body["sessionId"], session.as_str());
    assert_eq!(body["value"]["command"], 5000);
}

#[tokio::test]
async fn custom_events_show_up_in_the_log() {
    let h = harness();
    let session = create_w3c_session(&h).await;

    let (status, _) = call(
        &h.router,
        "POST",
        &format!("/wd/hub/session/{session}/appium/log_event"),
        Some(json!({ "vendor": "acme", "event": "tapped" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(
        &h.router,
        "POST",
        &format!("/wd/hub/session/{session}/appium/events"),
        Some(json!({ "type": ["acme:tapped"] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["value"]["acme:tapped"].as_array().unwrap().len(), 1);
    assert!(body["value"]["commands"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn unknown_sessions_are_rejected() {
    let h = harness();
    let (status, body) = call(&h.router, "GET", "/wd/hub/session/nope/url", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["value"]["error"], "invalid session id");
    assert!(body["value"]["message"].as_str().unwrap().contains("'nope'"));
}
