//! WebDriver route table and command resolution.
//!
//! The table is pure data: a URL pattern per route and, per HTTP method, the
//! driver command it maps to plus the payload contract. Patterns use `:name`
//! for one path segment and `*name` for the remainder of the path. A method
//! entry without a command is a reserved endpoint.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::errors::{BridgeError, BridgeResult};
use crate::payload::{ArgBuilder, PayloadContract, Reshape, Validator};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Delete,
}

impl HttpMethod {
    /// Case-insensitive.
    pub fn parse(method: &str) -> Option<Self> {
        match method.to_ascii_uppercase().as_str() {
            "GET" => Some(HttpMethod::Get),
            "POST" => Some(HttpMethod::Post),
            "DELETE" => Some(HttpMethod::Delete),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommandSpec {
    pub command: Option<&'static str>,
    pub payload: Option<PayloadContract>,
}

#[derive(Debug)]
pub struct Route {
    pub pattern: &'static str,
    pub methods: &'static [(HttpMethod, CommandSpec)],
}

impl Route {
    pub fn spec(&self, method: HttpMethod) -> Option<&CommandSpec> {
        self.methods
            .iter()
            .find(|(candidate, _)| *candidate == method)
            .map(|(_, spec)| spec)
    }

    pub fn command(&self, method: HttpMethod) -> Option<&'static str> {
        self.spec(method).and_then(|spec| spec.command)
    }
}

const fn cmd(name: &'static str) -> CommandSpec {
    CommandSpec {
        command: Some(name),
        payload: None,
    }
}

const fn cmd_with(name: &'static str, payload: PayloadContract) -> CommandSpec {
    CommandSpec {
        command: Some(name),
        payload: Some(payload),
    }
}

const RESERVED: CommandSpec = CommandSpec {
    command: None,
    payload: None,
};

const fn route(pattern: &'static str, methods: &'static [(HttpMethod, CommandSpec)]) -> Route {
    Route { pattern, methods }
}

const FIND: PayloadContract = PayloadContract::required(&["using", "value"]);
const SCRIPT: PayloadContract = PayloadContract::required(&["script", "args"]);
const POINT: PayloadContract = PayloadContract::required(&["x", "y"]);
const BUTTON: PayloadContract = PayloadContract::optional(&["button"]);
const LOG_TYPE: PayloadContract = PayloadContract::required(&["type"]);
const KEYCODE: PayloadContract =
    PayloadContract::required(&["keycode"]).and_optional(&["metastate", "flags"]);
const APP_ID: PayloadContract = PayloadContract::one_of(&[&["appId"], &["bundleId"]]);
const APP_ID_WITH_OPTIONS: PayloadContract = APP_ID.and_optional(&["options"]);
const TEXT_OR_VALUE: PayloadContract = PayloadContract::optional(&["value", "text"])
    .validated(Validator::TextOrValue)
    .with_args(ArgBuilder::ValueOrText);
const SET_ALERT_TEXT: PayloadContract = TEXT_OR_VALUE;

use HttpMethod::{Delete, Get, Post};

pub static METHOD_MAP: &[Route] = &[
    route("/status", &[(Get, cmd("getStatus"))]),
    route("/status-wda", &[(Get, cmd("getStatusWDA"))]),
    route(
        "/session",
        &[(
            Post,
            cmd_with(
                "createSession",
                PayloadContract::optional(&["desiredCapabilities", "requiredCapabilities", "capabilities"])
                    .validated(Validator::Capabilities),
            ),
        )],
    ),
    route("/sessions", &[(Get, cmd("getSessions"))]),
    route(
        "/session/:sessionId",
        &[(Get, cmd("getSession")), (Delete, cmd("deleteSession"))],
    ),
    route(
        "/session/:sessionId/timeouts",
        &[
            (Get, cmd("getTimeouts")),
            (
                Post,
                cmd_with(
                    "timeouts",
                    PayloadContract::optional(&["type", "ms", "script", "pageLoad", "implicit"])
                        .validated(Validator::Timeouts),
                ),
            ),
        ],
    ),
    route(
        "/session/:sessionId/timeouts/async_script",
        &[(Post, cmd_with("asyncScriptTimeout", PayloadContract::required(&["ms"])))],
    ),
    route(
        "/session/:sessionId/timeouts/implicit_wait",
        &[(Post, cmd_with("implicitWait", PayloadContract::required(&["ms"])))],
    ),
    route("/session/:sessionId/window_handle", &[(Get, cmd("getWindowHandle"))]),
    route("/session/:sessionId/window/handle", &[(Get, cmd("getWindowHandle"))]),
    route("/session/:sessionId/window_handles", &[(Get, cmd("getWindowHandles"))]),
    route("/session/:sessionId/window/handles", &[(Get, cmd("getWindowHandles"))]),
    route(
        "/session/:sessionId/url",
        &[
            (Get, cmd("getUrl")),
            (Post, cmd_with("setUrl", PayloadContract::required(&["url"]))),
        ],
    ),
    route("/session/:sessionId/forward", &[(Post, cmd("forward"))]),
    route("/session/:sessionId/back", &[(Post, cmd("back"))]),
    route("/session/:sessionId/refresh", &[(Post, cmd("refresh"))]),
    route("/session/:sessionId/execute", &[(Post, cmd_with("execute", SCRIPT))]),
    route(
        "/session/:sessionId/execute_async",
        &[(Post, cmd_with("executeAsync", SCRIPT))],
    ),
    route("/session/:sessionId/screenshot", &[(Get, cmd("getScreenshot"))]),
    route(
        "/session/:sessionId/ime/available_engines",
        &[(Get, cmd("availableIMEEngines"))],
    ),
    route(
        "/session/:sessionId/ime/active_engine",
        &[(Get, cmd("getActiveIMEEngine"))],
    ),
    route("/session/:sessionId/ime/activated", &[(Get, cmd("isIMEActivated"))]),
    route(
        "/session/:sessionId/ime/deactivate",
        &[(Post, cmd("deactivateIMEEngine"))],
    ),
    route(
        "/session/:sessionId/ime/activate",
        &[(Post, cmd_with("activateIMEEngine", PayloadContract::required(&["engine"])))],
    ),
    route(
        "/session/:sessionId/frame",
        &[(Post, cmd_with("setFrame", PayloadContract::required(&["id"])))],
    ),
    route("/session/:sessionId/frame/parent", &[(Post, RESERVED)]),
    route(
        "/session/:sessionId/window",
        &[
            (Get, cmd("getWindowHandle")),
            (
                Post,
                cmd_with(
                    "setWindow",
                    PayloadContract::optional(&["name", "handle"])
                        .with_args(ArgBuilder::WindowHandle)
                        .validated(Validator::NameOrHandle),
                ),
            ),
            (Delete, cmd("closeWindow")),
        ],
    ),
    route(
        "/session/:sessionId/window/:windowhandle/size",
        &[(Get, cmd("getWindowSize")), (Post, RESERVED)],
    ),
    route(
        "/session/:sessionId/window/:windowhandle/position",
        &[(Post, RESERVED), (Get, RESERVED)],
    ),
    route(
        "/session/:sessionId/window/:windowhandle/maximize",
        &[(Post, cmd("maximizeWindow"))],
    ),
    route(
        "/session/:sessionId/cookie",
        &[
            (Get, cmd("getCookies")),
            (Post, cmd_with("setCookie", PayloadContract::required(&["cookie"]))),
            (Delete, cmd("deleteCookies")),
        ],
    ),
    route(
        "/session/:sessionId/cookie/:name",
        &[(Get, cmd("getCookie")), (Delete, cmd("deleteCookie"))],
    ),
    route("/session/:sessionId/source", &[(Get, cmd("getPageSource"))]),
    route("/session/:sessionId/title", &[(Get, cmd("title"))]),
    route("/session/:sessionId/element", &[(Post, cmd_with("findElement", FIND))]),
    route("/session/:sessionId/elements", &[(Post, cmd_with("findElements", FIND))]),
    route(
        "/session/:sessionId/element/active",
        &[(Get, cmd("active")), (Post, cmd("active"))],
    ),
    route("/session/:sessionId/element/:elementId", &[(Get, RESERVED)]),
    route(
        "/session/:sessionId/element/:elementId/element",
        &[(Post, cmd_with("findElementFromElement", FIND))],
    ),
    route(
        "/session/:sessionId/element/:elementId/elements",
        &[(Post, cmd_with("findElementsFromElement", FIND))],
    ),
    route("/session/:sessionId/element/:elementId/click", &[(Post, cmd("click"))]),
    route("/session/:sessionId/element/:elementId/submit", &[(Post, cmd("submit"))]),
    route("/session/:sessionId/element/:elementId/text", &[(Get, cmd("getText"))]),
    route(
        "/session/:sessionId/element/:elementId/value",
        &[(Post, cmd_with("setValue", TEXT_OR_VALUE))],
    ),
    route(
        "/session/:sessionId/keys",
        &[(Post, cmd_with("keys", PayloadContract::required(&["value"])))],
    ),
    route("/session/:sessionId/element/:elementId/name", &[(Get, cmd("getName"))]),
    route("/session/:sessionId/element/:elementId/clear", &[(Post, cmd("clear"))]),
    route(
        "/session/:sessionId/element/:elementId/selected",
        &[(Get, cmd("elementSelected"))],
    ),
    route(
        "/session/:sessionId/element/:elementId/enabled",
        &[(Get, cmd("elementEnabled"))],
    ),
    route(
        "/session/:sessionId/element/:elementId/attribute/:name",
        &[(Get, cmd("getAttribute"))],
    ),
    route(
        "/session/:sessionId/element/:elementId/equals/:otherId",
        &[(Get, cmd("equalsElement"))],
    ),
    route(
        "/session/:sessionId/element/:elementId/displayed",
        &[(Get, cmd("elementDisplayed"))],
    ),
    route(
        "/session/:sessionId/element/:elementId/location",
        &[(Get, cmd("getLocation"))],
    ),
    route(
        "/session/:sessionId/element/:elementId/location_in_view",
        &[(Get, cmd("getLocationInView"))],
    ),
    route("/session/:sessionId/element/:elementId/size", &[(Get, cmd("getSize"))]),
    route(
        "/session/:sessionId/element/:elementId/css/:propertyName",
        &[(Get, cmd("getCssProperty"))],
    ),
    route(
        "/session/:sessionId/orientation",
        &[
            (Get, cmd("getOrientation")),
            (Post, cmd_with("setOrientation", PayloadContract::required(&["orientation"]))),
        ],
    ),
    route(
        "/session/:sessionId/rotation",
        &[
            (Get, cmd("getRotation")),
            (Post, cmd_with("setRotation", PayloadContract::required(&["x", "y", "z"]))),
        ],
    ),
    route(
        "/session/:sessionId/moveto",
        &[(
            Post,
            cmd_with("moveTo", PayloadContract::optional(&["element", "xoffset", "yoffset"])),
        )],
    ),
    route("/session/:sessionId/click", &[(Post, cmd_with("clickCurrent", BUTTON))]),
    route("/session/:sessionId/buttondown", &[(Post, cmd_with("buttonDown", BUTTON))]),
    route("/session/:sessionId/buttonup", &[(Post, cmd_with("buttonUp", BUTTON))]),
    route("/session/:sessionId/doubleclick", &[(Post, cmd("doubleClick"))]),
    route(
        "/session/:sessionId/touch/click",
        &[(Post, cmd_with("click", PayloadContract::required(&["element"])))],
    ),
    route("/session/:sessionId/touch/down", &[(Post, cmd_with("touchDown", POINT))]),
    route("/session/:sessionId/touch/up", &[(Post, cmd_with("touchUp", POINT))]),
    route("/session/:sessionId/touch/move", &[(Post, cmd_with("touchMove", POINT))]),
    route("/session/:sessionId/touch/scroll", &[(Post, RESERVED)]),
    route("/session/:sessionId/touch/doubleclick", &[(Post, RESERVED)]),
    route(
        "/session/:sessionId/actions",
        &[
            (Post, cmd_with("performActions", PayloadContract::required(&["actions"]))),
            (Delete, cmd("releaseActions")),
        ],
    ),
    route(
        "/session/:sessionId/touch/longclick",
        &[(Post, cmd_with("touchLongClick", PayloadContract::required(&["elements"])))],
    ),
    route(
        "/session/:sessionId/touch/flick",
        &[(
            Post,
            cmd_with(
                "flick",
                PayloadContract::optional(&["element", "xspeed", "yspeed", "xoffset", "yoffset", "speed"]),
            ),
        )],
    ),
    route(
        "/session/:sessionId/location",
        &[
            (Get, cmd("getGeoLocation")),
            (Post, cmd_with("setGeoLocation", PayloadContract::required(&["location"]))),
        ],
    ),
    route(
        "/session/:sessionId/local_storage",
        &[(Get, RESERVED), (Post, RESERVED), (Delete, RESERVED)],
    ),
    route(
        "/session/:sessionId/local_storage/key/:key",
        &[(Get, RESERVED), (Delete, RESERVED)],
    ),
    route("/session/:sessionId/local_storage/size", &[(Get, RESERVED)]),
    route(
        "/session/:sessionId/session_storage",
        &[(Get, RESERVED), (Post, RESERVED), (Delete, RESERVED)],
    ),
    route(
        "/session/:sessionId/session_storage/key/:key",
        &[(Get, RESERVED), (Delete, RESERVED)],
    ),
    route("/session/:sessionId/session_storage/size", &[(Get, RESERVED)]),
    route("/session/:sessionId/se/log", &[(Post, cmd_with("getLog", LOG_TYPE))]),
    route("/session/:sessionId/se/log/types", &[(Get, cmd("getLogTypes"))]),
    route("/session/:sessionId/log", &[(Post, cmd_with("getLog", LOG_TYPE))]),
    route("/session/:sessionId/log/types", &[(Get, cmd("getLogTypes"))]),
    route("/session/:sessionId/application_cache/status", &[(Get, RESERVED)]),
    route(
        "/session/:sessionId/context",
        &[
            (Get, cmd("getCurrentContext")),
            (Post, cmd_with("setContext", PayloadContract::required(&["name"]))),
        ],
    ),
    route("/session/:sessionId/contexts", &[(Get, cmd("getContexts"))]),
    route(
        "/session/:sessionId/element/:elementId/pageIndex",
        &[(Get, cmd("getPageIndex"))],
    ),
    route(
        "/session/:sessionId/network_connection",
        &[
            (Get, cmd("getNetworkConnection")),
            (
                Post,
                cmd_with(
                    "setNetworkConnection",
                    PayloadContract::required(&["type"]).reshaped(Reshape::Unwrap("parameters")),
                ),
            ),
        ],
    ),
    route(
        "/session/:sessionId/touch/perform",
        &[(
            Post,
            cmd_with(
                "performTouch",
                PayloadContract::required(&["actions"]).reshaped(Reshape::Wrap("actions")),
            ),
        )],
    ),
    route(
        "/session/:sessionId/touch/multi/perform",
        &[(
            Post,
            cmd_with(
                "performMultiAction",
                PayloadContract::required(&["actions"]).and_optional(&["elementId"]),
            ),
        )],
    ),
    route(
        "/session/:sessionId/receive_async_response",
        &[(
            Post,
            cmd_with("receiveAsyncResponse", PayloadContract::required(&["status", "value"])),
        )],
    ),
    route("/session/:sessionId/appium/device/shake", &[(Post, cmd("mobileShake"))]),
    route(
        "/session/:sessionId/appium/device/system_time",
        &[
            (Get, cmd_with("getDeviceTime", PayloadContract::optional(&["format"]))),
            (Post, cmd_with("getDeviceTime", PayloadContract::optional(&["format"]))),
        ],
    ),
    route(
        "/session/:sessionId/appium/device/lock",
        &[(Post, cmd_with("lock", PayloadContract::optional(&["seconds"])))],
    ),
    route("/session/:sessionId/appium/device/unlock", &[(Post, cmd("unlock"))]),
    route("/session/:sessionId/appium/device/is_locked", &[(Post, cmd("isLocked"))]),
    route(
        "/session/:sessionId/appium/start_recording_screen",
        &[(Post, cmd_with("startRecordingScreen", PayloadContract::optional(&["options"])))],
    ),
    route(
        "/session/:sessionId/appium/stop_recording_screen",
        &[(Post, cmd_with("stopRecordingScreen", PayloadContract::optional(&["options"])))],
    ),
    route(
        "/session/:sessionId/appium/performanceData/types",
        &[(Post, cmd("getPerformanceDataTypes"))],
    ),
    route(
        "/session/:sessionId/appium/getPerformanceData",
        &[(
            Post,
            cmd_with(
                "getPerformanceData",
                PayloadContract::required(&["packageName", "dataType"]).and_optional(&["dataReadTimeout"]),
            ),
        )],
    ),
    route(
        "/session/:sessionId/appium/device/press_keycode",
        &[(Post, cmd_with("pressKeyCode", KEYCODE))],
    ),
    route(
        "/session/:sessionId/appium/device/long_press_keycode",
        &[(Post, cmd_with("longPressKeyCode", KEYCODE))],
    ),
    route(
        "/session/:sessionId/appium/device/finger_print",
        &[(Post, cmd_with("fingerprint", PayloadContract::required(&["fingerprintId"])))],
    ),
    route(
        "/session/:sessionId/appium/device/send_sms",
        &[(Post, cmd_with("sendSMS", PayloadContract::required(&["phoneNumber", "message"])))],
    ),
    route(
        "/session/:sessionId/appium/device/gsm_call",
        &[(Post, cmd_with("gsmCall", PayloadContract::required(&["phoneNumber", "action"])))],
    ),
    route(
        "/session/:sessionId/appium/device/gsm_signal",
        &[(
            Post,
            cmd_with(
                "gsmSignal",
                PayloadContract::optional(&["signalStrength", "signalStrengh"])
                    .validated(Validator::SignalStrength)
                    .with_args(ArgBuilder::SignalStrength),
            ),
        )],
    ),
    route(
        "/session/:sessionId/appium/device/gsm_voice",
        &[(Post, cmd_with("gsmVoice", PayloadContract::required(&["state"])))],
    ),
    route(
        "/session/:sessionId/appium/device/power_capacity",
        &[(Post, cmd_with("powerCapacity", PayloadContract::required(&["percent"])))],
    ),
    route(
        "/session/:sessionId/appium/device/power_ac",
        &[(Post, cmd_with("powerAC", PayloadContract::required(&["state"])))],
    ),
    route(
        "/session/:sessionId/appium/device/network_speed",
        &[(Post, cmd_with("networkSpeed", PayloadContract::required(&["netspeed"])))],
    ),
    route(
        "/session/:sessionId/appium/device/keyevent",
        &[(
            Post,
            cmd_with(
                "keyevent",
                PayloadContract::required(&["keycode"]).and_optional(&["metastate"]),
            ),
        )],
    ),
    route(
        "/session/:sessionId/appium/device/rotate",
        &[(
            Post,
            cmd_with(
                "mobileRotation",
                PayloadContract::required(&["x", "y", "radius", "rotation", "touchCount", "duration"])
                    .and_optional(&["element"]),
            ),
        )],
    ),
    route(
        "/session/:sessionId/appium/device/current_activity",
        &[(Get, cmd("getCurrentActivity"))],
    ),
    route(
        "/session/:sessionId/appium/device/current_package",
        &[(Get, cmd("getCurrentPackage"))],
    ),
    route(
        "/session/:sessionId/appium/device/install_app",
        &[(
            Post,
            cmd_with(
                "installApp",
                PayloadContract::required(&["appPath"]).and_optional(&["options"]),
            ),
        )],
    ),
    route(
        "/session/:sessionId/appium/device/activate_app",
        &[(Post, cmd_with("activateApp", APP_ID_WITH_OPTIONS))],
    ),
    route(
        "/session/:sessionId/appium/device/remove_app",
        &[(Post, cmd_with("removeApp", APP_ID_WITH_OPTIONS))],
    ),
    route(
        "/session/:sessionId/appium/device/terminate_app",
        &[(Post, cmd_with("terminateApp", APP_ID_WITH_OPTIONS))],
    ),
    route(
        "/session/:sessionId/appium/device/app_installed",
        &[(Post, cmd_with("isAppInstalled", APP_ID))],
    ),
    route(
        "/session/:sessionId/appium/device/app_state",
        &[
            (Get, cmd_with("queryAppState", APP_ID)),
            (Post, cmd_with("queryAppState", APP_ID)),
        ],
    ),
    route(
        "/session/:sessionId/appium/device/hide_keyboard",
        &[(
            Post,
            cmd_with(
                "hideKeyboard",
                PayloadContract::optional(&["strategy", "key", "keyCode", "keyName"]),
            ),
        )],
    ),
    route(
        "/session/:sessionId/appium/device/is_keyboard_shown",
        &[(Get, cmd("isKeyboardShown"))],
    ),
    route(
        "/session/:sessionId/appium/device/push_file",
        &[(Post, cmd_with("pushFile", PayloadContract::required(&["path", "data"])))],
    ),
    route(
        "/session/:sessionId/appium/device/pull_file",
        &[(Post, cmd_with("pullFile", PayloadContract::required(&["path"])))],
    ),
    route(
        "/session/:sessionId/appium/device/pull_folder",
        &[(Post, cmd_with("pullFolder", PayloadContract::required(&["path"])))],
    ),
    route(
        "/session/:sessionId/appium/device/toggle_airplane_mode",
        &[(Post, cmd("toggleFlightMode"))],
    ),
    route("/session/:sessionId/appium/device/toggle_data", &[(Post, cmd("toggleData"))]),
    route("/session/:sessionId/appium/device/toggle_wifi", &[(Post, cmd("toggleWiFi"))]),
    route(
        "/session/:sessionId/appium/device/toggle_location_services",
        &[(Post, cmd("toggleLocationServices"))],
    ),
    route(
        "/session/:sessionId/appium/device/open_notifications",
        &[(Post, cmd("openNotifications"))],
    ),
    route(
        "/session/:sessionId/appium/device/start_activity",
        &[(
            Post,
            cmd_with(
                "startActivity",
                PayloadContract::required(&["appPackage", "appActivity"]).and_optional(&[
                    "appWaitPackage",
                    "appWaitActivity",
                    "intentAction",
                    "intentCategory",
                    "intentFlags",
                    "optionalIntentArguments",
                    "dontStopAppOnReset",
                ]),
            ),
        )],
    ),
    route(
        "/session/:sessionId/appium/device/system_bars",
        &[(Get, cmd("getSystemBars"))],
    ),
    route(
        "/session/:sessionId/appium/device/display_density",
        &[(Get, cmd("getDisplayDensity"))],
    ),
    route(
        "/session/:sessionId/appium/simulator/touch_id",
        &[(Post, cmd_with("touchId", PayloadContract::required(&["match"])))],
    ),
    route(
        "/session/:sessionId/appium/simulator/toggle_touch_id_enrollment",
        &[(Post, cmd_with("toggleEnrollTouchId", PayloadContract::optional(&["enabled"])))],
    ),
    route("/session/:sessionId/appium/app/launch", &[(Post, cmd("launchApp"))]),
    route("/session/:sessionId/appium/app/close", &[(Post, cmd("closeApp"))]),
    route("/session/:sessionId/appium/app/reset", &[(Post, cmd("reset"))]),
    route(
        "/session/:sessionId/appium/app/background",
        &[(Post, cmd_with("background", PayloadContract::required(&["seconds"])))],
    ),
    route(
        "/session/:sessionId/appium/app/end_test_coverage",
        &[(Post, cmd_with("endCoverage", PayloadContract::required(&["intent", "path"])))],
    ),
    route(
        "/session/:sessionId/appium/app/strings",
        &[(
            Post,
            cmd_with("getStrings", PayloadContract::optional(&["language", "stringFile"])),
        )],
    ),
    route(
        "/session/:sessionId/appium/element/:elementId/value",
        &[(Post, cmd_with("setValueImmediate", TEXT_OR_VALUE))],
    ),
    route(
        "/session/:sessionId/appium/element/:elementId/replace_value",
        &[(
            Post,
            cmd_with(
                "replaceValue",
                TEXT_OR_VALUE.with_args(ArgBuilder::ValueOrTextOrEmpty),
            ),
        )],
    ),
    route(
        "/session/:sessionId/appium/settings",
        &[
            (Post, cmd_with("updateSettings", PayloadContract::required(&["settings"]))),
            (Get, cmd("getSettings")),
        ],
    ),
    route(
        "/session/:sessionId/appium/receive_async_response",
        &[(Post, cmd_with("receiveAsyncResponse", PayloadContract::required(&["response"])))],
    ),
    route(
        "/session/:sessionId/appium/execute_driver",
        &[(
            Post,
            cmd_with(
                "executeDriverScript",
                PayloadContract::required(&["script"]).and_optional(&["type", "timeout"]),
            ),
        )],
    ),
    route(
        "/session/:sessionId/appium/events",
        &[(Post, cmd_with("getLogEvents", PayloadContract::optional(&["type"])))],
    ),
    route(
        "/session/:sessionId/appium/log_event",
        &[(Post, cmd_with("logCustomEvent", PayloadContract::required(&["vendor", "event"])))],
    ),
    route(
        "/session/:sessionId/alert_text",
        &[
            (Get, cmd("getAlertText")),
            (Post, cmd_with("setAlertText", SET_ALERT_TEXT)),
        ],
    ),
    route("/session/:sessionId/accept_alert", &[(Post, cmd("postAcceptAlert"))]),
    route("/session/:sessionId/dismiss_alert", &[(Post, cmd("postDismissAlert"))]),
    route(
        "/session/:sessionId/alert/text",
        &[
            (Get, cmd("getAlertText")),
            (Post, cmd_with("setAlertText", SET_ALERT_TEXT)),
        ],
    ),
    route("/session/:sessionId/alert/accept", &[(Post, cmd("postAcceptAlert"))]),
    route("/session/:sessionId/alert/dismiss", &[(Post, cmd("postDismissAlert"))]),
    route(
        "/session/:sessionId/element/:elementId/rect",
        &[(Get, cmd("getElementRect"))],
    ),
    route("/session/:sessionId/execute/sync", &[(Post, cmd_with("execute", SCRIPT))]),
    route(
        "/session/:sessionId/execute/async",
        &[(Post, cmd_with("executeAsync", SCRIPT))],
    ),
    route(
        "/session/:sessionId/screenshot/:elementId",
        &[(Get, cmd("getElementScreenshot"))],
    ),
    route(
        "/session/:sessionId/element/:elementId/screenshot",
        &[(Get, cmd("getElementScreenshot"))],
    ),
    route(
        "/session/:sessionId/window/rect",
        &[(Get, cmd("getWindowRect")), (Post, cmd("setWindowRect"))],
    ),
    route("/session/:sessionId/window/maximize", &[(Post, cmd("maximizeWindow"))]),
    route("/session/:sessionId/window/minimize", &[(Post, cmd("minimizeWindow"))]),
    route("/session/:sessionId/window/fullscreen", &[(Post, cmd("fullScreenWindow"))]),
    route(
        "/session/:sessionId/element/:elementId/property/:name",
        &[(Get, cmd("getProperty"))],
    ),
    route(
        "/session/:sessionId/appium/device/set_clipboard",
        &[(
            Post,
            cmd_with(
                "setClipboard",
                PayloadContract::required(&["content"]).and_optional(&["contentType", "label"]),
            ),
        )],
    ),
    route(
        "/session/:sessionId/appium/device/get_clipboard",
        &[(Post, cmd_with("getClipboard", PayloadContract::optional(&["contentType"])))],
    ),
    route(
        "/session/:sessionId/appium/compare_images",
        &[(
            Post,
            cmd_with(
                "compareImages",
                PayloadContract::required(&["mode", "firstImage", "secondImage"])
                    .and_optional(&["options"]),
            ),
        )],
    ),
    route(
        "/session/:sessionId/:vendor/cdp/execute",
        &[(Post, cmd_with("executeCdp", PayloadContract::required(&["cmd", "params"])))],
    ),
    route(
        "/session/:sessionId/webauthn/authenticator",
        &[(
            Post,
            cmd_with(
                "addVirtualAuthenticator",
                PayloadContract::required(&["protocol", "transport"]).and_optional(&[
                    "hasResidentKey",
                    "hasUserVerification",
                    "isUserConsenting",
                    "isUserVerified",
                ]),
            ),
        )],
    ),
    route(
        "/session/:sessionId/webauthn/authenticator/:authenticatorId",
        &[(Delete, cmd("removeVirtualAuthenticator"))],
    ),
    route(
        "/session/:sessionId/webauthn/authenticator/:authenticatorId/credential",
        &[(
            Post,
            cmd_with(
                "addAuthCredential",
                PayloadContract::required(&["credentialId", "isResidentCredential", "rpId", "privateKey"])
                    .and_optional(&["userHandle", "signCount"]),
            ),
        )],
    ),
    route(
        "/session/:sessionId/webauthn/authenticator/:authenticatorId/credentials",
        &[
            (Get, cmd("getAuthCredential")),
            (Delete, cmd("removeAllAuthCredentials")),
        ],
    ),
    route(
        "/session/:sessionId/webauthn/authenticator/:authenticatorId/credentials/:credentialId",
        &[(Delete, cmd("removeAuthCredential"))],
    ),
    route(
        "/session/:sessionId/webauthn/authenticator/:authenticatorId/uv",
        &[(Post, cmd_with("setUserAuthVerified", PayloadContract::required(&["isUserVerified"])))],
    ),
];

/// Commands that run without an existing session.
pub const NO_SESSION_ID_COMMANDS: [&str; 4] = ["createSession", "getStatus", "getStatusWDA", "getSessions"];

/// Every command name of the table, first occurrence order.
pub static ALL_COMMANDS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    let mut commands: Vec<&'static str> = Vec::new();
    for route in METHOD_MAP {
        for (_, spec) in route.methods {
            if let Some(command) = spec.command {
                if !commands.contains(&command) {
                    commands.push(command);
                }
            }
        }
    }
    commands
});

static PARAM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"([:*])(\w+)").expect("route param regex"));

/// A route pattern compiled to an anchored regex.
pub struct CompiledRoute {
    pub route: &'static Route,
    regex: Regex,
    param_names: Vec<&'static str>,
}

impl CompiledRoute {
    pub fn compile(route: &'static Route) -> Result<Self, regex::Error> {
        let (regex, param_names) = compile_pattern(route.pattern)?;
        Ok(Self {
            route,
            regex,
            param_names,
        })
    }

    /// Named path parameters in pattern order, or `None` when `path` does not match.
    pub fn parse(&self, path: &str) -> Option<Vec<(&'static str, String)>> {
        let captures = self.regex.captures(path)?;
        Some(
            self.param_names
                .iter()
                .enumerate()
                .map(|(idx, name)| {
                    let value = captures.get(idx + 1).map(|m| m.as_str()).unwrap_or_default();
                    (*name, value.to_string())
                })
                .collect(),
        )
    }
}

/// Literal text is regex-escaped; `:name` becomes `([^/]*)` and `*name` becomes `(.*)`.
pub fn compile_pattern(pattern: &'static str) -> Result<(Regex, Vec<&'static str>), regex::Error> {
    let mut source = String::from("^");
    let mut names = Vec::new();
    let mut last = 0;
    for captures in PARAM_RE.captures_iter(pattern) {
        let (Some(whole), Some(mode), Some(name)) = (captures.get(0), captures.get(1), captures.get(2)) else {
            continue;
        };
        source.push_str(&regex::escape(&pattern[last..whole.start()]));
        source.push_str(if mode.as_str() == ":" { "([^/]*)" } else { "(.*)" });
        names.push(&pattern[name.start()..name.end()]);
        last = whole.end();
    }
    source.push_str(&regex::escape(&pattern[last..]));
    source.push('$');
    Ok((Regex::new(&source)?, names))
}

static COMPILED_ROUTES: Lazy<Vec<CompiledRoute>> = Lazy::new(|| {
    METHOD_MAP
        .iter()
        .map(|route| CompiledRoute::compile(route).expect("route pattern regex"))
        .collect()
});

pub fn routes() -> &'static [Route] {
    METHOD_MAP
}

#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub route: &'static Route,
    pub params: Vec<(&'static str, String)>,
}

impl RouteMatch {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(candidate, _)| *candidate == name)
            .map(|(_, value)| value.as_str())
    }
}

fn strip_query(endpoint: &str) -> &str {
    endpoint.split_once('?').map(|(path, _)| path).unwrap_or(endpoint)
}

/// Matches a path relative to the base path against the table, first route wins.
pub fn match_route(path: &str) -> Option<RouteMatch> {
    let path = strip_query(path);
    COMPILED_ROUTES.iter().find_map(|compiled| {
        compiled.parse(path).map(|params| RouteMatch {
            route: compiled.route,
            params,
        })
    })
}

/// Resolves a request to its command name.
///
/// The endpoint may carry a query string and may or may not include the base
/// path and a session id segment. Returns `None` for unknown routes, unknown
/// methods and reserved endpoints.
pub fn route_to_command_name(endpoint: &str, method: &str, base_path: &str) -> Option<&'static str> {
    let endpoint = strip_query(endpoint);
    let actual = if endpoint == "/" {
        String::new()
    } else if endpoint.starts_with('/') {
        endpoint.to_string()
    } else {
        format!("/{endpoint}")
    };
    // Each candidate is compared against `{base_path}{pattern}`.
    let with_session = format!("/session/ignored-session-id{actual}");
    let candidates = [
        Some(with_session.as_str()),
        Some(actual.as_str()),
        actual.strip_prefix(base_path),
    ];

    let compiled = COMPILED_ROUTES.iter().find(|compiled| {
        candidates
            .iter()
            .flatten()
            .any(|candidate| compiled.regex.is_match(candidate))
    })?;
    compiled.route.command(HttpMethod::parse(method)?)
}

/// One `(method, path regex)` pair of a proxy avoidance list.
#[derive(Debug, Clone)]
pub struct ProxyAvoidRule {
    pub method: HttpMethod,
    pub path: Regex,
}

impl ProxyAvoidRule {
    pub fn new(method: &str, path: &str) -> BridgeResult<Self> {
        let method = match method {
            "GET" => HttpMethod::Get,
            "POST" => HttpMethod::Post,
            "DELETE" => HttpMethod::Delete,
            other => {
                return Err(BridgeError::InvalidConfiguration(format!(
                    "Unrecognized proxy avoidance method '{other}'"
                )))
            }
        };
        let path = Regex::new(path).map_err(|err| {
            BridgeError::InvalidConfiguration(format!("Invalid proxy avoidance path '{path}': {err}"))
        })?;
        Ok(Self { method, path })
    }
}

/// True when a rule with the same method matches `url` once the base path is removed.
pub fn proxy_route_is_avoided(
    rules: &[ProxyAvoidRule],
    base_path: &str,
    method: &str,
    url: &str,
) -> bool {
    let Some(method) = HttpMethod::parse(method) else {
        return false;
    };
    let normalized = url.strip_prefix(base_path).unwrap_or(url);
    rules
        .iter()
        .any(|rule| rule.method == method && rule.path.is_match(normalized))
}
