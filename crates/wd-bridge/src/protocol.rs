use mcloud_core_types::ProtocolVariant;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use crate::errors::{BridgeError, BridgeResult};

pub const W3C_ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";
pub const LEGACY_ELEMENT_KEY: &str = "ELEMENT";
const APPIUM_VENDOR_PREFIX: &str = "appium:";

static PACKAGE_OR_BUNDLE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([a-zA-Z0-9\-_]+\.[a-zA-Z0-9\-_]+)+$").expect("package or bundle regex")
});

/// W3C when the createSession body carries a `capabilities` object.
pub fn determine_protocol(body: &Value) -> ProtocolVariant {
    if body.get("capabilities").map(Value::is_object).unwrap_or(false) {
        ProtocolVariant::W3c
    } else {
        ProtocolVariant::Legacy
    }
}

/// Flat capability map of a createSession body.
///
/// For W3C, `alwaysMatch` is merged with the first `firstMatch` entry and the
/// `appium:` vendor prefix is dropped from names.
pub fn merge_capabilities(body: &Value, protocol: ProtocolVariant) -> BridgeResult<Map<String, Value>> {
    let merged = match protocol {
        ProtocolVariant::Legacy => body
            .get("desiredCapabilities")
            .and_then(Value::as_object)
            .cloned()
            .ok_or_else(|| {
                BridgeError::PayloadValidation("'desiredCapabilities' must be a JSON object".into())
            })?,
        ProtocolVariant::W3c => {
            let caps = &body["capabilities"];
            let always = object_or_empty(caps.get("alwaysMatch"), "alwaysMatch")?;
            let first = match caps.get("firstMatch") {
                None | Some(Value::Null) => Map::new(),
                Some(Value::Array(entries)) => object_or_empty(entries.first(), "firstMatch")?,
                Some(_) => {
                    return Err(BridgeError::PayloadValidation(
                        "'firstMatch' must be a JSON array".into(),
                    ))
                }
            };
            merge_disjoint(always, first)?
        }
    };
    Ok(strip_vendor_prefix(merged))
}

fn object_or_empty(value: Option<&Value>, name: &str) -> BridgeResult<Map<String, Value>> {
    match value {
        None | Some(Value::Null) => Ok(Map::new()),
        Some(Value::Object(map)) => Ok(map.clone()),
        Some(_) => Err(BridgeError::PayloadValidation(format!(
            "'{name}' must be a JSON object"
        ))),
    }
}

fn merge_disjoint(
    mut primary: Map<String, Value>,
    secondary: Map<String, Value>,
) -> BridgeResult<Map<String, Value>> {
    for (key, value) in secondary {
        if primary.contains_key(&key) {
            return Err(BridgeError::PayloadValidation(format!(
                "Property '{key}' should not exist on both alwaysMatch and firstMatch"
            )));
        }
        primary.insert(key, value);
    }
    Ok(primary)
}

fn strip_vendor_prefix(caps: Map<String, Value>) -> Map<String, Value> {
    caps.into_iter()
        .map(|(key, value)| match key.strip_prefix(APPIUM_VENDOR_PREFIX) {
            Some(stripped) => (stripped.to_string(), value),
            None => (key, value),
        })
        .collect()
}

/// `com.example.app` style identifiers name an installed package, not a file.
pub fn is_package_or_bundle(app: &str) -> bool {
    PACKAGE_OR_BUNDLE_RE.is_match(app)
}

/// Recursively copies `first_key` to `second_key` and back in every object.
pub fn duplicate_keys(input: &Value, first_key: &str, second_key: &str) -> Value {
    match input {
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| duplicate_keys(item, first_key, second_key))
                .collect(),
        ),
        Value::Object(map) => {
            let mut result = Map::new();
            for (key, value) in map {
                let value = duplicate_keys(value, first_key, second_key);
                if key == first_key {
                    result.insert(second_key.to_string(), value.clone());
                } else if key == second_key {
                    result.insert(first_key.to_string(), value.clone());
                }
                result.insert(key.clone(), value);
            }
            Value::Object(result)
        }
        other => other.clone(),
    }
}

/// Accepts a JSON array, a string holding one, or a plain string.
pub fn parse_caps_array(cap: &Value) -> BridgeResult<Vec<Value>> {
    match cap {
        Value::Array(items) => Ok(items.clone()),
        Value::String(text) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Array(items)) => Ok(items),
            _ => Ok(vec![Value::String(text.clone())]),
        },
        other => Err(BridgeError::PayloadValidation(format!(
            "must provide a string or JSON Array; received {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn protocol_follows_body_shape() {
        assert_eq!(
            determine_protocol(&json!({ "capabilities": { "alwaysMatch": {} } })),
            ProtocolVariant::W3c
        );
        assert_eq!(
            determine_protocol(&json!({ "desiredCapabilities": { "app": "a.apk" } })),
            ProtocolVariant::Legacy
        );
        assert_eq!(
            determine_protocol(&json!({ "capabilities": "nope" })),
            ProtocolVariant::Legacy
        );
    }

    #[test]
    fn w3c_caps_merge_and_lose_prefix() {
        let body = json!({
            "capabilities": {
                "alwaysMatch": { "platformName": "Android", "appium:app": "/tmp/a.apk" },
                "firstMatch": [{ "appium:udid": "emulator-5554" }, { "appium:udid": "other" }]
            }
        });
        let caps = merge_capabilities(&body, ProtocolVariant::W3c).unwrap();
        assert_eq!(caps["app"], "/tmp/a.apk");
        assert_eq!(caps["udid"], "emulator-5554");
        assert_eq!(caps["platformName"], "Android");

        let clash = json!({
            "capabilities": {
                "alwaysMatch": { "platformName": "Android" },
                "firstMatch": [{ "platformName": "iOS" }]
            }
        });
        assert!(merge_capabilities(&clash, ProtocolVariant::W3c).is_err());
    }

    #[test]
    fn bundle_ids_are_recognised() {
        assert!(is_package_or_bundle("com.example.app"));
        assert!(is_package_or_bundle("io.appium.android_apis"));
        assert!(!is_package_or_bundle("/tmp/app.apk"));
        assert!(!is_package_or_bundle("https://host/app.zip"));
        assert!(!is_package_or_bundle("app"));
    }

    #[test]
    fn keys_are_mirrored_recursively() {
        let input = json!([{ "ELEMENT": "e1", "nested": { W3C_ELEMENT_KEY: "e2" } }]);
        let output = duplicate_keys(&input, LEGACY_ELEMENT_KEY, W3C_ELEMENT_KEY);
        assert_eq!(output[0][W3C_ELEMENT_KEY], "e1");
        assert_eq!(output[0]["nested"]["ELEMENT"], "e2");
    }

    #[test]
    fn caps_arrays() {
        assert_eq!(parse_caps_array(&json!(["a", "b"])).unwrap(), vec![json!("a"), json!("b")]);
        assert_eq!(parse_caps_array(&json!(r#"["a","b"]"#)).unwrap().len(), 2);
        assert_eq!(parse_caps_array(&json!("/tmp/a.apk")).unwrap(), vec![json!("/tmp/a.apk")]);
        assert!(parse_caps_array(&json!(5)).is_err());
    }
}
