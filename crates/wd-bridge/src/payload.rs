//! Payload contracts of the route table.
//!
//! Contracts are plain data: required fields (or alternative groups of
//! fields), optional fields, a named validator and a named argument builder.
//! Nothing in the table executes code until a request is checked against it.

use mcloud_core_types::ProtocolVariant;
use serde_json::{json, Map, Value};

use crate::errors::{BridgeError, BridgeResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequiredParams {
    None,
    /// Every field must be present.
    Fields(&'static [&'static str]),
    /// At least one group must be fully present.
    AlternativeGroups(&'static [&'static [&'static str]]),
}

impl RequiredParams {
    fn groups(&self) -> Vec<&'static [&'static str]> {
        match self {
            RequiredParams::None => Vec::new(),
            RequiredParams::Fields(fields) => vec![*fields],
            RequiredParams::AlternativeGroups(groups) => groups.to_vec(),
        }
    }

    fn flattened(&self) -> Vec<&'static str> {
        self.groups().into_iter().flatten().copied().collect()
    }
}

/// Body checks that go beyond field presence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Validator {
    /// `capabilities` or `desiredCapabilities` must be given.
    Capabilities,
    /// W3C wants one of `script`/`pageLoad`/`implicit`, legacy wants `type` and `ms`.
    Timeouts,
    TextOrValue,
    NameOrHandle,
    /// Accepts the historical `signalStrengh` spelling too.
    SignalStrength,
}

impl Validator {
    /// Returns the rejection message, if any.
    pub fn check(self, body: &Value, protocol: ProtocolVariant) -> Option<String> {
        let rejection = match self {
            Validator::Capabilities => (!is_truthy(body.get("capabilities"))
                && !is_truthy(body.get("desiredCapabilities")))
            .then_some(r#"we require one of "desiredCapabilities" or "capabilities" object"#),
            Validator::Timeouts if protocol.is_w3c() => (!has_value(body, "script")
                && !has_value(body, "pageLoad")
                && !has_value(body, "implicit"))
            .then_some("W3C protocol expects any of script, pageLoad or implicit to be set"),
            Validator::Timeouts => (!has_value(body, "type") || !has_value(body, "ms"))
                .then_some("MJSONWP protocol requires type and ms"),
            Validator::TextOrValue => (!has_value(body, "value") && !has_value(body, "text"))
                .then_some(r#"we require one of "text" or "value" params"#),
            Validator::NameOrHandle => (!has_value(body, "name") && !has_value(body, "handle"))
                .then_some(r#"we require one of "name" or "handle" to be set"#),
            Validator::SignalStrength => (!has_value(body, "signalStrength")
                && !has_value(body, "signalStrengh"))
            .then_some(r#"we require one of "signalStrength" or "signalStrengh" params"#),
        };
        rejection.map(str::to_string)
    }
}

/// How the positional argument list is derived from the body.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArgBuilder {
    /// Required fields (all groups, flattened) then optional fields, in declared order.
    Declared,
    /// `[value || text]`
    ValueOrText,
    /// `[value ?? text ?? ""]`
    ValueOrTextOrEmpty,
    /// `[name, handle]`, either one standing in for the other when alone.
    WindowHandle,
    /// `[signalStrength ?? signalStrengh]`
    SignalStrength,
}

impl ArgBuilder {
    pub fn build(self, contract: &PayloadContract, body: &Value) -> Vec<Value> {
        match self {
            ArgBuilder::Declared => contract
                .required
                .flattened()
                .into_iter()
                .chain(contract.optional.iter().copied())
                .map(|field| field_or_null(body, field))
                .collect(),
            ArgBuilder::ValueOrText => {
                let value = body.get("value").filter(|v| is_truthy(Some(*v)));
                vec![value.cloned().unwrap_or_else(|| field_or_null(body, "text"))]
            }
            ArgBuilder::ValueOrTextOrEmpty => {
                let value = [body.get("value"), body.get("text")]
                    .into_iter()
                    .flatten()
                    .find(|v| !v.is_null())
                    .cloned()
                    .unwrap_or_else(|| json!(""));
                vec![value]
            }
            ArgBuilder::WindowHandle => {
                let name = field_or_null(body, "name");
                let handle = field_or_null(body, "handle");
                match (name.is_null(), handle.is_null()) {
                    (true, false) => vec![handle.clone(), handle],
                    (false, true) => vec![name.clone(), name],
                    _ => vec![name, handle],
                }
            }
            ArgBuilder::SignalStrength => {
                let field = if has_value(body, "signalStrength") {
                    "signalStrength"
                } else {
                    "signalStrengh"
                };
                vec![field_or_null(body, field)]
            }
        }
    }
}

/// Body reshaping applied before any check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reshape {
    None,
    /// Dive into the named sub-object.
    Unwrap(&'static str),
    /// Put the whole body under the named key.
    Wrap(&'static str),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PayloadContract {
    pub required: RequiredParams,
    pub optional: &'static [&'static str],
    pub validator: Option<Validator>,
    pub args: ArgBuilder,
    pub reshape: Reshape,
}

impl PayloadContract {
    pub const EMPTY: PayloadContract = PayloadContract {
        required: RequiredParams::None,
        optional: &[],
        validator: None,
        args: ArgBuilder::Declared,
        reshape: Reshape::None,
    };

    pub const fn required(fields: &'static [&'static str]) -> Self {
        Self {
            required: RequiredParams::Fields(fields),
            ..Self::EMPTY
        }
    }

    pub const fn one_of(groups: &'static [&'static [&'static str]]) -> Self {
        Self {
            required: RequiredParams::AlternativeGroups(groups),
            ..Self::EMPTY
        }
    }

    pub const fn optional(fields: &'static [&'static str]) -> Self {
        Self {
            optional: fields,
            ..Self::EMPTY
        }
    }

    pub const fn and_optional(self, fields: &'static [&'static str]) -> Self {
        Self {
            optional: fields,
            ..self
        }
    }

    pub const fn validated(self, validator: Validator) -> Self {
        Self {
            validator: Some(validator),
            ..self
        }
    }

    pub const fn with_args(self, args: ArgBuilder) -> Self {
        Self { args, ..self }
    }

    pub const fn reshaped(self, reshape: Reshape) -> Self {
        Self { reshape, ..self }
    }

    /// Applies `wrap`/`unwrap`. A missing body is an empty object.
    pub fn prepare(&self, body: Value) -> Value {
        let body = if body.is_null() { Value::Object(Map::new()) } else { body };
        match self.reshape {
            Reshape::None => body,
            Reshape::Wrap(key) => json!({ key: body }),
            Reshape::Unwrap(key) => match body.get(key) {
                Some(inner) if inner.is_object() => inner.clone(),
                _ => body,
            },
        }
    }

    /// Runs the validator, then requires one fully present required group.
    pub fn check(&self, body: &Value, protocol: ProtocolVariant) -> BridgeResult<()> {
        if let Some(message) = self.validator.and_then(|v| v.check(body, protocol)) {
            return Err(BridgeError::PayloadValidation(message));
        }
        let groups = self.required.groups();
        if groups.is_empty() {
            return Ok(());
        }
        let satisfied = groups
            .iter()
            .any(|group| group.iter().all(|field| body.get(*field).is_some()));
        if satisfied {
            return Ok(());
        }
        let received: Vec<&str> = body
            .as_object()
            .map(|obj| obj.keys().map(String::as_str).collect())
            .unwrap_or_default();
        Err(BridgeError::PayloadValidation(format!(
            "Parameters were incorrect. We wanted {} and you sent {}",
            json!({ "required": groups, "optional": self.optional }),
            json!(received)
        )))
    }

    pub fn make_args(&self, body: &Value) -> Vec<Value> {
        self.args.build(self, body)
    }
}

/// Reshapes and checks `body`, then builds the argument list for the handler.
/// URL parameters other than `sessionId` are appended in pattern order.
pub fn build_args(
    contract: Option<&PayloadContract>,
    body: Value,
    protocol: ProtocolVariant,
    url_params: &[(&'static str, String)],
) -> BridgeResult<Vec<Value>> {
    let mut args = match contract {
        Some(contract) => {
            let body = contract.prepare(body);
            contract.check(&body, protocol)?;
            contract.make_args(&body)
        }
        None => Vec::new(),
    };
    args.extend(
        url_params
            .iter()
            .filter(|(name, _)| *name != "sessionId")
            .map(|(_, value)| Value::String(value.clone())),
    );
    Ok(args)
}

fn has_value(body: &Value, field: &str) -> bool {
    body.get(field).map(|v| !v.is_null()).unwrap_or(false)
}

fn field_or_null(body: &Value, field: &str) -> Value {
    body.get(field).cloned().unwrap_or(Value::Null)
}

fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(flag)) => *flag,
        Some(Value::String(text)) => !text.is_empty(),
        Some(Value::Number(number)) => number.as_f64().map(|n| n != 0.0).unwrap_or(true),
        Some(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_depend_on_protocol() {
        let v = Validator::Timeouts;
        assert!(v.check(&json!({ "implicit": 10 }), ProtocolVariant::W3c).is_none());
        assert_eq!(
            v.check(&json!({ "type": "implicit" }), ProtocolVariant::W3c).as_deref(),
            Some("W3C protocol expects any of script, pageLoad or implicit to be set")
        );
        assert!(v
            .check(&json!({ "type": "implicit", "ms": 10 }), ProtocolVariant::Legacy)
            .is_none());
        assert_eq!(
            v.check(&json!({ "implicit": 10 }), ProtocolVariant::Legacy).as_deref(),
            Some("MJSONWP protocol requires type and ms")
        );
    }

    #[test]
    fn alternative_groups_need_one_full_group() {
        let contract = PayloadContract::one_of(&[&["appId"], &["bundleId"]]).and_optional(&["options"]);
        assert!(contract.check(&json!({ "bundleId": "com.acme" }), ProtocolVariant::W3c).is_ok());
        let err = contract
            .check(&json!({ "options": {} }), ProtocolVariant::W3c)
            .unwrap_err();
        assert!(err.to_string().contains("Parameters were incorrect"));
        assert_eq!(
            contract.make_args(&json!({ "bundleId": "com.acme" })),
            vec![Value::Null, json!("com.acme"), Value::Null]
        );
    }

    #[test]
    fn window_handle_mirrors_single_field() {
        let contract = PayloadContract::optional(&["name", "handle"])
            .with_args(ArgBuilder::WindowHandle)
            .validated(Validator::NameOrHandle);
        assert_eq!(contract.make_args(&json!({ "handle": "w1" })), vec![json!("w1"), json!("w1")]);
        assert_eq!(
            contract.make_args(&json!({ "name": "a", "handle": "b" })),
            vec![json!("a"), json!("b")]
        );
        assert!(contract.check(&json!({}), ProtocolVariant::W3c).is_err());
    }

    #[test]
    fn value_or_text_prefers_truthy_value() {
        let contract = PayloadContract::optional(&["value", "text"]).with_args(ArgBuilder::ValueOrText);
        assert_eq!(contract.make_args(&json!({ "value": "", "text": "t" })), vec![json!("t")]);
        let replace = contract.with_args(ArgBuilder::ValueOrTextOrEmpty);
        assert_eq!(replace.make_args(&json!({ "value": "", "text": "t" })), vec![json!("")]);
        assert_eq!(replace.make_args(&json!({})), vec![json!("")]);
    }

    #[test]
    fn reshape_and_url_params() {
        let unwrap = PayloadContract::required(&["type"]).reshaped(Reshape::Unwrap("parameters"));
        let args = build_args(
            Some(&unwrap),
            json!({ "parameters": { "type": 6 } }),
            ProtocolVariant::W3c,
            &[("sessionId", "s1".into())],
        )
        .unwrap();
        assert_eq!(args, vec![json!(6)]);

        let wrap = PayloadContract::required(&["actions"]).reshaped(Reshape::Wrap("actions"));
        let args = build_args(
            Some(&wrap),
            json!([{ "action": "tap" }]),
            ProtocolVariant::W3c,
            &[("sessionId", "s1".into()), ("elementId", "e7".into())],
        )
        .unwrap();
        assert_eq!(args, vec![json!([{ "action": "tap" }]), json!("e7")]);
    }

    #[test]
    fn signal_strength_accepts_legacy_spelling() {
        let contract = PayloadContract::optional(&["signalStrength", "signalStrengh"])
            .validated(Validator::SignalStrength)
            .with_args(ArgBuilder::SignalStrength);
        assert_eq!(contract.make_args(&json!({ "signalStrengh": 3 })), vec![json!(3)]);
        assert!(contract.check(&json!({}), ProtocolVariant::Legacy).is_err());
    }
}
