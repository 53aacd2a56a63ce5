use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::ExecError;

/// Gate for potentially insecure driver features.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityPolicy {
    pub relaxed: bool,
    pub allow_insecure: HashSet<String>,
    pub deny_insecure: HashSet<String>,
}

impl SecurityPolicy {
    /// The deny list wins over the allow list, which wins over relaxed mode.
    pub fn is_feature_enabled(&self, name: &str) -> bool {
        if self.deny_insecure.contains(name) {
            return false;
        }
        if self.allow_insecure.contains(name) {
            return true;
        }
        self.relaxed
    }

    pub fn ensure_feature_enabled(&self, name: &str) -> Result<(), ExecError> {
        if self.is_feature_enabled(name) {
            return Ok(());
        }
        Err(ExecError::InvalidArgument(format!(
            "Potentially insecure feature '{name}' has not been enabled. \
             If you want to enable this feature and accept the security ramifications, \
             add it to the allow-insecure list or start the server with relaxed security"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deny_beats_allow_beats_relaxed() {
        let mut policy = SecurityPolicy {
            relaxed: true,
            ..Default::default()
        };
        assert!(policy.is_feature_enabled("adb_shell"));
        policy.deny_insecure.insert("adb_shell".into());
        policy.allow_insecure.insert("adb_shell".into());
        assert!(!policy.is_feature_enabled("adb_shell"));

        let strict = SecurityPolicy {
            allow_insecure: ["record_audio".to_string()].into_iter().collect(),
            ..Default::default()
        };
        assert!(strict.is_feature_enabled("record_audio"));
        assert!(!strict.is_feature_enabled("adb_shell"));
        let err = strict.ensure_feature_enabled("adb_shell").unwrap_err();
        assert!(err.to_string().contains("'adb_shell'"));
    }
}
