use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{HeaderMap, CACHE_CONTROL, LAST_MODIFIED};
use serde::{Deserialize, Serialize};

/// Default lifetime of an unused cache entry.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);
pub const DEFAULT_MAX_ENTRIES: usize = 1024;

static MAX_AGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)max-age=(\d+)").expect("valid max-age regex")
});

/// A previously provisioned application, keyed by the logical identifier
/// the caller supplied (usually the URL).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub full_path: PathBuf,
    pub hash: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    pub immutable: bool,
    pub max_age_secs: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub accessed_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(key: impl Into<String>, full_path: impl Into<PathBuf>) -> Self {
        let now = Utc::now();
        Self {
            key: key.into(),
            full_path: full_path.into(),
            hash: None,
            last_modified: None,
            immutable: false,
            max_age_secs: None,
            created_at: now,
            accessed_at: now,
        }
    }

    pub fn with_hash(mut self, hash: Option<String>) -> Self {
        self.hash = hash;
        self
    }

    pub fn with_remote(mut self, remote: &RemoteAppProps) -> Self {
        self.last_modified = remote.last_modified;
        self.immutable = remote.immutable;
        self.max_age_secs = remote.max_age_secs;
        self
    }
}

/// Caching signals advertised by the remote through response headers.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteAppProps {
    pub last_modified: Option<DateTime<Utc>>,
    pub immutable: bool,
    pub max_age_secs: Option<u64>,
}

impl RemoteAppProps {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let last_modified = headers
            .get(LAST_MODIFIED)
            .and_then(|value| value.to_str().ok())
            .and_then(|raw| DateTime::parse_from_rfc2822(raw.trim()).ok())
            .map(|stamp| stamp.with_timezone(&Utc));
        let cache_control = headers
            .get(CACHE_CONTROL)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        let immutable = cache_control
            .split(',')
            .any(|directive| directive.trim().eq_ignore_ascii_case("immutable"));
        let max_age_secs = MAX_AGE_RE
            .captures(cache_control)
            .and_then(|caps| caps.get(1))
            .and_then(|digits| digits.as_str().parse::<u64>().ok());
        Self {
            last_modified,
            immutable,
            max_age_secs,
        }
    }

    /// True when at least one caching signal is present.
    pub fn any(&self) -> bool {
        self.last_modified.is_some() || self.immutable || self.max_age_secs.is_some()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReuseReason {
    NotModified,
    Immutable,
    WithinMaxAge { remaining_secs: u64 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Freshness {
    Reuse(ReuseReason),
    Refresh,
}

impl Freshness {
    pub fn is_reuse(&self) -> bool {
        matches!(self, Freshness::Reuse(_))
    }
}

#[derive(Clone, Debug)]
pub struct CacheConfig {
    pub max_age: Duration,
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_age: DEFAULT_MAX_AGE,
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ProvisionerConfig {
    /// Root under which downloads and extractions get their own directory.
    pub work_dir: PathBuf,
    /// Folder shared with peer processes on the same host.
    pub shared_apps_dir: Option<PathBuf>,
    pub lock_poll_interval: Duration,
    pub lock_poll_attempts: u32,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            work_dir: std::env::temp_dir(),
            shared_apps_dir: None,
            lock_poll_interval: Duration::from_millis(1000),
            lock_poll_attempts: 60,
        }
    }
}

impl ProvisionerConfig {
    pub fn lock_wait_budget(&self) -> Duration {
        self.lock_poll_interval * self.lock_poll_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn parses_caching_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(
            LAST_MODIFIED,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        headers.insert(
            CACHE_CONTROL,
            HeaderValue::from_static("public, max-age=3600, immutable"),
        );
        let props = RemoteAppProps::from_headers(&headers);
        assert!(props.immutable);
        assert_eq!(props.max_age_secs, Some(3600));
        assert_eq!(
            props.last_modified.map(|stamp| stamp.timestamp()),
            Some(1_445_412_480)
        );
        assert!(props.any());
    }

    #[test]
    fn missing_headers_carry_no_signal() {
        let props = RemoteAppProps::from_headers(&HeaderMap::new());
        assert!(!props.any());
    }
}
