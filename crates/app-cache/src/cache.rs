use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::archive::WORKDIR_PREFIX;
use crate::model::{CacheConfig, CacheEntry, Freshness, RemoteAppProps, ReuseReason};

/// Process-wide registry of provisioned applications.
///
/// Entries expire after `max_age` without access. Removing an entry for any
/// reason also deletes its on-disk artifact unless another entry still points
/// at the same path. Artifacts that cannot be reused are adopted instead and
/// only deleted on dispose.
pub struct ApplicationCache {
    entries: DashMap<String, CacheEntry>,
    adopted: DashSet<PathBuf>,
    config: CacheConfig,
}

impl Default for ApplicationCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl ApplicationCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            adopted: DashSet::new(),
            config,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Returns the entry for `key` and refreshes its access time.
    ///
    /// Never touches the filesystem for live entries; an expired entry is
    /// dropped and its artifact scheduled for deletion.
    pub fn lookup(&self, key: &str) -> Option<CacheEntry> {
        let now = Utc::now();
        if let Some(mut entry) = self.entries.get_mut(key) {
            if !self.is_expired(&entry, now) {
                entry.accessed_at = now;
                return Some(entry.clone());
            }
        }
        if let Some((_, expired)) = self.entries.remove(key) {
            debug!(key, path = %expired.full_path.display(), "cache entry expired");
            self.discard_in_background(expired.full_path);
        }
        None
    }

    /// Like [`lookup`](Self::lookup), but also checks that the artifact is
    /// still on disk. A vanished artifact drops the entry.
    pub async fn verified(&self, key: &str) -> Option<CacheEntry> {
        let entry = self.lookup(key)?;
        if path_exists(&entry.full_path).await {
            return Some(entry);
        }
        info!(
            key,
            path = %entry.full_path.display(),
            "cached application does not exist anymore"
        );
        self.forget(key);
        None
    }

    /// Decides whether the cached copy of `key` may be reused given the
    /// remote's current caching signals.
    pub fn resolve_freshness(
        &self,
        key: &str,
        remote: &RemoteAppProps,
        now: DateTime<Utc>,
    ) -> Freshness {
        let cached = self.entries.get(key).map(|entry| entry.clone());
        let freshness = resolve_freshness(cached.as_ref(), remote, now);
        debug!(key, ?freshness, "resolved cache freshness");
        freshness
    }

    /// Inserts or replaces the entry for `entry.key`. A replaced entry whose
    /// artifact differs from the new one gets its artifact deleted.
    pub async fn register(&self, mut entry: CacheEntry) {
        let now = Utc::now();
        entry.accessed_at = now;
        let key = entry.key.clone();
        let new_path = entry.full_path.clone();
        let previous = self.entries.insert(key.clone(), entry);
        info!(key = %key, path = %new_path.display(), "registered application in cache");
        if let Some(previous) = previous {
            if previous.full_path != new_path && !self.is_referenced(&previous.full_path) {
                remove_artifact(&previous.full_path).await;
            }
        }
        self.enforce_capacity().await;
    }

    /// Removes `key` and deletes its artifact.
    pub async fn evict(&self, key: &str) -> Option<CacheEntry> {
        let (_, entry) = self.entries.remove(key)?;
        if !self.is_referenced(&entry.full_path) {
            remove_artifact(&entry.full_path).await;
        }
        Some(entry)
    }

    /// Takes ownership of an artifact that is not registered under any key,
    /// so it is deleted together with the rest of the cache.
    pub fn adopt(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        debug!(path = %path.display(), "adopted unregistered application artifact");
        self.adopted.insert(path);
    }

    pub fn adopted_len(&self) -> usize {
        self.adopted.len()
    }

    /// Removes `key` without touching the filesystem.
    pub fn forget(&self, key: &str) -> Option<CacheEntry> {
        self.entries.remove(key).map(|(_, entry)| entry)
    }

    /// Drops every expired entry. Returns how many were removed.
    pub async fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| self.is_expired(entry.value(), now))
            .map(|entry| entry.key().clone())
            .collect();
        let mut removed = 0;
        for key in expired {
            if self.evict(&key).await.is_some() {
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(removed, "swept expired cache entries");
        }
        removed
    }

    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let cache = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cache) = cache.upgrade() else {
                    break;
                };
                cache.sweep_expired().await;
            }
        })
    }

    /// Empties the cache and deletes all artifacts.
    pub async fn dispose(&self) {
        let keys = self.keys();
        if !keys.is_empty() {
            info!(count = keys.len(), "clearing application cache");
            for key in keys {
                self.evict(&key).await;
            }
        }
        for path in self.take_adopted() {
            remove_artifact(&path).await;
        }
    }

    /// Synchronous variant of [`dispose`](Self::dispose) for process exit
    /// paths where no runtime is available.
    pub fn purge_blocking(&self) {
        let keys = self.keys();
        if !keys.is_empty() {
            info!(count = keys.len(), "performing cleanup of cached applications");
            for key in keys {
                if let Some((_, entry)) = self.entries.remove(&key) {
                    remove_artifact_blocking(&entry.full_path);
                }
            }
        }
        for path in self.take_adopted() {
            remove_artifact_blocking(&path);
        }
    }

    fn take_adopted(&self) -> Vec<PathBuf> {
        let paths: Vec<PathBuf> = self.adopted.iter().map(|path| path.key().clone()).collect();
        for path in &paths {
            self.adopted.remove(path);
        }
        paths
    }

    fn is_expired(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        let idle = now.signed_duration_since(entry.accessed_at);
        idle.to_std()
            .map(|idle| idle > self.config.max_age)
            .unwrap_or(false)
    }

    fn is_referenced(&self, path: &Path) -> bool {
        self.entries.iter().any(|entry| entry.full_path == path)
    }

    async fn enforce_capacity(&self) {
        while self.entries.len() > self.config.max_entries.max(1) {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|entry| entry.accessed_at)
                .map(|entry| entry.key().clone());
            match oldest {
                Some(key) => {
                    debug!(key = %key, "evicting least recently used application");
                    self.evict(&key).await;
                }
                None => break,
            }
        }
    }

    fn discard_in_background(&self, path: PathBuf) {
        if self.is_referenced(&path) {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || remove_artifact_blocking(&path));
            }
            Err(_) => remove_artifact_blocking(&path),
        }
    }
}

/// Freshness rules, first match wins:
/// 1. both sides carry a last-modified stamp: reuse unless the remote is newer;
/// 2. both sides are immutable: reuse;
/// 3. a max-age is known and the entry is younger than it: reuse;
/// 4. otherwise refresh.
pub fn resolve_freshness(
    cached: Option<&CacheEntry>,
    remote: &RemoteAppProps,
    now: DateTime<Utc>,
) -> Freshness {
    let Some(cached) = cached else {
        return Freshness::Refresh;
    };
    if let (Some(remote_stamp), Some(cached_stamp)) = (remote.last_modified, cached.last_modified)
    {
        return if remote_stamp <= cached_stamp {
            Freshness::Reuse(ReuseReason::NotModified)
        } else {
            Freshness::Refresh
        };
    }
    if remote.immutable && cached.immutable {
        return Freshness::Reuse(ReuseReason::Immutable);
    }
    if let Some(max_age) = cached.max_age_secs.or(remote.max_age_secs) {
        let age = now
            .signed_duration_since(cached.created_at)
            .num_seconds()
            .max(0) as u64;
        if age < max_age {
            return Freshness::Reuse(ReuseReason::WithinMaxAge {
                remaining_secs: max_age - age,
            });
        }
    }
    Freshness::Refresh
}

async fn path_exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

pub(crate) async fn remove_artifact(path: &Path) {
    let owned = path.to_path_buf();
    let outcome = tokio::task::spawn_blocking(move || remove_artifact_blocking(&owned)).await;
    if let Err(err) = outcome {
        warn!(path = %path.display(), ?err, "artifact removal task failed");
    }
}

/// Deletes a file or directory and, when it lived in a work directory this
/// crate created, the now-empty parent.
pub(crate) fn remove_artifact_blocking(path: &Path) {
    let result = match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(path),
        Ok(_) => std::fs::remove_file(path),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    };
    if let Err(err) = result {
        warn!(path = %path.display(), %err, "unable to delete cached application");
        return;
    }
    debug!(path = %path.display(), "deleted application artifact");
    let owned_parent = path.parent().filter(|parent| {
        parent
            .file_name()
            .and_then(|name| name.to_str())
            .map(|name| name.starts_with(WORKDIR_PREFIX))
            .unwrap_or(false)
    });
    if let Some(parent) = owned_parent {
        // Fails harmlessly when something else still lives there.
        let _ = std::fs::remove_dir(parent);
    }
}
