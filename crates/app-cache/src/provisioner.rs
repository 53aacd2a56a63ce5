//! Turns an application reference (local path or http(s) URL) into a local
//! file or bundle with an accepted extension.
//!
//! Requests for the same reference are serialized in-process through
//! [`KeyedLocks`]; peers sharing an apps folder coordinate through
//! `<file>.lock` siblings.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use mcloud_core_types::KeyedLocks;
use reqwest::header::HeaderMap;
use tracing::{debug, info, warn};
use url::Url;

use crate::archive::{
    extension_of, has_accepted_extension, hash_file, is_archive_path, new_work_dir, unzip_app,
};
use crate::cache::{remove_artifact, ApplicationCache};
use crate::errors::{ProvisionError, ProvisionResult};
use crate::fetch::RemoteFetcher;
use crate::lock::{lock_path_for, wait_for_release, PeerLock};
use crate::model::{CacheEntry, ProvisionerConfig, RemoteAppProps};
use crate::naming::{local_file_for_url, resolve_download_name};

enum AppSource {
    Remote(Url),
    Local(PathBuf),
}

/// A local artifact ready for extraction or verification.
struct Staged {
    path: PathBuf,
    should_unzip: bool,
}

enum RemoteOutcome {
    /// Cache hit; already extracted and verified once.
    Cached(PathBuf),
    Staged(Staged),
}

struct SharedSlot {
    local_file: PathBuf,
    lock_file: PathBuf,
}

pub struct AppProvisioner {
    cache: Arc<ApplicationCache>,
    fetcher: Arc<dyn RemoteFetcher>,
    locks: KeyedLocks,
    config: ProvisionerConfig,
}

impl AppProvisioner {
    pub fn new(
        cache: Arc<ApplicationCache>,
        fetcher: Arc<dyn RemoteFetcher>,
        config: ProvisionerConfig,
    ) -> Self {
        Self {
            cache,
            fetcher,
            locks: KeyedLocks::new(),
            config,
        }
    }

    pub fn cache(&self) -> &Arc<ApplicationCache> {
        &self.cache
    }

    pub fn config(&self) -> &ProvisionerConfig {
        &self.config
    }

    /// Resolves `app` to a local artifact whose extension is one of `accepted`.
    pub async fn configure_app(&self, app: &str, accepted: &[String]) -> ProvisionResult<PathBuf> {
        let app = app.trim();
        let _guard = self.locks.acquire(app).await;
        let mut app_key = app.to_string();
        let mut remote = RemoteAppProps::default();

        let staged = match self.classify(app).await? {
            AppSource::Remote(url) => {
                info!(app, "using downloadable app");
                let headers = self.probe_headers(app).await;
                remote = RemoteAppProps::from_headers(&headers);
                match self.fetch_remote(app, &url, &headers, &remote, accepted).await? {
                    RemoteOutcome::Cached(path) => return Ok(path),
                    RemoteOutcome::Staged(staged) => staged,
                }
            }
            AppSource::Local(path) => {
                info!(app, "using local app");
                let should_unzip = is_archive_path(&path);
                Staged { path, should_unzip }
            }
        };

        let mut new_app = staged.path;
        let mut archive_hash = None;
        if staged.should_unzip {
            let archive = new_app.clone();
            let hash = hash_file(&archive).await?;
            if let Some(reused) = self.reuse_extracted(&app_key, &hash).await {
                self.discard_archive(app, &archive).await;
                let reused = verify_extension(reused, accepted)?;
                if remote.any() {
                    // Same bytes, newer caching signals.
                    let entry = CacheEntry::new(app_key, reused.clone())
                        .with_hash(Some(hash))
                        .with_remote(&remote);
                    self.cache.register(entry).await;
                }
                return Ok(reused);
            }
            let dst_root = new_work_dir(&self.config.work_dir)?;
            let extracted = unzip_app(&archive, &dst_root, accepted).await;
            self.discard_archive(app, &archive).await;
            new_app = match extracted {
                Ok(path) => path,
                Err(err) => {
                    remove_artifact(&dst_root).await;
                    return Err(err);
                }
            };
            archive_hash = Some(hash);
        } else if new_app.is_relative() {
            let absolute = std::env::current_dir()
                .map_err(|err| ProvisionError::io("resolve", &new_app, err))?
                .join(&new_app);
            warn!(
                app = %new_app.display(),
                resolved = %absolute.display(),
                "relative app path resolved against the working directory"
            );
            new_app = absolute;
            app_key = new_app.display().to_string();
        }

        let owned = Path::new(&app_key) != new_app && new_app.starts_with(&self.config.work_dir);
        let new_app = match verify_extension(new_app.clone(), accepted) {
            Ok(path) => path,
            Err(err) => {
                if owned {
                    remove_artifact(&new_app).await;
                }
                return Err(err);
            }
        };
        if Path::new(&app_key) != new_app && (archive_hash.is_some() || remote.any()) {
            let entry = CacheEntry::new(app_key, new_app.clone())
                .with_hash(archive_hash)
                .with_remote(&remote);
            self.cache.register(entry).await;
        } else if owned {
            // Nothing to key a reuse on; the download still dies with the cache.
            self.cache.adopt(new_app.clone());
        }
        Ok(new_app)
    }

    async fn classify(&self, app: &str) -> ProvisionResult<AppSource> {
        let parsed = Url::parse(app).ok();
        if let Some(url) = parsed.as_ref() {
            if matches!(url.scheme(), "http" | "https") {
                return Ok(AppSource::Remote(url.clone()));
            }
        }
        let path = PathBuf::from(app);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(AppSource::Local(path));
        }
        match parsed {
            // One-letter schemes are Windows drive letters, not protocols.
            Some(url) if url.scheme().len() > 1 => Err(ProvisionError::UnsupportedProtocol {
                protocol: format!("{}:", url.scheme()),
                app: app.to_string(),
            }),
            _ => Err(ProvisionError::NotFound(app.to_string())),
        }
    }

    async fn probe_headers(&self, app: &str) -> HeaderMap {
        match self.fetcher.head(app).await {
            Ok(headers) => headers,
            Err(err) => {
                info!(app, %err, "cannot send HEAD request, continuing without caching headers");
                HeaderMap::new()
            }
        }
    }

    async fn fetch_remote(
        &self,
        app: &str,
        url: &Url,
        headers: &HeaderMap,
        remote: &RemoteAppProps,
        accepted: &[String],
    ) -> ProvisionResult<RemoteOutcome> {
        let shared = self.shared_slot(url);
        if let Some(slot) = shared.as_ref() {
            if let Some(staged) = self.check_shared_copy(app, slot).await? {
                return Ok(RemoteOutcome::Staged(staged));
            }
        }

        let peer_lock = match shared.as_ref() {
            Some(slot) => Some(PeerLock::acquire(&slot.lock_file).await?),
            None => None,
        };
        let outcome = self
            .download_or_reuse(app, url, headers, remote, accepted, shared.as_ref())
            .await;
        if let Some(lock) = peer_lock {
            lock.release().await;
        }
        outcome
    }

    /// Returns the shared copy when it can be used as is.
    async fn check_shared_copy(
        &self,
        app: &str,
        slot: &SharedSlot,
    ) -> ProvisionResult<Option<Staged>> {
        let staged = |path: &Path| Staged {
            path: path.to_path_buf(),
            should_unzip: is_archive_path(path),
        };
        if exists(&slot.local_file).await {
            info!(
                local = %slot.local_file.display(),
                "local version of app was found, checking whether it is current"
            );
            let remote_len = match self.fetcher.content_length(app).await {
                Ok(len) => len,
                Err(err) => {
                    warn!(app, %err, "cannot read remote content length, downloading a fresh copy");
                    return Ok(None);
                }
            };
            let local_len = tokio::fs::metadata(&slot.local_file)
                .await
                .map(|meta| meta.len())
                .map_err(|err| ProvisionError::io("stat", &slot.local_file, err))?;
            if local_len == remote_len {
                info!(size = local_len, "shared copy matches the remote, reusing it");
                return Ok(Some(staged(&slot.local_file)));
            }
            info!(
                local_len,
                remote_len, "shared copy differs from the remote, replacing it"
            );
            if let Err(err) = tokio::fs::remove_file(&slot.local_file).await {
                warn!(local = %slot.local_file.display(), %err, "unable to remove stale shared copy");
            }
            return Ok(None);
        }
        if exists(&slot.lock_file).await {
            wait_for_release(
                app,
                &slot.lock_file,
                self.config.lock_poll_interval,
                self.config.lock_poll_attempts,
            )
            .await?;
            if !exists(&slot.local_file).await {
                return Err(ProvisionError::SharedCopyMissing(slot.local_file.clone()));
            }
            return Ok(Some(staged(&slot.local_file)));
        }
        Ok(None)
    }

    async fn download_or_reuse(
        &self,
        app: &str,
        url: &Url,
        headers: &HeaderMap,
        remote: &RemoteAppProps,
        accepted: &[String],
        shared: Option<&SharedSlot>,
    ) -> ProvisionResult<RemoteOutcome> {
        if self.cache.resolve_freshness(app, remote, Utc::now()).is_reuse() {
            if let Some(entry) = self.cache.verified(app).await {
                info!(app, path = %entry.full_path.display(), "reusing previously downloaded application");
                return Ok(RemoteOutcome::Cached(verify_extension(
                    entry.full_path,
                    accepted,
                )?));
            }
        }

        let name = resolve_download_name(url, headers, accepted);
        let target_dir = new_work_dir(&self.config.work_dir)?;
        let target = target_dir.join(&name.file_name);
        if let Err(source) = self.fetcher.download(app, &target).await {
            remove_artifact(&target_dir).await;
            return Err(ProvisionError::Download {
                url: app.to_string(),
                source,
            });
        }

        if let Some(slot) = shared {
            if let Err(err) = copy_into_shared(&target, &slot.local_file).await {
                warn!(
                    local = %slot.local_file.display(),
                    %err,
                    "unable to copy application into the shared folder"
                );
            }
        }
        Ok(RemoteOutcome::Staged(Staged {
            path: target,
            should_unzip: name.should_unzip,
        }))
    }

    /// Previously extracted bundle for the same key and archive hash.
    async fn reuse_extracted(&self, key: &str, hash: &str) -> Option<PathBuf> {
        let entry = self.cache.lookup(key)?;
        if entry.hash.as_deref() != Some(hash) {
            return None;
        }
        if exists(&entry.full_path).await {
            info!(key, path = %entry.full_path.display(), "archive unchanged, reusing extracted bundle");
            return Some(entry.full_path);
        }
        info!(
            key,
            path = %entry.full_path.display(),
            "extracted bundle does not exist anymore, extracting again"
        );
        self.cache.forget(key);
        None
    }

    /// Removes a downloaded archive once it has served its purpose. The
    /// caller's own file and the shared copy are kept.
    async fn discard_archive(&self, app: &str, archive: &Path) {
        if archive == Path::new(app) {
            return;
        }
        if let Some(shared) = self.config.shared_apps_dir.as_deref() {
            if archive.starts_with(shared) {
                return;
            }
        }
        debug!(archive = %archive.display(), "removing downloaded archive");
        remove_artifact(archive).await;
    }

    fn shared_slot(&self, url: &Url) -> Option<SharedSlot> {
        let dir = self.config.shared_apps_dir.as_deref()?;
        let local_file = local_file_for_url(dir, url)?;
        let lock_file = lock_path_for(&local_file);
        Some(SharedSlot {
            local_file,
            lock_file,
        })
    }
}

fn verify_extension(path: PathBuf, accepted: &[String]) -> ProvisionResult<PathBuf> {
    if accepted.is_empty() || has_accepted_extension(&path, accepted) {
        return Ok(path);
    }
    debug!(path = %path.display(), ext = %extension_of(&path), "rejected application extension");
    Err(ProvisionError::UnsupportedExtension {
        path,
        extensions: accepted.join(", "),
    })
}

async fn copy_into_shared(source: &Path, dest: &Path) -> std::io::Result<()> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::copy(source, dest).await?;
    info!(shared = %dest.display(), "stored application in the shared folder");
    Ok(())
}

async fn exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}
