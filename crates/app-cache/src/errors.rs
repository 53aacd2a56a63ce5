use std::path::PathBuf;

use thiserror::Error;

/// Fatal provisioning failures. Recoverable conditions (HEAD probe failure,
/// shared copy size mismatch, vanished cache artifact) never surface here.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error(
        "The protocol '{protocol}' used in '{app}' is not supported. \
         Only http: and https: protocols are supported"
    )]
    UnsupportedProtocol { protocol: String, app: String },
    #[error("The application at '{0}' does not exist or is not accessible")]
    NotFound(String),
    #[error(
        ".lock file '{}' for downloading application '{app}' has not disappeared after {waited_ms}ms",
        lock.display()
    )]
    LockTimeout {
        app: String,
        lock: PathBuf,
        waited_ms: u64,
    },
    #[error("Local application file '{}' has not appeared after .lock file removal", .0.display())]
    SharedCopyMissing(PathBuf),
    #[error("Unable to download the app from '{url}': {source}")]
    Download {
        url: String,
        #[source]
        source: FetchError,
    },
    #[error("Cannot extract '{}': the archive is corrupted or not a zip file ({reason})", path.display())]
    CorruptArchive { path: PathBuf, reason: String },
    #[error(
        "App unzipped OK, but we could not find any '{extensions}' bundle in '{}'. \
         Make sure your archive contains at least one package having '{extensions}' extension",
        archive.display()
    )]
    BundleNotFound { archive: PathBuf, extensions: String },
    #[error("New app path '{}' did not have extension(s): {extensions}", path.display())]
    UnsupportedExtension { path: PathBuf, extensions: String },
    #[error("Failed to {action} '{}': {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ProvisionError {
    pub fn io(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ProvisionError::Io {
            action,
            path: path.into(),
            source,
        }
    }
}

pub type ProvisionResult<T> = Result<T, ProvisionError>;

/// Failure talking to the remote that hosts an application.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Http(String),
    #[error("server responded with status {0}")]
    Status(u16),
    #[error("timed out after {0}ms")]
    Timeout(u64),
    #[error("response carries no usable content-length")]
    MissingLength,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => FetchError::Status(status.as_u16()),
            None => FetchError::Http(err.to_string()),
        }
    }
}
