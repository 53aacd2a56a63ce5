pub mod archive;
pub mod cache;
pub mod errors;
pub mod fetch;
pub mod lock;
pub mod model;
pub mod naming;
pub mod provisioner;

pub use cache::ApplicationCache;
pub use errors::{FetchError, ProvisionError, ProvisionResult};
pub use fetch::{HttpFetcher, RemoteFetcher};
pub use model::{CacheConfig, CacheEntry, Freshness, ProvisionerConfig, RemoteAppProps, ReuseReason};
pub use provisioner::AppProvisioner;
