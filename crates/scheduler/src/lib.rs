pub mod api;
pub mod error;
pub mod executor;
pub mod history;
pub mod model;
pub mod security;

pub use api::{CommandHandler, CommandRegistry, SessionContext};
pub use error::{ExecError, ExecResult};
pub use executor::SessionExecutor;
pub use history::{CommandRecord, EventHistory};
pub use model::{ExecutorConfig, SessionState};
pub use security::SecurityPolicy;
