pub mod bootstrap;
pub mod commands;
pub mod errors;
pub mod handlers;
pub mod payload;
pub mod policy;
pub mod protocol;
pub mod routes;
pub mod state;
pub mod trace;

pub use bootstrap::WebDriverBridge;
pub use commands::{builtin_registry, DriverServices};
pub use errors::{BridgeError, BridgeResult};
pub use policy::{WebDriverBridgePolicy, WebDriverBridgePolicyHandle};
pub use routes::{route_to_command_name, ALL_COMMANDS, METHOD_MAP, NO_SESSION_ID_COMMANDS};
pub use state::SessionStore;
