pub mod app;
pub mod commands;
pub mod dispatch;
pub mod env;
pub mod routes;
pub mod runtime;
pub mod serve;

pub use app::run;
pub use routes::{cmd_resolve, cmd_routes, ResolveArgs};
pub use serve::{cmd_serve, ServeArgs};
