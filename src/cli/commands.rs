use clap::Subcommand;

use super::routes::ResolveArgs;
use super::serve::ServeArgs;

#[derive(Subcommand, Clone)]
pub enum Commands {
    /// Run the WebDriver server until Ctrl+C
    Serve(ServeArgs),

    /// Print the command a request resolves to
    Resolve(ResolveArgs),

    /// List every route pattern with its methods and commands
    Routes,
}
