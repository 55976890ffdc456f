use clap::Subcommand;

use super::run::RunArgs;
use super::serve::ServeArgs;
use super::validate::ValidateArgs;

#[derive(Subcommand, Clone)]
pub enum Commands {
    /// Execute a flow definition and print the final execution record
    Run(RunArgs),

    /// Check a flow definition without running it
    Validate(ValidateArgs),

    /// Start the HTTP server (execution API, event streams, flow routes)
    Serve(ServeArgs),
}

impl Commands {
    pub fn name(&self) -> &'static str {
        match self {
            Commands::Run(_) => "run",
            Commands::Validate(_) => "validate",
            Commands::Serve(_) => "serve",
        }
    }
}
