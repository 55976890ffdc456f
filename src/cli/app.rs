use anyhow::Result;
use clap::Parser;
use tracing::{debug, error, info};

use super::commands::Commands;
use super::context::CliContext;
use super::env::CliArgs;
use super::runtime::{
    apply_runtime_overrides, init_logging, load_config, load_local_env_overrides, LoadedConfig,
};
use super::{cmd_run, cmd_serve, cmd_validate};

/// Entry point of the `flowpilot` binary.
pub async fn run() -> Result<()> {
    load_local_env_overrides();
    let args = CliArgs::parse();
    init_logging(&args.log_level, args.debug)?;
    crate::metrics::register_metrics();

    debug!(
        version = env!("CARGO_PKG_VERSION"),
        git = env!("GIT_HASH"),
        built = env!("BUILD_DATE"),
        "flowpilot starting"
    );

    let LoadedConfig {
        config,
        path,
        from_file,
    } = load_config(args.config.as_ref()).await?;
    apply_runtime_overrides(&config);
    let cli = CliContext::new(config, path);
    if from_file {
        info!(config = %cli.config_path().display(), "using configuration file");
    }

    let command = args.command.name();
    let outcome = match args.command {
        Commands::Run(run) => cmd_run(run, &cli).await,
        Commands::Validate(validate) => cmd_validate(validate).await,
        Commands::Serve(serve) => cmd_serve(serve, &cli).await,
    };

    if let Err(err) = &outcome {
        error!(command, "command failed: {:#}", err);
    }
    outcome
}
