use std::path::PathBuf;

use clap::Parser;

use super::commands::Commands;

/// Run, validate and serve browser automation flows.
#[derive(Parser)]
#[command(name = "flowpilot", author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct CliArgs {
    /// Configuration file (defaults to config/config.yaml, then the user config dir)
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Log level when RUST_LOG is unset
    #[arg(
        short,
        long,
        default_value = "info",
        global = true,
        value_parser = ["trace", "debug", "info", "warn", "error"]
    )]
    pub log_level: String,

    /// Shorthand for --log-level debug
    #[arg(short, long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        CliArgs::command().debug_assert();
    }

    #[test]
    fn global_flags_follow_subcommands() {
        let args = CliArgs::try_parse_from([
            "flowpilot",
            "validate",
            "--flow",
            "f.json",
            "--log-level",
            "warn",
        ])
        .unwrap();
        assert_eq!(args.log_level, "warn");
        assert_eq!(args.command.name(), "validate");
        assert!(CliArgs::try_parse_from(["flowpilot", "-l", "loud", "validate", "-f", "x"]).is_err());
    }
}
