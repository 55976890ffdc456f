use std::path::PathBuf;
use std::sync::Arc;

use action_flow::FlowDefinition;
use anyhow::{bail, Context, Result};
use clap::Args;
use flowpilot_core_types::ExecutionStatus;
use flowpilot_state_center::ExecutionRecord;
use serde_json::{Map, Value};
use tracing::warn;

use super::context::CliContext;
use super::output::{render, OutputFormat};

#[derive(Args, Clone, Debug)]
pub struct RunArgs {
    /// Flow definition file (.json, .yaml or .yml)
    #[arg(short, long, value_name = "FILE")]
    pub flow: PathBuf,

    /// Variable override (key=value, repeatable). Values that parse as JSON keep their type.
    #[arg(long = "var", value_name = "KEY=VALUE")]
    pub vars: Vec<String>,

    /// Force headless mode
    #[arg(long, conflicts_with = "headed")]
    pub headless: bool,

    /// Force a visible browser window
    #[arg(long)]
    pub headed: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value = "human")]
    pub output: OutputFormat,
}

pub async fn cmd_run(args: RunArgs, cli: &CliContext) -> Result<()> {
    let mut flow = FlowDefinition::load(&args.flow)
        .await
        .with_context(|| format!("Failed to load flow {}", args.flow.display()))?;
    let report = flow.validate();
    for finding in report.warnings() {
        warn!(node_id = ?finding.node_id, "{}", finding.message);
    }
    report.into_result()?;

    if args.headless {
        flow.browser_settings.headless = true;
    } else if args.headed {
        flow.browser_settings.headless = false;
    }
    let variables = parse_vars(&args.vars)?;

    let app = cli.app_context();
    let engine = Arc::clone(app.engine());
    let context = engine.create_context(&flow);
    let execution_id = context.execution_id.to_string();

    let stopper = {
        let engine = Arc::clone(&engine);
        let execution_id = execution_id.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!(execution_id = %execution_id, "interrupt received; stopping execution");
                engine.stop_execution(&execution_id).await;
            }
        })
    };
    let outcome = engine.execute(&flow, context, variables).await;
    stopper.abort();
    let record = outcome?;

    match render(&record, args.output)? {
        Some(text) => println!("{}", text),
        None => print_human(&record)?,
    }

    if record.status != ExecutionStatus::Completed {
        bail!(
            "Execution {} {}: {}",
            record.execution_id,
            record.status,
            record.error.as_deref().unwrap_or("no error message")
        );
    }
    Ok(())
}

/// Parse repeated `key=value` overrides.
pub fn parse_vars(raw: &[String]) -> Result<Map<String, Value>> {
    let mut variables = Map::new();
    for entry in raw {
        let Some((key, value)) = entry.split_once('=') else {
            bail!("Invalid --var '{}': expected key=value", entry);
        };
        let key = key.trim();
        if key.is_empty() {
            bail!("Invalid --var '{}': empty key", entry);
        }
        let value = serde_json::from_str::<Value>(value)
            .unwrap_or_else(|_| Value::String(value.to_string()));
        variables.insert(key.to_string(), value);
    }
    Ok(variables)
}

fn print_human(record: &ExecutionRecord) -> Result<()> {
    println!(
        "Execution {} (flow {}): {}",
        record.execution_id, record.flow_id, record.status
    );
    if let Some(ms) = record.duration_ms() {
        println!("  duration: {} ms", ms);
    }
    println!("  log entries: {}", record.execution_log.len());
    for entry in &record.execution_log {
        let ok = entry
            .result
            .get("success")
            .and_then(Value::as_bool)
            .unwrap_or(true);
        println!(
            "    {} {:<16} {}",
            if ok { "ok  " } else { "FAIL" },
            entry.action,
            entry.node_id
        );
    }
    if let Some(error) = &record.error {
        println!("  error: {}", error);
    }
    if let Some(results) = &record.results {
        println!("Results:");
        println!("{}", serde_json::to_string_pretty(results)?);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn vars_keep_json_types() {
        let vars = parse_vars(&[
            "count=3".to_string(),
            "name=rust lang".to_string(),
            "flags=[1,2]".to_string(),
            "empty=".to_string(),
        ])
        .unwrap();
        assert_eq!(vars["count"], json!(3));
        assert_eq!(vars["name"], json!("rust lang"));
        assert_eq!(vars["flags"], json!([1, 2]));
        assert_eq!(vars["empty"], json!(""));
    }

    #[test]
    fn vars_without_separator_are_rejected() {
        assert!(parse_vars(&["novalue".to_string()]).is_err());
        assert!(parse_vars(&["=x".to_string()]).is_err());
    }
}
