use std::path::PathBuf;

use action_flow::{FlowDefinition, Severity};
use anyhow::{bail, Context, Result};
use clap::Args;

#[derive(Args, Clone, Debug)]
pub struct ValidateArgs {
    /// Flow definition file (.json, .yaml or .yml)
    #[arg(short, long, value_name = "FILE")]
    pub flow: PathBuf,
}

pub async fn cmd_validate(args: ValidateArgs) -> Result<()> {
    let flow = FlowDefinition::load(&args.flow)
        .await
        .with_context(|| format!("Failed to load flow {}", args.flow.display()))?;
    let report = flow.validate();

    for finding in &report.findings {
        let label = match finding.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        match &finding.node_id {
            Some(node_id) => println!("{} [{}]: {}", label, node_id, finding.message),
            None => println!("{}: {}", label, finding.message),
        }
    }

    if !report.is_valid() {
        bail!(
            "Flow '{}' is invalid ({} error(s))",
            flow.display_name(),
            report.errors().count()
        );
    }
    println!(
        "Flow '{}' is valid: {} nodes, {} edges",
        flow.display_name(),
        flow.nodes.len(),
        flow.edges.len()
    );
    Ok(())
}
