//! Validate command - checks a workflow definition without running it

use std::path::PathBuf;

use clap::Args;
use tracing::info;

use crate::domain::WorkflowValidator;

/// Arguments for the validate command
#[derive(Args, Clone)]
pub struct ValidateArgs {
    /// Workflow definition (JSON)
    pub file: PathBuf,
}

/// Print the validation result as JSON; invalid workflows are an error
pub async fn run(args: ValidateArgs) -> anyhow::Result<()> {
    super::bootstrap();

    let workflow = super::load_workflow(&args.file)?;
    let result = WorkflowValidator::validate(&workflow);

    info!(
        workflow_id = %workflow.id(),
        errors = result.errors.len(),
        warnings = result.warnings.len(),
        "Validated workflow"
    );

    println!("{}", serde_json::to_string_pretty(&result)?);

    if !result.valid {
        anyhow::bail!(
            "Workflow '{}' is invalid ({} errors)",
            workflow.id(),
            result.errors.len()
        );
    }

    Ok(())
}
