//! CLI module for the PMP workflow engine
//!
//! Provides subcommands for working with workflow definitions:
//! - `validate`: static checks on a workflow file
//! - `run`: execute a workflow with the built-in step handlers

pub mod run;
pub mod validate;

use std::path::Path;

use anyhow::Context;
use clap::{Parser, Subcommand};

use crate::config::AppConfig;
use crate::domain::Workflow;
use crate::infrastructure::logging;

/// PMP Workflow Engine - Sequential retrieval and LLM pipelines
#[derive(Parser)]
#[command(name = "pmp-workflow")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Validate a workflow definition and print the result
    Validate(validate::ValidateArgs),

    /// Execute a workflow and print the execution record
    Run(run::RunArgs),
}

/// Load `.env`, configuration and logging shared by every command
fn bootstrap() -> AppConfig {
    dotenvy::dotenv().ok();

    let config = AppConfig::load().unwrap_or_default();
    logging::init_logging(&config.logging);
    config
}

fn load_workflow(path: &Path) -> anyhow::Result<Workflow> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read workflow file {}", path.display()))?;

    Workflow::from_json(&json)
        .with_context(|| format!("Failed to parse workflow file {}", path.display()))
}
