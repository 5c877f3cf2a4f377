//! Operator-facing CLI over a local data directory: mint the first state
//! token for a workflow, feed it back to resume or advance a run, and seed a
//! demo workflow definition to try the loop end to end.
//!
//! Usage:
//!   $ meridian seed-demo --data-dir ./data
//!   $ meridian start --data-dir ./data --workflow demo
//!   $ meridian continue --data-dir ./data --state-token st.v1... --ack-token ack.v1...

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use meridian_orchestrator::{
    ContinueRequest, LocalFileWorkflowProvider, OutputNote, Orchestrator,
};
use meridian_types::{StepDefinition, WorkflowDefinition};

#[derive(Parser)]
#[command(
    name = "meridian",
    version = env!("CARGO_PKG_VERSION"),
    about = "Meridian – a durable, token-orchestrated workflow execution engine",
    propagate_version = true
)]
struct Cli {
    /// Root directory holding sessions, stores, and the signing keyring.
    #[arg(long, global = true, default_value = "./meridian-data")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a new run of a workflow, minting its first state/ack/checkpoint tokens.
    Start {
        /// The workflow id to resolve via the local file provider.
        workflow: String,
        /// JSON object merged in as the run's initial context.
        #[arg(long)]
        context: Option<String>,
    },
    /// Rehydrate or advance a run using the tokens from a prior call.
    Continue {
        /// The state token from `start` or a previous `continue`.
        #[arg(long)]
        state_token: String,
        /// The ack token acknowledging the pending step; omit to rehydrate.
        #[arg(long)]
        ack_token: Option<String>,
        /// JSON object merged in as the step's context.
        #[arg(long)]
        context: Option<String>,
        /// Free-text notes attached to the node being left.
        #[arg(long)]
        notes: Option<String>,
    },
    /// Write a small two-step demo workflow into the data directory.
    SeedDemo,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init()
        .ok();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start { workflow, context } => run_start(&cli.data_dir, &workflow, context),
        Commands::Continue {
            state_token,
            ack_token,
            context,
            notes,
        } => run_continue(&cli.data_dir, state_token, ack_token, context, notes),
        Commands::SeedDemo => run_seed_demo(&cli.data_dir),
    }
}

fn orchestrator(data_dir: &PathBuf) -> Result<Orchestrator<LocalFileWorkflowProvider>> {
    Orchestrator::new(data_dir, LocalFileWorkflowProvider::at(data_dir))
        .map_err(anyhow::Error::from)
        .context("failed to open the Meridian data directory")
}

fn parse_context(raw: Option<String>) -> Result<Option<serde_json::Value>> {
    raw.map(|s| serde_json::from_str(&s).context("--context must be valid JSON"))
        .transpose()
}

fn run_start(data_dir: &PathBuf, workflow: &str, context: Option<String>) -> Result<()> {
    let orc = orchestrator(data_dir)?;
    let context = parse_context(context)?;
    let response = orc
        .start_workflow(workflow, context)
        .map_err(anyhow::Error::from)
        .context("start_workflow failed")?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

fn run_continue(
    data_dir: &PathBuf,
    state_token: String,
    ack_token: Option<String>,
    context: Option<String>,
    notes: Option<String>,
) -> Result<()> {
    let orc = orchestrator(data_dir)?;
    let context = parse_context(context)?;
    let request = ContinueRequest {
        state_token,
        ack_token,
        context,
        output: notes.map(|notes_markdown| OutputNote { notes_markdown }),
    };
    let response = orc
        .continue_workflow(request)
        .map_err(anyhow::Error::from)
        .context("continue_workflow failed")?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

fn run_seed_demo(data_dir: &PathBuf) -> Result<()> {
    let definition = WorkflowDefinition {
        id: "demo".to_string(),
        name: "Two-step demo".to_string(),
        version: "1".to_string(),
        steps: vec![
            StepDefinition {
                step_id: "gather_context".to_string(),
                title: "Gather context".to_string(),
                prompt: "Summarize the repository the agent is operating in.".to_string(),
                require_confirmation: None,
                run_condition: None,
                loop_config: None,
            },
            StepDefinition {
                step_id: "propose_change".to_string(),
                title: "Propose a change".to_string(),
                prompt: "Draft the change and wait for the user to confirm it.".to_string(),
                require_confirmation: Some(true),
                run_condition: None,
                loop_config: None,
            },
        ],
    };
    meridian_orchestrator::write_workflow_file(data_dir, &definition)
        .map_err(anyhow::Error::from)
        .context("failed to write the demo workflow")?;
    println!("wrote workflow 'demo' to {}", data_dir.join("workflows").join("demo.json").display());
    Ok(())
}
