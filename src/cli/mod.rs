//! Command-line interface.
//!
//! Every project action is submitted to the scheduler and processed
//! immediately, so each invocation leaves a task record and a ledger entry.

pub mod commands;
pub mod display;
pub mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use console::style;
use std::path::PathBuf;
use uuid::Uuid;

use crate::domain::errors::DomainError;
use crate::infrastructure::config::ConfigLoader;
use crate::infrastructure::logging::{LogConfig, LoggerImpl};
use crate::infrastructure::setup::{initialize_workspace, App, SetupPaths};

use commands::init::InitArgs;

#[derive(Parser)]
#[command(name = "sdlc")]
#[command(about = "Manifest-driven SDLC phase orchestrator", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Configuration file (defaults to .sdlc/config.yaml and .sdlc/local.yaml)
    #[arg(short, long, global = true, env = "SDLC_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the workspace and create a project
    Init(InitArgs),

    /// Run one orchestrator step for a project
    Advance {
        project_id: Uuid,
    },

    /// Approve QA for a project awaiting approval
    ApproveQa {
        project_id: Uuid,
    },

    /// Reject QA and send the project back to coding
    RejectQa {
        project_id: Uuid,

        /// Why QA was rejected
        #[arg(short, long)]
        reason: Option<String>,
    },

    /// Show one project, or list all projects
    Status {
        project_id: Option<Uuid>,
    },

    /// Raise a project's budget ceiling
    Budget {
        project_id: Uuid,

        /// New maximum cost
        #[arg(long)]
        max_cost: f64,
    },

    /// List scheduler tasks
    Tasks {
        /// Only tasks of this project
        #[arg(short, long)]
        project: Option<Uuid>,

        /// Include archived tasks
        #[arg(long)]
        all: bool,

        #[arg(short, long, default_value = "50")]
        limit: i64,
    },

    /// Show a project's ledger
    Ledger {
        project_id: Uuid,
    },

    /// Import legacy manifest documents from a JSON file into the relational store
    Import {
        /// File holding one document or an array of documents
        path: PathBuf,
    },

    /// Import every document of the legacy store into the relational store
    Backfill,

    /// Compare legacy documents with their relational projection
    Validate {
        /// Only this project
        project_id: Option<Uuid>,
    },

    /// Bring the database schema up to date
    Migrate,

    /// Write every manifest to a JSON file
    Export {
        path: PathBuf,
    },
}

/// Load configuration, install logging, and run the command.
pub async fn run(cli: Cli) -> Result<()> {
    let json = cli.json;

    if let Commands::Init(args) = &cli.command {
        if cli.config.is_none() {
            initialize_workspace(&SetupPaths::new()?, args.force)?;
        }
    }

    let config = match &cli.config {
        Some(path) => ConfigLoader::load_from_file(path)?,
        None => ConfigLoader::load()?,
    };
    let _logger = LoggerImpl::init(&LogConfig::from(&config.logging))?;

    if let Commands::Migrate = cli.command {
        return commands::store::migrate(&config, json).await;
    }

    let app = App::build(config).await?;
    match cli.command {
        Commands::Init(args) => commands::init::execute(&app, args, json).await,
        Commands::Advance { project_id } => commands::project::advance(&app, project_id, json).await,
        Commands::ApproveQa { project_id } => commands::project::approve_qa(&app, project_id, json).await,
        Commands::RejectQa { project_id, reason } => {
            commands::project::reject_qa(&app, project_id, reason, json).await
        }
        Commands::Status { project_id } => commands::project::status(&app, project_id, json).await,
        Commands::Budget { project_id, max_cost } => {
            commands::project::budget(&app, project_id, max_cost, json).await
        }
        Commands::Tasks { project, all, limit } => {
            commands::ledger::tasks(&app, project, all, limit, json).await
        }
        Commands::Ledger { project_id } => commands::ledger::history(&app, project_id, json).await,
        Commands::Import { path } => commands::store::import(&app, &path, json).await,
        Commands::Backfill => commands::store::backfill(&app, json).await,
        Commands::Validate { project_id } => commands::store::validate(&app, project_id, json).await,
        Commands::Export { path } => commands::store::export(&app, &path, json).await,
        Commands::Migrate => Ok(()),
    }
}

/// Print an error to stderr, as JSON when requested.
pub fn handle_error(err: &anyhow::Error, json_mode: bool) {
    let kind = err
        .chain()
        .find_map(|cause| cause.downcast_ref::<DomainError>())
        .map_or("error", DomainError::kind);

    if json_mode {
        let causes: Vec<String> = err.chain().skip(1).map(ToString::to_string).collect();
        let value = serde_json::json!({
            "error": err.to_string(),
            "kind": kind,
            "causes": causes,
        });
        eprintln!("{}", serde_json::to_string_pretty(&value).unwrap_or_default());
    } else {
        eprintln!("{} {err:#}", style("error:").red().bold());
    }
}
