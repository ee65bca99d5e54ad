use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub mod run;
pub mod schema;

use run::RunArgs;
use schema::SchemaArgs;

use dslink_broker::config::ConfigManager;

#[derive(Parser, Debug)]
#[command(
    name = "dsbroker",
    about = "Request multiplexing broker for path-addressed links",
    version = "0.1.0"
)]
pub struct Cli {
    /// Load settings from this .env file before reading the environment
    #[arg(long, global = true)]
    pub env_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve one link over stdin/stdout
    Run(RunArgs),

    /// Emit JSON‐Schema for the link wire types
    Schema(SchemaArgs),
}

#[derive(Clone, Debug)]
pub struct CliContext {
    pub config_manager: ConfigManager,
}

impl CliContext {
    pub fn new(config_manager: ConfigManager) -> Self {
        Self { config_manager }
    }
}

pub async fn execute(context: &CliContext, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Run(args) => run::execute(args, context).await,
        Commands::Schema(args) => schema::execute(args, context).await,
    }
}

pub fn default_command() -> Commands {
    Commands::Run(RunArgs::default_runtime())
}
