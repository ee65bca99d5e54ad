mod cli;

use clap::Parser;

use cli::{Cli, CliContext, default_command, execute};
use dslink_broker::config::{ConfigManager, EnvConfigManager};

#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let context = CliContext::new(ConfigManager(EnvConfigManager::new(cli.env_file.clone())));
    execute(&context, cli.command.unwrap_or_else(default_command)).await
}
