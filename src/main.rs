use clap::Parser;
use std::process::ExitCode;

use pollcast::cli::{self, Cli, Command, ConfigCommand};
use pollcast::{config, logging, server};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command.unwrap_or(Command::Start) {
        Command::Start => start().await,
        Command::Config(ConfigCommand::Show) => cli::handle_config_show(),
        Command::Config(ConfigCommand::Path) => {
            cli::handle_config_path();
            Ok(())
        }
        Command::Version => {
            cli::handle_version();
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn start() -> Result<(), Box<dyn std::error::Error>> {
    let config = config::load_config()?;
    logging::init_logging(&config.logging)?;
    server::run(config).await?;
    Ok(())
}
