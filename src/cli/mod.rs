//! CLI subcommand definitions and handlers.
//!
//! Uses clap derive to define the subcommand hierarchy:
//! - `start` (default) -- start the vote server
//! - `config show|path` -- inspect configuration
//! - `version` -- print build/version info

use clap::{Parser, Subcommand};

use crate::config;

/// Poll voting server with live tally updates.
#[derive(Parser, Debug)]
#[command(
    name = "pollcast",
    version = env!("CARGO_PKG_VERSION"),
    about = "pollcast: one vote per user per poll, live results over WebSocket"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Start the server (default when no subcommand is given).
    Start,

    /// Inspect configuration.
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Print version, build date, and git commit information.
    Version,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Print the fully loaded configuration as JSON.
    Show,

    /// Print the resolved configuration file path.
    Path,
}

/// Run the `config show` subcommand.
pub fn handle_config_show() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = config::load_config()?;
    println!("{}", serde_json::to_string_pretty(&cfg)?);
    Ok(())
}

/// Run the `config path` subcommand.
pub fn handle_config_path() {
    match config::config_path() {
        Some(path) => println!("{}", path.display()),
        None => println!("(no config directory; using defaults)"),
    }
}

/// Run the `version` subcommand.
pub fn handle_version() {
    println!("pollcast {}", env!("CARGO_PKG_VERSION"));
    println!("  Build date: {}", env!("POLLCAST_BUILD_DATE"));
    println!("  Git commit: {}", env!("POLLCAST_GIT_HASH"));
    println!(
        "  Platform:   {} ({})",
        std::env::consts::OS,
        std::env::consts::ARCH
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_subcommand_means_start() {
        let cli = Cli::try_parse_from(["pollcast"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_parse_subcommands() {
        let cli = Cli::try_parse_from(["pollcast", "config", "show"]).unwrap();
        assert_eq!(cli.command, Some(Command::Config(ConfigCommand::Show)));

        let cli = Cli::try_parse_from(["pollcast", "config", "path"]).unwrap();
        assert_eq!(cli.command, Some(Command::Config(ConfigCommand::Path)));

        let cli = Cli::try_parse_from(["pollcast", "version"]).unwrap();
        assert_eq!(cli.command, Some(Command::Version));
    }

    #[test]
    fn test_unknown_subcommand_is_rejected() {
        assert!(Cli::try_parse_from(["pollcast", "status"]).is_err());
    }
}
