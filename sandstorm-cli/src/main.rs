use anyhow::Result;
use clap::{CommandFactory, Parser};
use colored::Colorize;
use sandstorm_config::{ConfigError, ConfigLoader};
use std::process::ExitCode;

mod cli;
mod commands;

use cli::{Cli, Commands, ConfigCommands};

fn run(cli: Cli) -> Result<ExitCode> {
    let config_path = cli.config.as_deref();
    let log_level = cli.log_level.as_deref();

    match cli.command {
        Some(Commands::Batch(args)) => commands::batch::run(config_path, log_level, &args),
        Some(Commands::Worker(args)) => commands::worker::run(log_level, &args),
        Some(Commands::Drive(args)) => commands::drive::run(config_path, log_level, &args),
        Some(Commands::Config { config_cmd }) => {
            sandstorm_logging::init_simple_tracing(log_level.unwrap_or("warn"))?;
            match config_cmd {
                ConfigCommands::Validate { config_file } => commands::config::validate(&config_file),
                ConfigCommands::Show { format } => commands::config::show(config_path, &format),
                ConfigCommands::Generate { output, force } => {
                    commands::config::generate(&output, force)
                }
            }
        }
        None => {
            let mut cmd = Cli::command();
            cmd.print_help()?;
            println!();
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn main() -> ExitCode {
    ConfigLoader::load_dotenv();
    let cli = Cli::parse();

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            if let Some(config_error) = e.downcast_ref::<ConfigError>() {
                eprintln!("{}", "Configuration error:".red().bold());
                for message in config_error.messages() {
                    eprintln!("  - {}", message);
                }
            } else {
                eprintln!("{} {:#}", "Error:".red().bold(), e);
            }
            ExitCode::FAILURE
        }
    }
}
