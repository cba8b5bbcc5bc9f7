//! CLI argument parsing definitions

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Set the log level (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a load-test batch
    Batch(BatchArgs),

    /// Run one worker's share of a batch (internal use)
    #[command(hide = true)]
    Worker(WorkerArgs),

    /// Drive a single existing sandbox through a list of actions
    Drive(DriveArgs),

    /// Configuration management commands
    Config {
        #[command(subcommand)]
        config_cmd: ConfigCommands,
    },
}

#[derive(Args, Debug, Default)]
pub struct BatchArgs {
    /// Number of sandboxes to run
    #[arg(long, value_name = "N")]
    pub units: Option<usize>,

    /// Number of worker processes
    #[arg(long, value_name = "N")]
    pub processes: Option<usize>,

    /// Blocking pool size per process
    #[arg(long, value_name = "N")]
    pub thread_pool_size: Option<usize>,

    /// Install from the pre-mounted APK instead of uploading
    #[arg(long)]
    pub use_pre_mounted_assets: bool,

    /// Root directory for task output
    #[arg(long, value_name = "PATH")]
    pub output_dir: Option<PathBuf>,

    /// Use the in-process simulated provider and devices
    #[arg(long)]
    pub simulate: bool,
}

#[derive(Args, Debug)]
pub struct WorkerArgs {
    /// Config snapshot written by the coordinator
    #[arg(long, value_name = "PATH")]
    pub config_snapshot: PathBuf,

    /// First unit id of this worker
    #[arg(long, value_name = "N")]
    pub unit_offset: usize,

    /// Number of units this worker runs
    #[arg(long, value_name = "N")]
    pub unit_count: usize,

    /// Worker output directory
    #[arg(long, value_name = "PATH")]
    pub output_dir: PathBuf,
}

#[derive(Args, Debug, Default)]
pub struct DriveArgs {
    /// Sandbox to connect to
    #[arg(long, value_name = "ID", required_unless_present = "list_actions")]
    pub sandbox_id: Option<String>,

    /// Comma-separated actions, run in order
    #[arg(long, value_name = "LIST", value_delimiter = ',', required_unless_present = "list_actions")]
    pub action: Vec<String>,

    /// Print the available actions and exit
    #[arg(long)]
    pub list_actions: bool,

    /// Local APK for upload_app
    #[arg(long, value_name = "PATH")]
    pub apk_path: Option<PathBuf>,

    #[arg(long, value_name = "X")]
    pub tap_x: Option<u32>,

    #[arg(long, value_name = "Y")]
    pub tap_y: Option<u32>,

    /// Text for input_text
    #[arg(long, value_name = "TEXT")]
    pub text: Option<String>,

    #[arg(long, value_name = "DEG", allow_negative_numbers = true)]
    pub latitude: Option<f64>,

    #[arg(long, value_name = "DEG", allow_negative_numbers = true)]
    pub longitude: Option<f64>,

    #[arg(long, value_name = "METERS", allow_negative_numbers = true)]
    pub altitude: Option<f64>,

    #[arg(long, value_name = "PX")]
    pub width: Option<u32>,

    #[arg(long, value_name = "PX")]
    pub height: Option<u32>,

    #[arg(long, value_name = "DPI")]
    pub dpi: Option<u32>,

    /// URL for open_browser
    #[arg(long, value_name = "URL")]
    pub url: Option<String>,

    /// Command line for the shell action
    #[arg(long, value_name = "CMD")]
    pub shell_cmd: Option<String>,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Validate a configuration file
    Validate {
        /// Path to the configuration file
        #[arg(long, value_name = "PATH")]
        config_file: PathBuf,
    },

    /// Show the effective configuration, secrets masked
    Show {
        /// Output format: yaml, json
        #[arg(long, value_name = "FORMAT", default_value = "yaml")]
        format: String,
    },

    /// Generate a sample configuration file
    Generate {
        /// Output file path
        #[arg(long, value_name = "PATH")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_drive_actions_split_on_commas() {
        let cli = Cli::parse_from([
            "sandstorm",
            "drive",
            "--sandbox-id",
            "sbx1",
            "--action",
            "screenshot,tap_screen",
            "--tap-x",
            "10",
        ]);
        match cli.command {
            Some(Commands::Drive(args)) => {
                assert_eq!(args.action, vec!["screenshot", "tap_screen"]);
                assert_eq!(args.tap_x, Some(10));
            }
            _ => panic!("expected drive"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["sandstorm", "batch", "--units", "3", "--log-level", "debug"]);
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert!(matches!(cli.command, Some(Commands::Batch(BatchArgs { units: Some(3), .. }))));
    }
}
