//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Capture Sim - sensor scheduling and deferred report engine
#[derive(Parser, Debug)]
#[command(
    name = "capture-sim",
    author,
    version,
    about = "Sensor capture scheduling and dataset reporting",
    long_about = "Drives a simulated clock from a capture blueprint.\n\n\
                  Registers the configured sensors, decides which of them capture on \n\
                  every frame, reports captures, annotations and metrics, and hands \n\
                  completed frames to the configured sinks."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "CAPTURE_SIM_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "CAPTURE_SIM_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a simulated capture session
    Run(RunArgs),

    /// Validate configuration file without running
    Validate(ValidateArgs),

    /// Display configuration information
    Info(InfoArgs),
}

/// Arguments for the `run` command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Path to configuration file (TOML or JSON)
    #[arg(
        short,
        long,
        default_value = "capture.toml",
        env = "CAPTURE_SIM_CONFIG"
    )]
    pub config: PathBuf,

    /// Override the maximum number of simulated frames (0 = keep configuration)
    #[arg(long, default_value = "0", env = "CAPTURE_SIM_MAX_FRAMES")]
    pub max_frames: u64,

    /// Override the default frame delta time in seconds
    #[arg(long, env = "CAPTURE_SIM_DELTA_TIME")]
    pub delta_time: Option<f64>,

    /// Frames an async annotation stays pending before it is resolved
    #[arg(long, default_value = "2", env = "CAPTURE_SIM_ASYNC_DELAY")]
    pub async_delay: u64,

    /// Sleep for each frame's delta time instead of running as fast as possible
    #[arg(long)]
    pub realtime: bool,

    /// Run timeout in seconds (0 = no timeout)
    #[arg(long, default_value = "0", env = "CAPTURE_SIM_TIMEOUT")]
    pub timeout: u64,

    /// Validate configuration and exit without running
    #[arg(long)]
    pub dry_run: bool,

    /// Channel buffer size between the capture thread and the dispatcher
    #[arg(long, default_value = "1024", env = "CAPTURE_SIM_BUFFER_SIZE")]
    pub buffer_size: usize,

    /// Metrics server port (0 = disabled)
    #[arg(long, default_value = "0", env = "CAPTURE_SIM_METRICS_PORT")]
    pub metrics_port: u16,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "capture.toml")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "capture.toml")]
    pub config: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Show detailed sensor information
    #[arg(long)]
    pub sensors: bool,

    /// Show annotation and metric definitions
    #[arg(long)]
    pub definitions: bool,

    /// Show sink configuration
    #[arg(long)]
    pub sinks: bool,
}

/// Log output format
#[derive(ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_run_overrides() {
        let cli = Cli::parse_from([
            "capture-sim",
            "-v",
            "run",
            "--config",
            "demo.json",
            "--max-frames",
            "50",
            "--delta-time",
            "0.05",
        ]);

        assert_eq!(cli.verbose, 1);
        let Commands::Run(args) = cli.command else {
            panic!("expected run command");
        };
        assert_eq!(args.config, PathBuf::from("demo.json"));
        assert_eq!(args.max_frames, 50);
        assert_eq!(args.delta_time, Some(0.05));
        assert_eq!(args.async_delay, 2);
    }

    #[test]
    fn quiet_conflicts_with_verbose() {
        let result = Cli::try_parse_from(["capture-sim", "-q", "-v", "validate"]);
        assert!(result.is_err());
    }
}
