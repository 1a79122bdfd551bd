use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "scanline", version, about = "Event-driven container image vulnerability scan pipeline")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase log verbosity (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Log output format
    #[arg(long, value_enum, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// YAML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the pipeline workers, the read API and the trigger endpoint
    Serve(ServeArgs),
    /// Record a trigger event from a JSON file as a pending scan job
    Ingest(IngestArgs),
    /// Show job counts by state and dead-letter depths
    Status(StatusArgs),
    /// Re-ingest dead-lettered images and clear them from the dead-letter queue
    Replay(ReplayArgs),
    /// Delete records past their retention deadline
    Purge(PurgeArgs),
    /// Validate a configuration file
    Validate(ValidateArgs),
}

#[derive(Args, Clone)]
pub struct ServeArgs {
    /// Listen port (overrides api.port)
    #[arg(long)]
    pub port: Option<u16>,

    /// Listen address (overrides api.bind)
    #[arg(long)]
    pub host: Option<String>,

    /// SQLite database path (overrides store.path)
    #[arg(long)]
    pub db: Option<String>,
}

#[derive(Args, Clone)]
pub struct IngestArgs {
    /// Trigger event JSON file, or "-" for stdin
    pub file: String,

    /// SQLite database path (overrides store.path)
    #[arg(long)]
    pub db: Option<String>,
}

#[derive(Args, Clone)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// SQLite database path (overrides store.path)
    #[arg(long)]
    pub db: Option<String>,
}

#[derive(Args, Clone)]
pub struct ReplayArgs {
    /// Dead-letter queue to drain: scan or inspect
    #[arg(long)]
    pub queue: String,

    /// List what would be replayed without changing anything
    #[arg(long)]
    pub dry_run: bool,

    /// SQLite database path (overrides store.path)
    #[arg(long)]
    pub db: Option<String>,
}

#[derive(Args, Clone)]
pub struct PurgeArgs {
    /// SQLite database path (overrides store.path)
    #[arg(long)]
    pub db: Option<String>,
}

#[derive(Args, Clone)]
pub struct ValidateArgs {
    /// Path to YAML config file
    #[arg(value_name = "CONFIG")]
    pub file: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_replay_with_global_flags() {
        let cli = Cli::try_parse_from([
            "scanline", "-vv", "--log-format", "json", "replay", "--queue", "scan", "--config", "scanline.yaml",
        ]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.log_format, LogFormat::Json);
        assert_eq!(cli.config.as_deref(), Some("scanline.yaml"));
        match cli.command {
            Commands::Replay(args) => {
                assert_eq!(args.queue, "scan");
                assert!(!args.dry_run);
            }
            _ => panic!("expected replay"),
        }
    }
}
