use clap::Parser;
use scanline::cli::{self, Cli, Commands, LogFormat};
use scanline::{config, errors};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(!cli.no_color);
    match cli.log_format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Text => subscriber.init(),
    }

    let config_path = cli.config.as_deref();
    let result = match cli.command {
        Commands::Serve(args) => cli::serve::handle_serve(args, config_path).await,
        Commands::Ingest(args) => cli::ingest::handle_ingest(args, config_path).await,
        Commands::Status(args) => cli::status::handle_status(args, config_path).await,
        Commands::Replay(args) => cli::replay::handle_replay(args, config_path).await,
        Commands::Purge(args) => cli::purge::handle_purge(args, config_path).await,
        Commands::Validate(args) => handle_validate(args).await,
    };

    match result {
        Ok(()) => {}
        Err(e) => {
            eprintln!("Error: {}", e);
            let exit_code = match &e {
                errors::ScanlineError::Config(_) | errors::ScanlineError::Yaml(_) => 2,
                errors::ScanlineError::Database(_) => 3,
                errors::ScanlineError::InvalidEvent(_) => 5,
                _ => 1,
            };
            std::process::exit(exit_code);
        }
    }
}

async fn handle_validate(args: cli::commands::ValidateArgs) -> Result<(), errors::ScanlineError> {
    let path = std::path::PathBuf::from(&args.file);
    let config = config::parse_config(&path).await?;
    println!("Configuration is valid: {}", args.file);
    println!(
        "  store: {}  scan visibility: {}s  max receives: {}  notifier: {:?}",
        config.store.path,
        config.queues.scan.visibility_timeout_secs,
        config.queues.scan.max_receive_count,
        config.notifier.kind
    );
    Ok(())
}
