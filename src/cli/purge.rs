use chrono::Utc;
use tracing::info;
use crate::cli::commands::PurgeArgs;
use crate::errors::ScanlineError;

pub async fn handle_purge(args: PurgeArgs, config_path: Option<&str>) -> Result<(), ScanlineError> {
    let config = super::load(config_path).await?;
    let db = super::open_database(&config, args.db.as_deref())?;

    let report = db.purge_expired(Utc::now())?;
    info!(records = report.records, images = report.images, kept_open = report.kept_open, "Expired records purged");
    println!("Purged {} record(s), {} image(s)", report.records, report.images);
    if report.kept_open > 0 {
        println!("Kept {} expired image(s) with a job still open", report.kept_open);
    }
    Ok(())
}
