use std::sync::Arc;
use chrono::Utc;
use tokio::io::AsyncReadExt;
use tracing::{info, warn};
use crate::cli::commands::IngestArgs;
use crate::errors::ScanlineError;
use crate::notify::LogNotifier;
use crate::pipeline::ingest::{record, Recorded, TriggerEvent};
use crate::pipeline::{NotifyStage, ReconcileStage, Trigger};

/// Write the trigger's jobs to the store. They stay `Pending` and unpublished
/// until a running server recovers or rescans them.
pub async fn handle_ingest(args: IngestArgs, config_path: Option<&str>) -> Result<(), ScanlineError> {
    let config = super::load(config_path).await?;
    let db = super::open_database(&config, args.db.as_deref())?;

    let content = if args.file == "-" {
        let mut buf = String::new();
        tokio::io::stdin().read_to_string(&mut buf).await?;
        buf
    } else {
        tokio::fs::read_to_string(&args.file).await?
    };
    let value: serde_json::Value = serde_json::from_str(&content)
        .map_err(|e| ScanlineError::InvalidEvent(format!("{}: {}", args.file, e)))?;

    let now = Utc::now();
    let (images, trigger) = match TriggerEvent::from_json(&value)? {
        TriggerEvent::Push { images, .. } => (images, Trigger::RegistryPush),
        TriggerEvent::Schedule { .. } => {
            let reconcile = ReconcileStage::new(
                db.clone(),
                NotifyStage::new(Arc::new(LogNotifier)),
                config.schedule.clone(),
                config.retention.clone(),
            );
            (reconcile.rescan_due(now)?, Trigger::ScheduledRescan)
        }
        TriggerEvent::Ignored { reason } => {
            warn!(reason = %reason, "Event ignored");
            println!("Ignored: {}", reason);
            return Ok(());
        }
    };

    for image in &images {
        match record(&db, image, trigger, now)? {
            Recorded::Created(job) => {
                info!(job_id = %job.job_id, digest = %job.digest, "Scan job recorded");
                println!("created  {}  {}", job.job_id, image);
            }
            Recorded::Open(job) => println!("open     {}  {} ({})", job.job_id, image, job.state),
        }
    }
    println!("{} image(s) recorded", images.len());
    Ok(())
}
