use chrono::Utc;
use tracing::{info, warn};
use crate::cli::commands::ReplayArgs;
use crate::errors::ScanlineError;
use crate::models::image::ImageRef;
use crate::models::message::{DeadLetter, QueueName};
use crate::pipeline::ingest::{record, Recorded};
use crate::pipeline::Trigger;

pub async fn handle_replay(args: ReplayArgs, config_path: Option<&str>) -> Result<(), ScanlineError> {
    let queue = QueueName::parse(&args.queue).ok_or_else(|| {
        ScanlineError::Config(format!("Unknown queue '{}', expected scan or inspect", args.queue))
    })?;
    let config = super::load(config_path).await?;
    let db = super::open_database(&config, args.db.as_deref())?;

    let letters = db.dead_letters(queue)?;
    if letters.is_empty() {
        println!("No dead letters in the {} queue", queue);
        return Ok(());
    }

    let now = Utc::now();
    let mut replayed = 0;
    for letter in &letters {
        let image = match replay_image(&db, letter)? {
            Some(image) => image,
            None => {
                warn!(message_id = %letter.message_id, digest = %letter.digest, "Cannot recover image reference, skipping");
                continue;
            }
        };

        if args.dry_run {
            println!("would replay  {}  ({} deliveries, {})", image, letter.delivery_count,
                letter.last_error.as_deref().unwrap_or("no error recorded"));
            continue;
        }

        match record(&db, &image, Trigger::ManualReplay, now)? {
            Recorded::Created(job) => println!("replayed  {}  job {}", image, job.job_id),
            Recorded::Open(job) => println!("open      {}  job {} ({})", image, job.job_id, job.state),
        }
        db.remove_dead_letter(queue, &letter.message_id)?;
        replayed += 1;
    }

    info!(queue = %queue, replayed, total = letters.len(), "Replay finished");
    Ok(())
}

/// The image record when it still exists, else the reference inside the parked payload.
fn replay_image(db: &crate::db::Database, letter: &DeadLetter) -> Result<Option<ImageRef>, ScanlineError> {
    if let Some(image) = db.get_image(&letter.digest)? {
        return Ok(Some(image.image_ref()));
    }
    Ok(letter.payload.get("image")
        .cloned()
        .and_then(|value| serde_json::from_value(value).ok()))
}
