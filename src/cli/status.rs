use serde_json::json;
use crate::cli::commands::StatusArgs;
use crate::errors::ScanlineError;
use crate::models::message::QueueName;
use crate::pipeline::JobState;

pub async fn handle_status(args: StatusArgs, config_path: Option<&str>) -> Result<(), ScanlineError> {
    let config = super::load(config_path).await?;
    let db = super::open_database(&config, args.db.as_deref())?;

    let counts = db.job_state_counts()?;
    let count_of = |state: JobState| {
        counts.iter().find(|(s, _)| *s == state).map(|(_, n)| *n).unwrap_or(0)
    };
    let scan_dlq = db.dead_letter_depth(QueueName::Scan)?;
    let inspect_dlq = db.dead_letter_depth(QueueName::Inspect)?;

    if args.json {
        let jobs: serde_json::Map<String, serde_json::Value> = JobState::ALL
            .iter()
            .map(|state| (state.to_string(), json!(count_of(*state))))
            .collect();
        let status = json!({
            "jobs": jobs,
            "dead_letters": { "scan": scan_dlq, "inspect": inspect_dlq },
            "images": db.list_images()?.len(),
            "sequence": db.current_sequence()?,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("Jobs:");
    for state in JobState::ALL {
        println!("  {:<14} {}", state.as_str(), count_of(state));
    }
    println!("Dead letters:");
    println!("  {:<14} {}", "scan", scan_dlq);
    println!("  {:<14} {}", "inspect", inspect_dlq);
    Ok(())
}
