pub mod diff;
pub mod ingest;
pub mod inspect;
pub mod notify;
pub mod reconcile;
pub mod redrive;
pub mod runtime;
pub mod scan;
pub mod state;

pub use ingest::{IngestOutcome, IngestStage, IngestTrigger, TriggerEvent};
pub use inspect::InspectStage;
pub use notify::NotifyStage;
pub use reconcile::{ChangeSignal, ReconcileOutcome, ReconcileStage, SweepReport};
pub use redrive::Disposition;
pub use runtime::{PipelineRuntime, QueueStatus, RecoveryReport};
pub use scan::ScanStage;
pub use state::{JobState, Trigger};
