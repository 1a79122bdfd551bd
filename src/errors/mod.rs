pub mod types;
pub mod classification;
pub mod retry;

pub use types::ScanlineError;
pub use classification::{ErrorClassification, FailureClass};
pub use retry::{RedriveDecision, RedrivePolicy, RetryConfig, with_retry};
