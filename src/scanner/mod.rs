pub mod trivy;

pub use trivy::TrivyScanner;

use async_trait::async_trait;
use crate::errors::ScanlineError;
use crate::models::finding::RawFinding;
use crate::models::image::ImageRef;

/// The vulnerability scanning engine seam.
///
/// Implementations report failures as `ScannerTimeout`, `RegistryPull`,
/// `Throttled` or `Scanner` (all transient) or `UnknownImage` (final).
#[async_trait]
pub trait ScanEngine: Send + Sync {
    fn name(&self) -> &str;

    async fn scan(&self, image: &ImageRef) -> Result<Vec<RawFinding>, ScanlineError>;
}
