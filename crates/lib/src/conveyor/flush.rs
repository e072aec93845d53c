//! Project-wide removal of cached stages.

use tracing::{info, warn};

use super::Conveyor;
use super::types::{ConveyorError, FlushReport};
use crate::lock::images_lock_name;

impl Conveyor {
  /// Remove every entry of the project's stages storage.
  ///
  /// Runs under the project images lock so two flushes never interleave.
  pub async fn flush_stages(&self) -> Result<FlushReport, ConveyorError> {
    let storage = &self.backends.storage;
    let _token = self
      .backends
      .locks
      .acquire(&images_lock_name(&self.config.project), self.options.lock_timeout)
      .await?;

    let mut report = FlushReport {
      storage: storage.describe(),
      removed: Vec::new(),
    };
    for signature in storage.list().await? {
      if storage.remove(&signature).await? {
        report.removed.push(signature);
      } else {
        warn!(signature = %signature.short(), "stage vanished during flush");
      }
    }

    info!(
      project = %self.config.project,
      storage = %report.storage,
      removed = report.removed.len(),
      "flushed stages storage"
    );
    Ok(report)
  }
}
