//! Shared drain loop for the pending queues.
//!
//! A drain walks a snapshot of the queue in order and hands each item to
//! an uploader. The uploader's verdict decides what happens to the item:
//! acknowledged items are removed, deferred items stay for the next cycle,
//! and the first failure stops the walk so nothing after it is attempted.

use crate::error::StorageError;
use std::future::Future;

/// Verdict returned by the uploader for one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainStep {
    /// The server acknowledged the item; remove it and continue.
    Acknowledged,
    /// Leave the item queued but move on to the next one.
    Deferred,
    /// Leave the item queued and stop this drain.
    Failed,
}

/// Position of the item being handed to the uploader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainProgress {
    /// Zero-based index within the snapshot.
    pub index: usize,
    /// Snapshot size.
    pub total: usize,
}

/// Summary of one drain pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub total: usize,
    pub acknowledged: usize,
    pub deferred: usize,
    /// Index of the item whose upload failed, if the drain stopped early.
    pub failed_at: Option<usize>,
}

impl DrainReport {
    /// True when no item failed. Deferred items still count as completed.
    pub fn completed(&self) -> bool {
        self.failed_at.is_none()
    }

    /// True when the snapshot was fully acknowledged.
    pub fn fully_acknowledged(&self) -> bool {
        self.acknowledged == self.total
    }
}

pub(crate) async fn drain_snapshot<T, F, Fut, E, A>(
    items: Vec<T>,
    mut upload_one: F,
    mut acknowledge: A,
) -> Result<DrainReport, E>
where
    T: Clone,
    F: FnMut(DrainProgress, T) -> Fut,
    Fut: Future<Output = Result<DrainStep, E>>,
    A: FnMut(&T) -> Result<(), StorageError>,
    E: From<StorageError>,
{
    let total = items.len();
    let mut report = DrainReport {
        total,
        ..DrainReport::default()
    };

    for (index, item) in items.into_iter().enumerate() {
        let progress = DrainProgress { index, total };
        match upload_one(progress, item.clone()).await? {
            DrainStep::Acknowledged => {
                acknowledge(&item)?;
                report.acknowledged += 1;
            }
            DrainStep::Deferred => report.deferred += 1,
            DrainStep::Failed => {
                report.failed_at = Some(index);
                break;
            }
        }
    }

    Ok(report)
}
