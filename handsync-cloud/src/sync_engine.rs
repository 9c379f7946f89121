//! Sync orchestrator.
//!
//! One cycle runs three stages in order:
//! - directives fetched from the server
//! - the pending key/value entries
//! - the registered files, one resumable upload session each
//!
//! A failing stage does not prevent the next one from running; a pause
//! ends the cycle right away. Scheduling cycles is up to the caller.

use crate::context::SyncContext;
use crate::directives::{DirectiveExecutor, DirectiveRun, PackageInstaller};
use crate::error::{SyncError, SyncResult};
use crate::pause::PauseSignal;
use crate::types::{CycleReport, StageStatus, SyncProgress};
use crate::upload_session::{SessionOutcome, UploadSession};
use handsync_storage::{DrainReport, DrainStep};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Runs sync cycles against one [`SyncContext`].
pub struct SyncEngine {
    ctx: Arc<SyncContext>,
    installer: Arc<dyn PackageInstaller>,
    /// Held for the duration of a cycle.
    cycle: Mutex<()>,
}

impl SyncEngine {
    pub fn new(ctx: Arc<SyncContext>, installer: Arc<dyn PackageInstaller>) -> Self {
        Self {
            ctx,
            installer,
            cycle: Mutex::new(()),
        }
    }

    pub fn context(&self) -> &SyncContext {
        &self.ctx
    }

    /// Runs one full cycle, reporting each item to `progress` before it is attempted.
    ///
    /// Fails with [`SyncError::CycleInProgress`] if another cycle is running
    /// and with [`SyncError::AuthRequired`] if no account exists.
    pub async fn sync_once<P>(&self, pause: &PauseSignal, mut progress: P) -> SyncResult<CycleReport>
    where
        P: FnMut(SyncProgress) + Send,
    {
        let _cycle = self
            .cycle
            .try_lock()
            .map_err(|_| SyncError::CycleInProgress)?;
        if !self.ctx.has_account().await {
            warn!("no login token present, cannot sync");
            return Err(SyncError::AuthRequired);
        }

        let mut report = CycleReport {
            directives: StageStatus::Skipped,
            key_values: StageStatus::Skipped,
            files: StageStatus::Skipped,
        };

        progress(SyncProgress::Directives);
        report.directives = self.run_directives(pause).await;
        if report.directives == StageStatus::Paused {
            info!("cycle paused during directives");
            return Ok(report);
        }

        report.key_values = self.drain_key_values(pause, &mut progress).await;
        if report.key_values == StageStatus::Paused {
            info!("cycle paused during key/value upload");
            return Ok(report);
        }

        report.files = self.drain_files(pause, &mut progress).await;
        if report.is_success() {
            info!("sync cycle complete");
        } else {
            info!("sync cycle ended early: {report:?}");
        }
        Ok(report)
    }

    async fn run_directives(&self, pause: &PauseSignal) -> StageStatus {
        let executor = DirectiveExecutor::new(&self.ctx, self.installer.as_ref());
        match executor.run(pause).await {
            Ok(DirectiveRun::Completed { executed }) => {
                debug!("{executed} directives executed");
                StageStatus::Completed
            }
            Ok(DirectiveRun::StoppedForCredentialChange { executed }) => {
                info!("credential changed after {executed} directives");
                StageStatus::Stopped
            }
            Ok(DirectiveRun::Failed { id, .. }) => StageStatus::Failed(format!("directive {id}")),
            Err(SyncError::Paused) => StageStatus::Paused,
            Err(e) => {
                warn!("unable to run directives: {e}");
                StageStatus::Failed(e.to_string())
            }
        }
    }

    async fn drain_key_values<P>(&self, pause: &PauseSignal, progress: &mut P) -> StageStatus
    where
        P: FnMut(SyncProgress) + Send,
    {
        let api = self.ctx.api();
        let result: SyncResult<DrainReport> = self
            .ctx
            .key_values()
            .drain(move |at, entry| {
                progress(SyncProgress::KeyValue {
                    index: at.index + 1,
                    total: at.total,
                });
                async move {
                    pause.check()?;
                    debug!("uploading key {:?}", entry.key);
                    match api.save(&entry.key, &entry.value).await {
                        Ok(()) => Ok(DrainStep::Acknowledged),
                        Err(e) => {
                            warn!("unable to upload key {:?}, will try again later: {e}", entry.key);
                            Ok(DrainStep::Failed)
                        }
                    }
                }
            })
            .await;
        stage_status("key/value", result)
    }

    async fn drain_files<P>(&self, pause: &PauseSignal, progress: &mut P) -> StageStatus
    where
        P: FnMut(SyncProgress) + Send,
    {
        let ctx: &SyncContext = &self.ctx;
        let result: SyncResult<DrainReport> = ctx
            .files()
            .drain(move |at, record| {
                progress(SyncProgress::File {
                    index: at.index + 1,
                    total: at.total,
                    path: record.relative_path.clone(),
                });
                async move {
                    let path = record.relative_path.clone();
                    let mut session = UploadSession::new(
                        ctx.api(),
                        ctx.files(),
                        record,
                        &ctx.config().data_dir,
                        ctx.config().chunk_size_bytes,
                    );
                    match session.run(pause).await {
                        Ok(SessionOutcome::Verified | SessionOutcome::Abandoned) => {
                            Ok(DrainStep::Acknowledged)
                        }
                        Ok(SessionOutcome::Deferred) => Ok(DrainStep::Deferred),
                        Ok(SessionOutcome::Failed) => Ok(DrainStep::Failed),
                        Err(SyncError::Paused) => Err(SyncError::Paused),
                        Err(e) => {
                            error!("{path}: upload failed: {e}");
                            Ok(DrainStep::Failed)
                        }
                    }
                }
            })
            .await;
        stage_status("file", result)
    }
}

fn stage_status(stage: &str, result: SyncResult<DrainReport>) -> StageStatus {
    match result {
        Ok(report) if report.completed() => {
            debug!(
                "{stage} drain: {} of {} acknowledged",
                report.acknowledged, report.total
            );
            StageStatus::Completed
        }
        Ok(report) => {
            info!("{stage} drain stopped at item {:?}", report.failed_at);
            StageStatus::Incomplete(report)
        }
        Err(SyncError::Paused) => StageStatus::Paused,
        Err(e) => {
            error!("{stage} drain failed: {e}");
            StageStatus::Failed(e.to_string())
        }
    }
}
