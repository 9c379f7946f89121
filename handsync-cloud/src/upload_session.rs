//! Resumable upload of one registered file.
//!
//! A session walks the file's [`FileUploadRecord`] through its stages:
//!
//! 1. `Digest`: MD5 and size of the local file
//! 2. `Link`: upload link from the server
//! 3. `Session`: resumable session link from the upload link
//! 4. `Query`: how many bytes the session already holds
//! 5. `Transfer`: stream the remaining bytes
//! 6. `Verify`: server confirms the object, local file is deleted
//!
//! Each stage returns a [`StageOutcome`] and a single driver loop decides
//! what to do with it. The record is saved only after the step it reflects
//! has succeeded, so a restart resumes at the last acknowledged stage.

use crate::chunks::digest_file;
use crate::error::{SyncError, SyncResult};
use crate::pause::PauseSignal;
use crate::types::{SessionState, TransferOutcome, VerifyOutcome};
use async_trait::async_trait;
use handsync_crypto::Md5Hex;
use handsync_storage::{FileRegistry, FileUploadRecord};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Server calls the upload session needs.
#[async_trait]
pub trait UploadTransport: Send + Sync {
    /// `POST /upload`; returns the upload link.
    async fn request_upload_link(
        &self,
        relative_path: &str,
        md5: &Md5Hex,
        file_size: u64,
    ) -> SyncResult<String>;

    /// Opens a resumable session on `upload_link`; returns the session link.
    async fn start_session(&self, upload_link: &str, md5: &Md5Hex) -> SyncResult<String>;

    /// Asks the session how many bytes it holds.
    async fn query_session(&self, session_link: &str, file_size: u64) -> SyncResult<SessionState>;

    /// Streams `file[offset..file_size]` to the session.
    async fn upload_range(
        &self,
        session_link: &str,
        file: &Path,
        offset: u64,
        file_size: u64,
        pause: &PauseSignal,
    ) -> SyncResult<TransferOutcome>;

    /// `POST /verify`.
    async fn verify_upload(
        &self,
        relative_path: &str,
        md5: &Md5Hex,
        file_size: u64,
    ) -> SyncResult<VerifyOutcome>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Digest,
    Link,
    Session,
    Query,
    Transfer { offset: u64 },
    Verify,
}

/// Result of running one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    Advance(Stage),
    /// Keep the saved progress and try again next cycle.
    Retry,
    /// Discard all progress and try again next cycle.
    Reset,
    /// The file is verified and gone.
    Terminal,
}

/// How a session attempt ended, from the registry's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Uploaded, verified and deleted locally.
    Verified,
    /// Progress was unusable and has been reset; other files may continue.
    Deferred,
    /// The file can never be uploaded (missing or empty) and should be dropped.
    Abandoned,
    /// Stopped at a stage; progress up to the last acknowledged stage is saved.
    Failed,
}

pub struct UploadSession<'a, T: UploadTransport + ?Sized> {
    transport: &'a T,
    registry: &'a FileRegistry,
    record: FileUploadRecord,
    file: PathBuf,
    chunk_size: usize,
}

impl<'a, T: UploadTransport + ?Sized> UploadSession<'a, T> {
    /// A session for `record`, whose file lives under `data_dir`.
    pub fn new(
        transport: &'a T,
        registry: &'a FileRegistry,
        record: FileUploadRecord,
        data_dir: &Path,
        chunk_size: usize,
    ) -> Self {
        let file = data_dir.join(&record.relative_path);
        Self {
            transport,
            registry,
            record,
            file,
            chunk_size,
        }
    }

    pub fn record(&self) -> &FileUploadRecord {
        &self.record
    }

    /// Drives the file as far as it will go this cycle.
    ///
    /// Returns `Err(SyncError::Paused)` if the pause signal interrupts.
    pub async fn run(&mut self, pause: &PauseSignal) -> SyncResult<SessionOutcome> {
        pause.check()?;
        let path = self.record.relative_path.clone();

        if let Some(md5) = &self.record.md5 {
            if Md5Hex::parse(md5).is_err() {
                error!("{path}: stored md5 {md5:?} is invalid, starting over");
                self.record.reset();
                self.persist()?;
                return Ok(SessionOutcome::Deferred);
            }
        }

        let mut stage = if self.record.upload_completed {
            if self.record.upload_verified {
                info!("{path}: already verified");
                self.delete_local_file().await;
                return Ok(SessionOutcome::Verified);
            }
            info!("{path}: upload already completed");
            Stage::Verify
        } else {
            match self.prepare_size(&path).await? {
                Some(outcome) => return Ok(outcome),
                None => self.first_pending_stage(),
            }
        };

        loop {
            pause.check()?;
            debug!("{path}: stage {stage:?}");
            let outcome = match stage {
                Stage::Digest => self.digest(pause).await?,
                Stage::Link => self.acquire_upload_link().await?,
                Stage::Session => self.acquire_session_link().await?,
                Stage::Query => self.query_session().await?,
                Stage::Transfer { offset } => self.transfer(offset, pause).await?,
                Stage::Verify => self.verify().await?,
            };
            match outcome {
                StageOutcome::Advance(next) => stage = next,
                StageOutcome::Retry => {
                    info!("{path}: will retry {stage:?} next cycle");
                    return Ok(SessionOutcome::Failed);
                }
                StageOutcome::Reset => {
                    warn!("{path}: discarding upload progress");
                    self.record.reset();
                    self.persist()?;
                    return Ok(SessionOutcome::Failed);
                }
                StageOutcome::Terminal => return Ok(SessionOutcome::Verified),
            }
        }
    }

    /// Checks the local file against the recorded size. `Some` ends the attempt.
    async fn prepare_size(&mut self, path: &str) -> SyncResult<Option<SessionOutcome>> {
        let actual = match tokio::fs::metadata(&self.file).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("{path}: registered but missing on disk, abandoning it");
                return Ok(Some(SessionOutcome::Abandoned));
            }
            Err(e) => return Err(e.into()),
        };

        match self.record.file_size {
            None if actual == 0 => {
                error!("{path}: file is empty, abandoning it");
                Ok(Some(SessionOutcome::Abandoned))
            }
            None => {
                self.record.file_size = Some(actual);
                Ok(None)
            }
            Some(expected) if expected != actual => {
                warn!("{path}: size changed from {expected} to {actual}, starting over");
                self.record.reset();
                self.persist()?;
                Ok(Some(SessionOutcome::Deferred))
            }
            Some(_) => Ok(None),
        }
    }

    fn first_pending_stage(&self) -> Stage {
        if self.record.md5.is_none() {
            Stage::Digest
        } else if self.record.upload_link.is_none() {
            Stage::Link
        } else if self.record.session_link.is_none() {
            Stage::Session
        } else {
            Stage::Query
        }
    }

    async fn digest(&mut self, pause: &PauseSignal) -> SyncResult<StageOutcome> {
        let expected = self.file_size()?;
        let (md5, bytes) = digest_file(&self.file, self.chunk_size, pause).await?;
        if bytes != expected {
            warn!(
                "{}: size changed while digesting ({expected} -> {bytes})",
                self.record.relative_path
            );
            return Ok(StageOutcome::Reset);
        }
        info!("{}: md5 {md5}", self.record.relative_path);
        self.record.md5 = Some(md5.into());
        self.persist()?;
        Ok(StageOutcome::Advance(Stage::Link))
    }

    async fn acquire_upload_link(&mut self) -> SyncResult<StageOutcome> {
        let md5 = self.md5()?;
        let size = self.file_size()?;
        match self
            .transport
            .request_upload_link(&self.record.relative_path, &md5, size)
            .await
        {
            Ok(link) => {
                debug!("{}: upload link {link}", self.record.relative_path);
                self.record.upload_link = Some(link);
                self.persist()?;
                Ok(StageOutcome::Advance(Stage::Session))
            }
            Err(e) => self.retry_after("upload link", e),
        }
    }

    async fn acquire_session_link(&mut self) -> SyncResult<StageOutcome> {
        let md5 = self.md5()?;
        let upload_link = required(&self.record.upload_link, "upload link")?;
        match self.transport.start_session(&upload_link, &md5).await {
            Ok(session) => {
                debug!("{}: session link {session}", self.record.relative_path);
                self.record.session_link = Some(session);
                self.persist()?;
                // A session that was just opened holds nothing yet.
                Ok(StageOutcome::Advance(Stage::Transfer { offset: 0 }))
            }
            Err(e) => self.retry_after("session link", e),
        }
    }

    async fn query_session(&mut self) -> SyncResult<StageOutcome> {
        let size = self.file_size()?;
        let session = required(&self.record.session_link, "session link")?;
        match self.transport.query_session(&session, size).await {
            Ok(SessionState::Complete) => {
                info!("{}: server already has every byte", self.record.relative_path);
                self.record.upload_completed = true;
                self.persist()?;
                Ok(StageOutcome::Advance(Stage::Verify))
            }
            Ok(SessionState::Partial { offset }) if offset >= size => {
                warn!(
                    "{}: session reports {offset} of {size} bytes but is not complete",
                    self.record.relative_path
                );
                Ok(StageOutcome::Reset)
            }
            Ok(SessionState::Partial { offset }) => {
                info!("{}: {offset} of {size} bytes already uploaded", self.record.relative_path);
                Ok(StageOutcome::Advance(Stage::Transfer { offset }))
            }
            Ok(SessionState::Broken) => {
                warn!("{}: session link is broken", self.record.relative_path);
                Ok(StageOutcome::Reset)
            }
            Err(SyncError::Protocol(msg)) => {
                warn!("{}: {msg}", self.record.relative_path);
                Ok(StageOutcome::Reset)
            }
            Err(e) => self.retry_after("session query", e),
        }
    }

    async fn transfer(&mut self, offset: u64, pause: &PauseSignal) -> SyncResult<StageOutcome> {
        let size = self.file_size()?;
        let session = required(&self.record.session_link, "session link")?;
        match self
            .transport
            .upload_range(&session, &self.file, offset, size, pause)
            .await
        {
            Ok(TransferOutcome::Completed) => {
                info!("{}: upload completed", self.record.relative_path);
                self.record.upload_completed = true;
                self.persist()?;
                Ok(StageOutcome::Advance(Stage::Verify))
            }
            Ok(TransferOutcome::Rejected(status)) => {
                warn!("{}: upload rejected with {status}", self.record.relative_path);
                Ok(StageOutcome::Reset)
            }
            Ok(TransferOutcome::Incomplete(status)) => {
                info!("{}: upload ended with {status}", self.record.relative_path);
                Ok(StageOutcome::Retry)
            }
            Err(e) => self.retry_after("upload", e),
        }
    }

    async fn verify(&mut self) -> SyncResult<StageOutcome> {
        let md5 = self.md5()?;
        let size = self.file_size()?;
        match self
            .transport
            .verify_upload(&self.record.relative_path, &md5, size)
            .await
        {
            Ok(VerifyOutcome::Verified) => {
                info!("{}: verified", self.record.relative_path);
                self.record.upload_verified = true;
                self.persist()?;
                self.delete_local_file().await;
                Ok(StageOutcome::Terminal)
            }
            Ok(VerifyOutcome::NotVerified) => {
                info!("{}: not verified yet", self.record.relative_path);
                Ok(StageOutcome::Retry)
            }
            Ok(VerifyOutcome::FileNotFound) => {
                warn!(
                    "{}: server lost the upload, querying the session again",
                    self.record.relative_path
                );
                self.record.reset_completion();
                self.persist()?;
                Ok(StageOutcome::Retry)
            }
            Ok(VerifyOutcome::Unavailable(status)) => {
                warn!("{}: verify returned {status}", self.record.relative_path);
                Ok(StageOutcome::Retry)
            }
            Err(e) => self.retry_after("verify", e),
        }
    }

    fn retry_after(&self, step: &str, err: SyncError) -> SyncResult<StageOutcome> {
        if err.is_paused() {
            return Err(err);
        }
        warn!("{}: {step} failed: {err}", self.record.relative_path);
        Ok(StageOutcome::Retry)
    }

    async fn delete_local_file(&self) {
        match tokio::fs::remove_file(&self.file).await {
            Ok(()) => info!("deleted {}", self.file.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => error!("failed to delete {}: {e}", self.file.display()),
        }
    }

    fn persist(&self) -> SyncResult<()> {
        self.registry.save(&self.record)?;
        Ok(())
    }

    fn md5(&self) -> SyncResult<Md5Hex> {
        let md5 = required(&self.record.md5, "md5")?;
        Ok(Md5Hex::parse(&md5)?)
    }

    fn file_size(&self) -> SyncResult<u64> {
        self.record
            .file_size
            .ok_or_else(|| SyncError::InvalidState("file size unknown".to_string()))
    }
}

fn required(field: &Option<String>, name: &str) -> SyncResult<String> {
    field
        .clone()
        .ok_or_else(|| SyncError::InvalidState(format!("{name} missing")))
}
