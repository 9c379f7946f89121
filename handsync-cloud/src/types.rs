//! Shared types for sync operations.

use handsync_storage::DrainReport;
use reqwest::header::HeaderMap;
use serde::Deserialize;

/// A fully read server response.
#[derive(Clone, Debug)]
pub struct ServerReply {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: String,
}

impl ServerReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// A response header as text, if present and valid ASCII.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Parses the body as JSON, naming `endpoint` in the error.
    pub fn json<T: serde::de::DeserializeOwned>(&self, endpoint: &str) -> crate::SyncResult<T> {
        serde_json::from_str(&self.body).map_err(|e| {
            crate::SyncError::Protocol(format!("malformed response from {endpoint}: {e}"))
        })
    }
}

/// Body of a successful `/upload` call.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadLinkResponse {
    pub upload_link: String,
}

/// Body of a `/verify` call. A 2xx carries `verified`; a 503 may carry
/// `fileNotFound`.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub file_not_found: bool,
}

/// What the server reports about a resumable session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// The server holds every byte.
    Complete,
    /// The server holds bytes `[0, offset)`.
    Partial { offset: u64 },
    /// The session link no longer works.
    Broken,
}

/// How a streamed range upload ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferOutcome {
    /// 2xx: the server has the whole file.
    Completed,
    /// 4xx/5xx: the session must be discarded.
    Rejected(u16),
    /// Any other status; the server keeps what it acknowledged.
    Incomplete(u16),
}

/// What `/verify` reported.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VerifyOutcome {
    Verified,
    NotVerified,
    /// 503 with `fileNotFound`: the bucket has no object for this upload.
    FileNotFound,
    Unavailable(u16),
}

/// Progress events reported to the caller of a sync cycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncProgress {
    Directives,
    /// Uploading key/value entry `index` (1-based) of `total`.
    KeyValue { index: usize, total: usize },
    /// Uploading file `index` (1-based) of `total`.
    File {
        index: usize,
        total: usize,
        path: String,
    },
}

/// How one stage of a cycle ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StageStatus {
    /// Every item was handled.
    Completed,
    /// A credential change stopped directive processing; the rest are
    /// fetched under the new credential next cycle.
    Stopped,
    /// A drain stopped at a failing item.
    Incomplete(DrainReport),
    Failed(String),
    Paused,
    /// Not reached because the cycle was paused earlier.
    Skipped,
}

impl StageStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, StageStatus::Completed | StageStatus::Stopped)
    }
}

/// Outcome of one [`SyncEngine::sync_once`](crate::SyncEngine::sync_once) call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CycleReport {
    pub directives: StageStatus,
    pub key_values: StageStatus,
    pub files: StageStatus,
}

impl CycleReport {
    /// True only if every stage completed without a pause or failure.
    pub fn is_success(&self) -> bool {
        self.directives.is_success() && self.key_values.is_success() && self.files.is_success()
    }

    pub fn was_paused(&self) -> bool {
        [&self.directives, &self.key_values, &self.files]
            .iter()
            .any(|s| matches!(s, StageStatus::Paused))
    }
}
