//! Offline-first sync engine for handsync.
//!
//! Collected data waits on the device until the server acknowledges it:
//! - Key/value log entries, uploaded one POST per entry
//! - Registered files, uploaded through resumable sessions that survive
//!   restarts and resume from the last byte the server confirmed
//! - Server directives (credential changes, prompt sets, package updates),
//!   executed and acknowledged one at a time
//!
//! A foreground recorder can pause the engine at any time through a
//! [`PauseSignal`]; the engine notices within one chunk and stops the cycle.

pub mod api_client;
pub mod chunks;
pub mod config;
pub mod context;
pub mod credential_manager;
pub mod directives;
pub mod error;
pub mod pause;
pub mod prompts;
pub mod sync_engine;
pub mod types;
pub mod upload_session;

pub use api_client::ApiClient;
pub use config::SyncConfig;
pub use context::SyncContext;
pub use credential_manager::{Credential, CredentialManager};
pub use directives::{
    ApkInfo, Directive, DirectiveBatch, DirectiveExecutor, DirectiveOp, DirectiveRun,
    NullInstaller, PackageInstaller,
};
pub use error::{SyncError, SyncResult};
pub use pause::PauseSignal;
pub use prompts::{Prompt, PromptCache, Prompts};
pub use sync_engine::SyncEngine;
pub use types::*;
pub use upload_session::{SessionOutcome, Stage, StageOutcome, UploadSession, UploadTransport};

/// Current UTC time as ISO-8601 with millisecond precision, e.g. `2024-05-01T12:00:00.123Z`.
pub(crate) fn iso_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
