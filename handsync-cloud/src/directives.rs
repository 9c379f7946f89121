//! Server-issued directives.
//!
//! The server queues commands for a device; each sync cycle fetches the
//! queue and runs it in order. A directive is acknowledged on its own
//! before the next one starts, so a crash mid-queue repeats at most the
//! directive that was running.

use crate::chunks::digest_file;
use crate::context::SyncContext;
use crate::credential_manager::Credential;
use crate::error::{SyncError, SyncResult};
use crate::pause::PauseSignal;
use async_trait::async_trait;
use handsync_crypto::Md5Hex;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum DirectiveOp {
    Noop,
    ChangeUser,
    UpdateApk,
    DownloadPrompts,
    Unknown(String),
}

impl From<String> for DirectiveOp {
    fn from(op: String) -> Self {
        match op.as_str() {
            "noop" => DirectiveOp::Noop,
            "changeUser" => DirectiveOp::ChangeUser,
            "updateApk" => DirectiveOp::UpdateApk,
            "downloadPrompts" => DirectiveOp::DownloadPrompts,
            _ => DirectiveOp::Unknown(op),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Directive {
    pub id: String,
    pub op: DirectiveOp,
    #[serde(default)]
    pub value: String,
}

/// The package the server currently offers.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ApkInfo {
    pub md5: String,
    pub timestamp: String,
}

/// Body of `/directives`.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct DirectiveBatch {
    pub directives: Vec<Directive>,
    #[serde(default)]
    pub apk: Option<ApkInfo>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChangeUserValue {
    login_token: String,
}

/// Installs a downloaded package on the host platform.
///
/// Installation usually completes out of band; the host reports success
/// through [`SyncContext::record_package_installed`].
#[async_trait]
pub trait PackageInstaller: Send + Sync {
    async fn install(&self, package: &Path, apk: &ApkInfo) -> SyncResult<()>;
}

/// Installer for hosts that cannot install packages. Leaves the download in place.
pub struct NullInstaller;

#[async_trait]
impl PackageInstaller for NullInstaller {
    async fn install(&self, package: &Path, _apk: &ApkInfo) -> SyncResult<()> {
        info!("no installer configured, leaving {}", package.display());
        Ok(())
    }
}

/// How a directive run ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DirectiveRun {
    Completed { executed: usize },
    /// A `changeUser` ran; the remaining directives wait for the next fetch.
    StoppedForCredentialChange { executed: usize },
    Failed { executed: usize, id: String },
}

enum Flow {
    Continue,
    Stop,
}

pub struct DirectiveExecutor<'a> {
    ctx: &'a SyncContext,
    installer: &'a dyn PackageInstaller,
}

impl<'a> DirectiveExecutor<'a> {
    pub fn new(ctx: &'a SyncContext, installer: &'a dyn PackageInstaller) -> Self {
        Self { ctx, installer }
    }

    /// Fetches the directive queue and executes it in order.
    ///
    /// A failing directive stops the run; it is fetched again next cycle.
    pub async fn run(&self, pause: &PauseSignal) -> SyncResult<DirectiveRun> {
        pause.check()?;
        info!("fetching directives");
        let batch = self.ctx.api().fetch_directives().await?;
        info!("{} directives pending", batch.directives.len());

        for (executed, directive) in batch.directives.iter().enumerate() {
            pause.check()?;
            match self.execute(directive, batch.apk.as_ref(), pause).await {
                Ok(Flow::Continue) => {}
                Ok(Flow::Stop) => {
                    return Ok(DirectiveRun::StoppedForCredentialChange {
                        executed: executed + 1,
                    });
                }
                Err(e) if e.is_paused() => return Err(e),
                Err(e) => {
                    error!("directive {} ({:?}) failed: {e}", directive.id, directive.op);
                    return Ok(DirectiveRun::Failed {
                        executed,
                        id: directive.id.clone(),
                    });
                }
            }
        }
        Ok(DirectiveRun::Completed {
            executed: batch.directives.len(),
        })
    }

    async fn execute(
        &self,
        directive: &Directive,
        apk: Option<&ApkInfo>,
        pause: &PauseSignal,
    ) -> SyncResult<Flow> {
        match &directive.op {
            DirectiveOp::Noop => {
                info!("directive {}: noop", directive.id);
            }
            DirectiveOp::ChangeUser => {
                self.change_user(directive).await?;
                return Ok(Flow::Stop);
            }
            DirectiveOp::DownloadPrompts => self.download_prompts(directive).await?,
            DirectiveOp::UpdateApk => {
                let apk = apk.ok_or_else(|| {
                    SyncError::Protocol("updateApk without apk metadata".to_string())
                })?;
                self.update_apk(directive, apk, pause).await?;
            }
            DirectiveOp::Unknown(op) => {
                return Err(SyncError::Protocol(format!("unknown directive op {op:?}")));
            }
        }
        self.ctx.api().directive_completed(&directive.id).await?;
        Ok(Flow::Continue)
    }

    async fn change_user(&self, directive: &Directive) -> SyncResult<()> {
        let value: ChangeUserValue = serde_json::from_str(&directive.value)
            .map_err(|e| SyncError::Protocol(format!("changeUser value: {e}")))?;
        let next = Credential::from_token(&value.login_token)?;
        info!("directive {}: changing user to {}", directive.id, next.username);

        let credentials = self.ctx.credentials();
        credentials.persist(&next).await?;
        // Acknowledged under the credential that received the directive.
        if let Err(e) = self.ctx.api().directive_completed(&directive.id).await {
            warn!("directive {}: acknowledgement failed: {e}", directive.id);
        }
        credentials.activate(next).await;
        Ok(())
    }

    async fn download_prompts(&self, directive: &Directive) -> SyncResult<()> {
        info!("directive {}: downloading prompts", directive.id);
        let json = self.ctx.api().fetch_prompts().await?;
        let path = self.ctx.prompts().install_document(&json).await?;
        info!("directive {}: prompts stored at {path}", directive.id);
        Ok(())
    }

    async fn update_apk(
        &self,
        directive: &Directive,
        apk: &ApkInfo,
        pause: &PauseSignal,
    ) -> SyncResult<()> {
        let expected = Md5Hex::parse(&apk.md5)?;
        let dest = self.package_path(&expected);
        info!("directive {}: downloading package to {}", directive.id, dest.display());

        let size = self.ctx.api().download_apk(&dest, pause).await?;
        let (actual, _) =
            digest_file(&dest, self.ctx.config().chunk_size_bytes, pause).await?;
        if actual != expected {
            let _ = tokio::fs::remove_file(&dest).await;
            return Err(SyncError::Protocol(format!(
                "package digest {actual} does not match {expected}"
            )));
        }
        info!("package {} downloaded ({size} bytes), installing", dest.display());

        self.installer.install(&dest, apk).await?;
        Ok(())
    }

    fn package_path(&self, md5: &Md5Hex) -> PathBuf {
        self.ctx.config().resolve(format!("apk/{md5}.apk"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_batch_with_unknown_op() {
        let batch: DirectiveBatch = serde_json::from_str(
            r#"{"directives":[{"id":"1","op":"noop","value":""},{"id":"2","op":"reboot"}],
                "apk":{"md5":"d41d8cd98f00b204e9800998ecf8427e","timestamp":"t"}}"#,
        )
        .unwrap();
        assert_eq!(batch.directives[0].op, DirectiveOp::Noop);
        assert_eq!(batch.directives[1].op, DirectiveOp::Unknown("reboot".to_string()));
        assert_eq!(batch.directives[1].value, "");
        assert_eq!(batch.apk.unwrap().timestamp, "t");
    }

    #[test]
    fn apk_block_is_optional() {
        let batch: DirectiveBatch = serde_json::from_str(r#"{"directives":[]}"#).unwrap();
        assert!(batch.apk.is_none());
    }
}
