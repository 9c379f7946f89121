//! Login credential lifecycle.
//!
//! The credential file holds a single derived login token. It is read once,
//! lazily, by whichever caller needs it first; concurrent first callers
//! wait on the same load rather than racing to read the file.

use crate::error::{SyncError, SyncResult};
use handsync_crypto::username_of;
use std::path::{Path, PathBuf};
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info, warn};

/// A derived login token and the username it embeds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    pub login_token: String,
}

impl Credential {
    /// Parses a stored or server-issued login token (`"<username>:<hash>"`).
    pub fn from_token(token: &str) -> SyncResult<Self> {
        let login_token = token.trim().to_string();
        let username = username_of(&login_token)?.to_string();
        Ok(Self {
            username,
            login_token,
        })
    }
}

/// Owns the credential file and the in-process copy of it.
pub struct CredentialManager {
    path: PathBuf,
    cached: OnceCell<RwLock<Option<Credential>>>,
}

impl CredentialManager {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            cached: OnceCell::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn slot(&self) -> &RwLock<Option<Credential>> {
        self.cached
            .get_or_init(|| async { RwLock::new(load_credential(&self.path).await) })
            .await
    }

    /// The active credential, if an account exists on this device.
    pub async fn current(&self) -> Option<Credential> {
        self.slot().await.read().await.clone()
    }

    /// The active login token, or `AuthRequired`.
    pub async fn login_token(&self) -> SyncResult<String> {
        self.current()
            .await
            .map(|c| c.login_token)
            .ok_or(SyncError::AuthRequired)
    }

    pub async fn has_account(&self) -> bool {
        self.current().await.is_some()
    }

    pub async fn username(&self) -> Option<String> {
        self.current().await.map(|c| c.username)
    }

    /// Overwrites the credential file without touching the in-memory copy.
    pub async fn persist(&self, credential: &Credential) -> SyncResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, credential.login_token.as_bytes()).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!("persisted credential for {}", credential.username);
        Ok(())
    }

    /// Swaps the in-memory credential used by subsequent requests.
    pub async fn activate(&self, credential: Credential) {
        info!("active user is now {}", credential.username);
        *self.slot().await.write().await = Some(credential);
    }

    /// Persists and activates in one step.
    pub async fn install(&self, credential: Credential) -> SyncResult<()> {
        self.persist(&credential).await?;
        self.activate(credential).await;
        Ok(())
    }

    /// Deletes the credential file and forgets the active credential.
    pub async fn logout(&self) -> SyncResult<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        *self.slot().await.write().await = None;
        info!("logged out");
        Ok(())
    }
}

async fn load_credential(path: &Path) -> Option<Credential> {
    match tokio::fs::read_to_string(path).await {
        Ok(raw) => match Credential::from_token(&raw) {
            Ok(credential) => Some(credential),
            Err(e) => {
                warn!("ignoring malformed credential file {}: {e}", path.display());
                None
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("no login token at {}", path.display());
            None
        }
        Err(e) => {
            warn!("unable to read login token {}: {e}", path.display());
            None
        }
    }
}
