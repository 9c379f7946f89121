//! Everything a sync cycle shares, opened once at startup.

use crate::api_client::ApiClient;
use crate::config::SyncConfig;
use crate::credential_manager::{Credential, CredentialManager};
use crate::directives::ApkInfo;
use crate::error::{SyncError, SyncResult};
use crate::prompts::PromptCache;
use handsync_crypto::{derive_login_token, generate_device_id, generate_password, validate_username};
use handsync_storage::{open_database, FileRegistry, KeyValueStore, PreferenceStore};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};

const DEVICE_ID_KEY: &str = "uid";

/// Stores, credentials and the server client for one data directory.
pub struct SyncContext {
    config: SyncConfig,
    credentials: Arc<CredentialManager>,
    api: ApiClient,
    key_values: KeyValueStore,
    files: FileRegistry,
    preferences: PreferenceStore,
    prompts: PromptCache,
    device_id: OnceCell<String>,
}

impl SyncContext {
    /// Opens the database under `config.data_dir` and builds the client.
    pub fn open(config: SyncConfig) -> SyncResult<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.data_dir)?;

        let conn = open_database(&config.database_path())?;
        let key_values = KeyValueStore::open_with_conn(conn.clone())?;
        let files = FileRegistry::open_with_conn(conn.clone())?;
        let preferences = PreferenceStore::open_with_conn(conn)?;

        let credentials = Arc::new(CredentialManager::new(config.credential_file()));
        let api = ApiClient::new(config.clone(), Arc::clone(&credentials))?;
        let prompts = PromptCache::new(config.data_dir.clone(), preferences.clone());

        info!("sync context opened at {}", config.data_dir.display());
        Ok(Self {
            config,
            credentials,
            api,
            key_values,
            files,
            preferences,
            prompts,
            device_id: OnceCell::new(),
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn credentials(&self) -> &CredentialManager {
        &self.credentials
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn key_values(&self) -> &KeyValueStore {
        &self.key_values
    }

    pub fn files(&self) -> &FileRegistry {
        &self.files
    }

    pub fn preferences(&self) -> &PreferenceStore {
        &self.preferences
    }

    pub fn prompts(&self) -> &PromptCache {
        &self.prompts
    }

    // ── Identity ──

    /// Random per-install id, generated on first use and then persisted.
    pub async fn device_id(&self) -> SyncResult<String> {
        let id = self
            .device_id
            .get_or_try_init(|| async {
                let candidate = generate_device_id();
                let stored = self.preferences.get_or_insert(DEVICE_ID_KEY, &candidate)?;
                Ok::<_, SyncError>(stored)
            })
            .await?;
        Ok(id.clone())
    }

    pub async fn has_account(&self) -> bool {
        self.credentials.has_account().await
    }

    pub async fn username(&self) -> Option<String> {
        self.credentials.username().await
    }

    /// Registers a new account with a random password and makes it active.
    ///
    /// The credential file is only written once the server accepted it.
    pub async fn create_account(&self, username: &str, admin_password: &str) -> SyncResult<Credential> {
        validate_username(username)?;
        info!("creating account for {username}");

        let password = generate_password();
        let login_token = derive_login_token(username, &password);
        let admin_token = derive_login_token("admin", admin_password);
        self.api.register_login(&admin_token, &login_token).await?;

        let credential = Credential::from_token(&login_token)?;
        self.credentials.install(credential.clone()).await?;
        Ok(credential)
    }

    pub async fn logout(&self) -> SyncResult<()> {
        self.credentials.logout().await
    }

    // ── Producers ──

    /// Queues `message` under `log-<now>`; returns the key.
    pub fn log_event(&self, message: &str) -> SyncResult<String> {
        let timestamp = crate::iso_timestamp();
        self.log_event_at(&timestamp, message)?;
        Ok(format!("log-{timestamp}"))
    }

    pub fn log_event_at(&self, timestamp: &str, message: &str) -> SyncResult<()> {
        self.add_key_value(&format!("log-{timestamp}"), message)
    }

    /// Queues a key/value entry. Re-adding a key replaces its pending value.
    pub fn add_key_value(&self, key: &str, value: &str) -> SyncResult<()> {
        debug!("storing key {key:?}");
        self.key_values.add(key, value)?;
        Ok(())
    }

    /// Registers a finished file (relative to `data_dir`) for upload.
    pub fn register_file(&self, relative_path: &str) -> SyncResult<bool> {
        info!("registering {relative_path} for upload");
        Ok(self.files.register(relative_path)?)
    }

    // ── Package bookkeeping ──

    /// Records a successful package install reported by the host installer.
    pub fn record_package_installed(&self, apk: &ApkInfo) -> SyncResult<()> {
        let now = crate::iso_timestamp();
        self.preferences.set_many(&[
            ("apkDownloadMd5", apk.md5.as_str()),
            ("apkTimestamp", apk.timestamp.as_str()),
            ("apkDownloadTimestamp", now.as_str()),
            ("apkInstallTimestamp", now.as_str()),
        ])?;
        self.log_event(&format!("apk installed at timestamp {now}"))?;
        Ok(())
    }
}
