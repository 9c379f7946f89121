//! Shared helpers for tests against a wiremock collection server.

#![allow(dead_code)]

use handsync_cloud::{SyncConfig, SyncContext};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use wiremock::{MockServer, Request};

/// Login token for the account the harness starts with.
pub const ALICE: &str = "alice:c40ee2212e0719723adff295a11dcc310d11edd2e7cbeba0da11957580e43338";

pub struct Harness {
    pub server: MockServer,
    pub dir: TempDir,
    pub ctx: Arc<SyncContext>,
}

impl Harness {
    /// A mock server and a data directory with ALICE logged in.
    pub async fn start() -> Self {
        Self::start_with(Some(ALICE)).await
    }

    pub async fn start_with(token: Option<&str>) -> Self {
        init_tracing();
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let config = SyncConfig::new(server.uri(), dir.path());
        if let Some(token) = token {
            let credential_file = config.credential_file();
            std::fs::create_dir_all(credential_file.parent().unwrap()).unwrap();
            std::fs::write(credential_file, token).unwrap();
        }
        let ctx = Arc::new(SyncContext::open(config).unwrap());
        Self { server, dir, ctx }
    }

    /// Writes `data` at `relative` under the data directory.
    pub fn write_file(&self, relative: &str, data: &[u8]) {
        write_file(self.dir.path(), relative, data);
    }

    pub fn exists(&self, relative: &str) -> bool {
        self.dir.path().join(relative).exists()
    }

    /// A link on the mock server, as the server would hand out.
    pub fn link(&self, path: &str) -> String {
        format!("{}{}", self.server.uri(), path)
    }

    /// Requests received at `path`, in arrival order.
    pub async fn requests_to(&self, path: &str) -> Vec<Request> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|r| r.url.path() == path)
            .collect()
    }
}

pub fn write_file(root: &Path, relative: &str, data: &[u8]) {
    let path = root.join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, data).unwrap();
}

/// Decodes an `application/x-www-form-urlencoded` request body.
pub fn form_fields(request: &Request) -> HashMap<String, String> {
    url::form_urlencoded::parse(&request.body)
        .into_owned()
        .collect()
}

/// Deterministic file contents.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
