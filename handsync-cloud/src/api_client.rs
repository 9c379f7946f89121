//! HTTP client for the collection server.
//!
//! Every server endpoint is a form POST carrying `app_version` and, for
//! authenticated calls, the active `login_token`. The resumable-upload
//! calls talk to the storage session links the server hands out and use
//! raw headers instead of forms.

use crate::chunks::file_range_stream;
use crate::config::SyncConfig;
use crate::credential_manager::CredentialManager;
use crate::directives::DirectiveBatch;
use crate::error::{SyncError, SyncResult};
use crate::pause::PauseSignal;
use crate::types::{
    ServerReply, SessionState, TransferOutcome, UploadLinkResponse, VerifyOutcome, VerifyResponse,
};
use crate::upload_session::UploadTransport;
use async_trait::async_trait;
use futures::StreamExt;
use handsync_crypto::Md5Hex;
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, LOCATION, RANGE};
use reqwest::redirect::Policy;
use reqwest::{Client, Response};
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// HTTP client for the collection server and its upload sessions.
pub struct ApiClient {
    client: Client,
    config: SyncConfig,
    credentials: Arc<CredentialManager>,
}

impl ApiClient {
    pub fn new(config: SyncConfig, credentials: Arc<CredentialManager>) -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            // A 308 from an upload session is a status report, not a redirect.
            .redirect(Policy::none())
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()?;

        Ok(Self {
            client,
            config,
            credentials,
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    // ── Request primitive ──

    /// Form POST to `path` with `app_version` prepended to `fields`.
    async fn form_post(&self, path: &str, fields: &[(&str, &str)]) -> SyncResult<ServerReply> {
        let url = self.config.endpoint(path);
        let mut form: Vec<(&str, &str)> = Vec::with_capacity(fields.len() + 1);
        form.push(("app_version", self.config.app_version.as_str()));
        form.extend_from_slice(fields);

        let resp = self.client.post(&url).form(&form).send().await?;
        let reply = read_reply(resp).await?;
        if reply.status >= 400 {
            warn!("POST {path} returned {}: {}", reply.status, reply.body);
        }
        Ok(reply)
    }

    /// Form POST that also carries the active login token.
    async fn authed_form_post(
        &self,
        path: &str,
        fields: &[(&str, &str)],
    ) -> SyncResult<ServerReply> {
        let token = self.credentials.login_token().await?;
        let mut form: Vec<(&str, &str)> = Vec::with_capacity(fields.len() + 1);
        form.push(("login_token", token.as_str()));
        form.extend_from_slice(fields);
        self.form_post(path, &form).await
    }

    /// Like [`authed_form_post`](Self::authed_form_post) but non-2xx is an error.
    async fn authed_form_post_ok(
        &self,
        path: &str,
        fields: &[(&str, &str)],
    ) -> SyncResult<ServerReply> {
        let reply = self.authed_form_post(path, fields).await?;
        ensure_success(path, reply)
    }

    // ── Account ──

    /// Registers a new login token, authorized by the admin token.
    pub async fn register_login(&self, admin_token: &str, login_token: &str) -> SyncResult<()> {
        let reply = self
            .form_post(
                "/register_login",
                &[("admin_token", admin_token), ("login_token", login_token)],
            )
            .await?;
        ensure_success("/register_login", reply)?;
        Ok(())
    }

    // ── Key/value entries ──

    /// Uploads one key/value entry. Success acknowledges exactly this pair.
    pub async fn save(&self, key: &str, value: &str) -> SyncResult<()> {
        self.authed_form_post_ok("/save", &[("key", key), ("value", value)])
            .await?;
        Ok(())
    }

    // ── Directives ──

    pub async fn fetch_directives(&self) -> SyncResult<DirectiveBatch> {
        let reply = self.authed_form_post_ok("/directives", &[]).await?;
        reply.json("/directives")
    }

    /// Acknowledges a directive with the credential active right now.
    pub async fn directive_completed(&self, id: &str) -> SyncResult<()> {
        let timestamp = crate::iso_timestamp();
        self.authed_form_post_ok(
            "/directive_completed",
            &[("id", id), ("timestamp", timestamp.as_str())],
        )
        .await?;
        Ok(())
    }

    /// Fetches the current prompt-set document as raw JSON text.
    pub async fn fetch_prompts(&self) -> SyncResult<String> {
        let reply = self.authed_form_post_ok("/prompts", &[]).await?;
        Ok(reply.body)
    }

    /// Streams the current package to `dest`, returning its size.
    ///
    /// A partial download is removed on failure.
    pub async fn download_apk(&self, dest: &Path, pause: &PauseSignal) -> SyncResult<u64> {
        let token = self.credentials.login_token().await?;
        let url = self.config.endpoint("/apk");
        let resp = self
            .client
            .post(&url)
            .timeout(self.config.transfer_timeout())
            .form(&[
                ("app_version", self.config.app_version.as_str()),
                ("login_token", token.as_str()),
            ])
            .send()
            .await?;
        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            return Err(SyncError::Rejected {
                endpoint: "/apk".to_string(),
                status,
            });
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let result = stream_to_file(resp, dest, pause).await;
        if result.is_err() {
            let _ = tokio::fs::remove_file(dest).await;
        }
        result
    }
}

async fn stream_to_file(resp: Response, dest: &Path, pause: &PauseSignal) -> SyncResult<u64> {
    let mut file = tokio::fs::File::create(dest).await?;
    let mut body = resp.bytes_stream();
    let mut written = 0u64;
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
        pause.check()?;
    }
    file.sync_all().await?;
    debug!("downloaded {written} bytes to {}", dest.display());
    Ok(written)
}

async fn read_reply(resp: Response) -> SyncResult<ServerReply> {
    let status = resp.status().as_u16();
    let headers = resp.headers().clone();
    let body = resp.text().await?;
    Ok(ServerReply {
        status,
        headers,
        body,
    })
}

fn ensure_success(endpoint: &str, reply: ServerReply) -> SyncResult<ServerReply> {
    if reply.is_success() {
        Ok(reply)
    } else {
        Err(SyncError::Rejected {
            endpoint: endpoint.to_string(),
            status: reply.status,
        })
    }
}

/// Parses a `Range: bytes=0-N` header into the resume offset `N + 1`.
pub(crate) fn parse_range_header(value: &str) -> SyncResult<u64> {
    let malformed = || SyncError::Protocol(format!("malformed Range header: {value:?}"));
    let (first, last) = value
        .strip_prefix("bytes=")
        .and_then(|r| r.split_once('-'))
        .ok_or_else(malformed)?;
    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(first) || !all_digits(last) {
        return Err(malformed());
    }
    let first: u64 = first.parse().map_err(|_| malformed())?;
    let last: u64 = last.parse().map_err(|_| malformed())?;
    if first != 0 {
        return Err(SyncError::Protocol(format!(
            "Range header does not start at 0: {value:?}"
        )));
    }
    last.checked_add(1).ok_or_else(malformed)
}

#[async_trait]
impl UploadTransport for ApiClient {
    async fn request_upload_link(
        &self,
        relative_path: &str,
        md5: &Md5Hex,
        file_size: u64,
    ) -> SyncResult<String> {
        let size = file_size.to_string();
        let reply = self
            .authed_form_post_ok(
                "/upload",
                &[
                    ("path", relative_path),
                    ("md5", md5.as_str()),
                    ("file_size", size.as_str()),
                ],
            )
            .await?;
        let link: UploadLinkResponse = reply.json("/upload")?;
        Ok(link.upload_link)
    }

    async fn start_session(&self, upload_link: &str, md5: &Md5Hex) -> SyncResult<String> {
        let resp = self
            .client
            .post(upload_link)
            .header(CONTENT_LENGTH, "0")
            .header(CONTENT_TYPE, "video/mp4")
            .header("Content-MD5", md5.to_base64())
            .header("X-Goog-Resumable", "start")
            .body(Vec::new())
            .send()
            .await?;
        let reply = read_reply(resp).await?;
        let reply = ensure_success("upload session start", reply)?;
        reply
            .header(LOCATION.as_str())
            .map(str::to_string)
            .ok_or_else(|| SyncError::Protocol("session start returned no Location".to_string()))
    }

    async fn query_session(&self, session_link: &str, file_size: u64) -> SyncResult<SessionState> {
        let resp = self
            .client
            .put(session_link)
            .header(CONTENT_LENGTH, "0")
            .header(CONTENT_RANGE, format!("bytes */{file_size}"))
            .body(Vec::new())
            .send()
            .await?;
        let reply = read_reply(resp).await?;
        match reply.status {
            200..=299 => Ok(SessionState::Complete),
            308 => match reply.header(RANGE.as_str()) {
                None => Ok(SessionState::Partial { offset: 0 }),
                Some(range) => {
                    let offset = parse_range_header(range)?;
                    Ok(SessionState::Partial { offset })
                }
            },
            status => {
                warn!("session query returned {status}: {}", reply.body);
                Ok(SessionState::Broken)
            }
        }
    }

    async fn upload_range(
        &self,
        session_link: &str,
        file: &Path,
        offset: u64,
        file_size: u64,
        pause: &PauseSignal,
    ) -> SyncResult<TransferOutcome> {
        let len = file_size.saturating_sub(offset);
        let chunks = file_range_stream(
            file,
            offset,
            len,
            self.config.chunk_size_bytes,
            pause.clone(),
        )
        .await?;
        info!("uploading {len} bytes of {} from offset {offset}", file.display());

        let sent = self
            .client
            .put(session_link)
            .timeout(self.config.transfer_timeout())
            .header(CONTENT_LENGTH, len.to_string())
            .header(
                CONTENT_RANGE,
                format!("bytes {offset}-{}/{file_size}", file_size.saturating_sub(1)),
            )
            .body(reqwest::Body::wrap_stream(chunks))
            .send()
            .await;

        let resp = match sent {
            Ok(resp) => resp,
            Err(_) if pause.is_paused() => return Err(SyncError::Paused),
            Err(e) => return Err(e.into()),
        };
        let reply = read_reply(resp).await?;
        Ok(match reply.status {
            200..=299 => TransferOutcome::Completed,
            status if status >= 400 => {
                warn!("upload rejected with {status}: {}", reply.body);
                TransferOutcome::Rejected(status)
            }
            status => TransferOutcome::Incomplete(status),
        })
    }

    async fn verify_upload(
        &self,
        relative_path: &str,
        md5: &Md5Hex,
        file_size: u64,
    ) -> SyncResult<VerifyOutcome> {
        let size = file_size.to_string();
        let reply = self
            .authed_form_post(
                "/verify",
                &[
                    ("path", relative_path),
                    ("md5", md5.as_str()),
                    ("file_size", size.as_str()),
                ],
            )
            .await?;
        match reply.status {
            200..=299 => {
                let body: VerifyResponse = reply.json("/verify")?;
                Ok(if body.verified {
                    VerifyOutcome::Verified
                } else {
                    VerifyOutcome::NotVerified
                })
            }
            503 => {
                let body: VerifyResponse = serde_json::from_str(&reply.body).unwrap_or_default();
                Ok(if body.file_not_found {
                    VerifyOutcome::FileNotFound
                } else {
                    VerifyOutcome::Unavailable(503)
                })
            }
            status => Ok(VerifyOutcome::Unavailable(status)),
        }
    }
}
