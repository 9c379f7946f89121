//! Prompt sets delivered by the `downloadPrompts` directive.

use crate::error::{SyncError, SyncResult};
use handsync_storage::PreferenceStore;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

pub const PROMPTS_FILENAME_KEY: &str = "promptsFilename";
pub const PROMPT_INDEX_KEY: &str = "promptIndex";

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Prompt {
    pub index: usize,
    pub key: String,
    pub prompt: String,
}

#[derive(Deserialize)]
struct PromptDocument {
    prompts: Vec<PromptEntry>,
}

#[derive(Deserialize)]
struct PromptEntry {
    key: String,
    prompt: String,
}

/// A loaded prompt set and the position the recorder has reached in it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Prompts {
    pub relative_path: String,
    pub prompts: Vec<Prompt>,
    pub index: usize,
}

impl Prompts {
    /// Parses a `{ "prompts": [{ "key", "prompt" }] }` document.
    pub fn parse(relative_path: &str, json: &str, index: usize) -> SyncResult<Self> {
        let doc: PromptDocument = serde_json::from_str(json)
            .map_err(|e| SyncError::Protocol(format!("malformed prompt document: {e}")))?;
        let prompts = doc
            .prompts
            .into_iter()
            .enumerate()
            .map(|(index, entry)| Prompt {
                index,
                key: entry.key,
                prompt: entry.prompt,
            })
            .collect();
        Ok(Self {
            relative_path: relative_path.to_string(),
            prompts,
            index,
        })
    }

    /// The prompt at the saved position, if any remain.
    pub fn current(&self) -> Option<&Prompt> {
        self.prompts.get(self.index)
    }
}

/// Lazily loaded prompt set.
///
/// The first caller loads it while later callers wait on the same lock and
/// then share the loaded copy.
pub struct PromptCache {
    data_dir: PathBuf,
    preferences: PreferenceStore,
    cached: Mutex<Option<Arc<Prompts>>>,
}

impl PromptCache {
    pub fn new(data_dir: PathBuf, preferences: PreferenceStore) -> Self {
        Self {
            data_dir,
            preferences,
            cached: Mutex::new(None),
        }
    }

    /// The current prompt set, or `None` if none was ever downloaded.
    pub async fn get(&self) -> SyncResult<Option<Arc<Prompts>>> {
        let mut cached = self.cached.lock().await;
        if let Some(prompts) = cached.as_ref() {
            return Ok(Some(Arc::clone(prompts)));
        }
        let Some(relative_path) = self.preferences.get(PROMPTS_FILENAME_KEY)? else {
            return Ok(None);
        };
        let index = match self.preferences.get(PROMPT_INDEX_KEY)? {
            Some(raw) => raw
                .parse()
                .map_err(|_| SyncError::InvalidState(format!("bad prompt index {raw:?}")))?,
            None => 0,
        };
        let json = tokio::fs::read_to_string(self.data_dir.join(&relative_path)).await?;
        let prompts = Arc::new(Prompts::parse(&relative_path, &json, index)?);
        info!("loaded {} prompts from {relative_path}", prompts.prompts.len());
        *cached = Some(Arc::clone(&prompts));
        Ok(Some(prompts))
    }

    /// Persists the recorder's position in the prompt set.
    pub async fn save_prompt_index(&self, index: usize) -> SyncResult<()> {
        let mut cached = self.cached.lock().await;
        self.preferences.set(PROMPT_INDEX_KEY, &index.to_string())?;
        if let Some(prompts) = cached.as_mut() {
            Arc::make_mut(prompts).index = index;
        }
        Ok(())
    }

    /// Drops the cached set so the next [`get`](Self::get) reloads it.
    pub async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }

    /// Stores a freshly downloaded document as the active prompt set.
    ///
    /// The document lands at `prompts/<timestamp>.json` and the saved
    /// position restarts at 0.
    pub async fn install_document(&self, json: &str) -> SyncResult<String> {
        // Reject anything the loader could not read back.
        Prompts::parse("", json, 0)?;

        let relative_path = format!("prompts/{}.json", crate::iso_timestamp());
        let path = self.data_dir.join(&relative_path);
        write_file(&path, json).await?;
        info!("prompt data written to {} ({} bytes)", path.display(), json.len());

        let mut cached = self.cached.lock().await;
        self.preferences.set_many(&[
            (PROMPTS_FILENAME_KEY, relative_path.as_str()),
            (PROMPT_INDEX_KEY, "0"),
        ])?;
        *cached = None;
        Ok(relative_path)
    }
}

async fn write_file(path: &Path, contents: &str) -> SyncResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    if let Err(e) = tokio::fs::write(path, contents).await {
        warn!("unable to write {}: {e}", path.display());
        return Err(e.into());
    }
    Ok(())
}
