//! Persisted settings file
//!
//! A JSON object on disk shared with other users of the same file. This crate
//! only reads and writes the `refreshToken` key; every other key is carried
//! through a save untouched.
//!
//! Loading never fails. A missing or empty file is created as `{}`. A file that
//! cannot be read or is not a JSON object is treated as empty with a warning,
//! and its previous content is replaced by the next save.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::constants::REFRESH_TOKEN_KEY;
use crate::error::{Error, Result};

/// The part of the settings file this crate owns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedRecord {
    #[serde(
        rename = "refreshToken",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub refresh_token: Option<String>,
}

/// Settings file loaded once at startup and merged on every save.
///
/// The Mutex serializes saves so two writers never interleave their merges.
pub struct SettingsStore {
    path: PathBuf,
    state: Mutex<Map<String, Value>>,
}

impl SettingsStore {
    /// Load the settings file at `path`.
    pub async fn load(path: PathBuf) -> Self {
        debug!(path = %path.display(), "loading settings");
        let state = match read_object(&path).await {
            Ok(Some(state)) => state,
            Ok(None) => {
                debug!(path = %path.display(), "no settings file found, creating");
                if let Err(e) = write_atomic(&path, &Map::new()).await {
                    warn!(path = %path.display(), error = %e, "could not create settings file");
                }
                Map::new()
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring unusable settings file");
                Map::new()
            }
        };

        Self {
            path,
            state: Mutex::new(state),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The record as currently known. Unrelated keys are ignored, a
    /// `refreshToken` of the wrong type reads as absent.
    pub async fn record(&self) -> PersistedRecord {
        let state = self.state.lock().await;
        PersistedRecord {
            refresh_token: state
                .get(REFRESH_TOKEN_KEY)
                .and_then(Value::as_str)
                .map(str::to_owned),
        }
    }

    pub async fn refresh_token(&self) -> Option<String> {
        self.record().await.refresh_token
    }

    /// Merge `record` into the stored object and write it to disk.
    ///
    /// The in-memory state is updated even if the write fails, so the session
    /// keeps working with what it was told to save.
    pub async fn save(&self, record: &PersistedRecord) -> Result<()> {
        debug!(path = %self.path.display(), "saving settings");
        let mut state = self.state.lock().await;
        if let Value::Object(fields) = serde_json::to_value(record)
            .map_err(|e| Error::StorageWrite(format!("serializing settings: {e}")))?
        {
            state.extend(fields);
        }
        write_atomic(&self.path, &state).await?;
        debug!(path = %self.path.display(), "saved settings");
        Ok(())
    }
}

/// `Ok(None)` for a missing or blank file, `Err` for unreadable or invalid content.
async fn read_object(path: &Path) -> Result<Option<Map<String, Value>>> {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::StorageRead(format!("reading settings file: {e}"))),
    };
    if contents.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str(&contents)
        .map(Some)
        .map_err(|e| Error::StorageRead(format!("settings file is not a JSON object: {e}")))
}

/// Write the settings file atomically.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target. Permissions are 0600 on unix since the file holds a refresh
/// token.
async fn write_atomic(path: &Path, data: &Map<String, Value>) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::StorageWrite(format!("serializing settings: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::StorageWrite("settings path has no parent directory".into()))?;
    let file_name = path
        .file_name()
        .ok_or_else(|| Error::StorageWrite("settings path has no file name".into()))?;

    let tmp_path = dir.join(format!(
        ".{}.tmp.{}",
        file_name.to_string_lossy(),
        std::process::id()
    ));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::StorageWrite(format!("writing temp settings file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::StorageWrite(format!("setting settings file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::StorageWrite(format!("renaming temp settings file: {e}")))?;

    Ok(())
}
