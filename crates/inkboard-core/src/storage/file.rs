//! File-based blob store for native platforms.

use super::{BlobStore, BoxFuture, StorageError, StorageResult};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// File-based blob storage.
///
/// Each key becomes `<hex of key>.bin` in the base directory, so distinct
/// keys never share a file. Keys stored with a TTL get a sibling
/// `<hex of key>.expires` holding the expiry in Unix milliseconds.
pub struct FileBlobStore {
    /// Base directory for blob storage.
    base_path: PathBuf,
}

impl FileBlobStore {
    /// Create a new file store with the given base directory.
    ///
    /// Creates the directory if it doesn't exist.
    pub fn new(base_path: PathBuf) -> StorageResult<Self> {
        if !base_path.exists() {
            fs::create_dir_all(&base_path).map_err(|e| {
                StorageError::Io(format!("Failed to create storage directory: {}", e))
            })?;
        }
        Ok(Self { base_path })
    }

    /// Create file storage in the default location.
    ///
    /// On Unix: `~/.local/share/inkboard/boards/`
    /// On Windows: `%LOCALAPPDATA%\inkboard\boards\`
    pub fn default_location() -> StorageResult<Self> {
        let base = dirs::data_local_dir()
            .or_else(dirs::home_dir)
            .ok_or_else(|| StorageError::Io("Could not determine home directory".to_string()))?;

        Self::new(base.join("inkboard").join("boards"))
    }

    fn safe_name(key: &str) -> String {
        hex::encode(key.as_bytes())
    }

    fn blob_path(&self, key: &str) -> PathBuf {
        self.base_path.join(format!("{}.bin", Self::safe_name(key)))
    }

    fn expiry_path(&self, key: &str) -> PathBuf {
        self.base_path.join(format!("{}.expires", Self::safe_name(key)))
    }

    /// Get the base path.
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}

fn remove_if_exists(path: &Path) -> StorageResult<()> {
    if path.exists() {
        fs::remove_file(path).map_err(|e| {
            StorageError::Io(format!("Failed to delete {}: {}", path.display(), e))
        })?;
    }
    Ok(())
}

/// Replace `path` with `bytes` without ever leaving a truncated file behind.
fn write_atomic(path: &Path, bytes: &[u8]) -> StorageResult<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, bytes)
        .map_err(|e| StorageError::Io(format!("Failed to write {}: {}", tmp.display(), e)))?;
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        StorageError::Io(format!("Failed to replace {}: {}", path.display(), e))
    })
}

fn is_expired(expiry_path: &Path) -> bool {
    let Ok(raw) = fs::read_to_string(expiry_path) else {
        return false;
    };
    match raw.trim().parse::<u128>() {
        Ok(expires_at) => now_millis() >= expires_at,
        Err(_) => {
            log::warn!("Ignoring unreadable expiry file {}", expiry_path.display());
            false
        }
    }
}

impl BlobStore for FileBlobStore {
    fn get(&self, key: &str) -> BoxFuture<'_, StorageResult<Option<Vec<u8>>>> {
        let path = self.blob_path(key);
        let expiry = self.expiry_path(key);

        Box::pin(async move {
            if !path.exists() {
                return Ok(None);
            }
            if is_expired(&expiry) {
                log::debug!("Blob {} expired", path.display());
                remove_if_exists(&path)?;
                remove_if_exists(&expiry)?;
                return Ok(None);
            }
            fs::read(&path)
                .map(Some)
                .map_err(|e| StorageError::Io(format!("Failed to read {}: {}", path.display(), e)))
        })
    }

    fn set(
        &self,
        key: &str,
        bytes: Vec<u8>,
        ttl: Option<Duration>,
    ) -> BoxFuture<'_, StorageResult<()>> {
        let path = self.blob_path(key);
        let expiry = self.expiry_path(key);

        Box::pin(async move {
            write_atomic(&path, &bytes)?;
            match ttl {
                Some(ttl) => {
                    let expires_at = now_millis() + ttl.as_millis();
                    write_atomic(&expiry, expires_at.to_string().as_bytes())
                }
                None => remove_if_exists(&expiry),
            }
        })
    }

    fn del(&self, key: &str) -> BoxFuture<'_, StorageResult<()>> {
        let path = self.blob_path(key);
        let expiry = self.expiry_path(key);

        Box::pin(async move {
            remove_if_exists(&path)?;
            remove_if_exists(&expiry)
        })
    }
}
