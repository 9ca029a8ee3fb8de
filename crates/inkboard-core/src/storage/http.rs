//! Blob store backed by the relay's board facade.

use super::checkpoint::BOARD_KEY_PREFIX;
use super::{BlobStore, BoxFuture, StorageError, StorageResult};
use reqwest::StatusCode;
use std::time::Duration;
use url::Url;

const REQUEST_TIMEOUT_SECS: u64 = 15;
const CONNECT_TIMEOUT_SECS: u64 = 5;

/// Talks to `GET/POST/DELETE {base}/api/boards/{room}`.
///
/// Only board keys (`board:{room}`) can be addressed. The facade applies its
/// own retention, so a TTL passed to [`BlobStore::set`] is not forwarded.
pub struct HttpBlobStore {
    http: reqwest::Client,
    base_url: Url,
}

impl HttpBlobStore {
    pub fn new(base_url: &str) -> StorageResult<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| StorageError::Other(format!("Invalid base URL: {}", e)))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()?;
        Ok(Self { http, base_url })
    }

    /// URL of the facade endpoint for a board key.
    pub fn board_url(&self, key: &str) -> StorageResult<Url> {
        let room = key
            .strip_prefix(BOARD_KEY_PREFIX)
            .filter(|room| !room.is_empty())
            .ok_or_else(|| StorageError::Other(format!("Not a board key: {}", key)))?;

        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| StorageError::Other("Base URL cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(["api", "boards", room]);
        Ok(url)
    }
}

fn check_status(url: &Url, status: StatusCode) -> StorageResult<()> {
    if status.is_success() {
        Ok(())
    } else {
        Err(StorageError::Http(format!("{} returned HTTP {}", url, status.as_u16())))
    }
}

impl BlobStore for HttpBlobStore {
    fn get(&self, key: &str) -> BoxFuture<'_, StorageResult<Option<Vec<u8>>>> {
        let url = self.board_url(key);
        Box::pin(async move {
            let url = url?;
            let response = self.http.get(url.clone()).send().await?;
            if response.status() == StatusCode::NOT_FOUND {
                return Ok(None);
            }
            check_status(&url, response.status())?;
            Ok(Some(response.bytes().await?.to_vec()))
        })
    }

    fn set(
        &self,
        key: &str,
        bytes: Vec<u8>,
        ttl: Option<Duration>,
    ) -> BoxFuture<'_, StorageResult<()>> {
        let url = self.board_url(key);
        Box::pin(async move {
            let url = url?;
            if bytes.is_empty() {
                return Err(StorageError::EmptyPayload);
            }
            if let Some(ttl) = ttl {
                log::debug!("TTL of {:?} left to the board facade", ttl);
            }
            let response = self
                .http
                .post(url.clone())
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(bytes)
                .send()
                .await?;
            check_status(&url, response.status())
        })
    }

    fn del(&self, key: &str) -> BoxFuture<'_, StorageResult<()>> {
        let url = self.board_url(key);
        Box::pin(async move {
            let url = url?;
            let response = self.http.delete(url.clone()).send().await?;
            check_status(&url, response.status())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::block_on;

    #[test]
    fn test_board_url() {
        let store = HttpBlobStore::new("http://localhost:3030").unwrap();
        assert_eq!(
            store.board_url("board:r1").unwrap().as_str(),
            "http://localhost:3030/api/boards/r1"
        );

        let nested = HttpBlobStore::new("https://example.com/ink/").unwrap();
        assert_eq!(
            nested.board_url("board:a b").unwrap().as_str(),
            "https://example.com/ink/api/boards/a%20b"
        );
    }

    #[test]
    fn test_rejects_other_keys() {
        let store = HttpBlobStore::new("http://localhost:3030").unwrap();
        assert!(store.board_url("session:x").is_err());
        assert!(store.board_url("board:").is_err());
    }

    #[test]
    fn test_empty_payload_rejected_before_request() {
        let store = HttpBlobStore::new("http://127.0.0.1:9").unwrap();
        let result = block_on(store.set("board:r1", Vec::new(), None));
        assert!(matches!(result, Err(StorageError::EmptyPayload)));
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(HttpBlobStore::new("not a url").is_err());
    }
}
