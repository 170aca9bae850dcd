use std::path::{Path, PathBuf};

use async_trait::async_trait;
use grokgate_provider_core::{PersistenceError, StatusMap, StatusStore};

pub const STATUS_FILE_NAME: &str = "token_status.json";

/// Status map persisted as a single pretty-printed JSON document.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at `<data_dir>/token_status.json`.
    pub fn in_dir(data_dir: impl AsRef<Path>) -> Self {
        Self::new(data_dir.as_ref().join(STATUS_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl StatusStore for JsonFileStore {
    async fn load(&self) -> Result<StatusMap, PersistenceError> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(StatusMap::new());
            }
            Err(err) => return Err(err.into()),
        };
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Ok(StatusMap::new());
        }
        Ok(serde_json::from_slice(&raw)?)
    }

    async fn save(&self, map: &StatusMap) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let body = serde_json::to_vec_pretty(map)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grokgate_provider_core::TokenStatus;

    #[tokio::test]
    async fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::in_dir(dir.path());
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn save_then_load_uses_camel_case_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::in_dir(dir.path().join("nested"));
        let mut map = StatusMap::new();
        map.entry("key".to_string()).or_default().insert(
            "grok-3".to_string(),
            TokenStatus {
                is_valid: false,
                invalidated_time: Some(99),
                total_request_count: 3,
            },
        );
        store.save(&map).await.unwrap();

        let raw = tokio::fs::read_to_string(store.path()).await.unwrap();
        assert!(raw.contains("\"isValid\": false"));
        assert!(raw.contains("\"totalRequestCount\": 3"));
        assert_eq!(store.load().await.unwrap(), map);
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::in_dir(dir.path());
        tokio::fs::write(store.path(), b"{not json").await.unwrap();
        assert!(matches!(
            store.load().await,
            Err(PersistenceError::Encoding(_))
        ));
    }
}
