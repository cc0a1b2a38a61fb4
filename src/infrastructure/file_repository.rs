// JSON file history repository - one document per battery under a directory.
// File names are the percent-encoded battery id, so any id maps to one file.
use crate::application::history_repository::{append_versioned, HistoryRepository};
use crate::domain::error::AnalyticsError;
use crate::domain::metrics::{BatteryHistory, MetricsSnapshot};
use anyhow::Context;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

const SUFFIX: &str = ".json";

#[derive(Debug)]
pub struct FileHistoryRepository {
    root: PathBuf,
    /// Serializes read-modify-write cycles within this process
    write_lock: Mutex<()>,
}

impl FileHistoryRepository {
    pub async fn open(root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .with_context(|| format!("creating history directory {}", root.display()))?;
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    fn path_for(&self, battery_id: &str) -> PathBuf {
        self.root.join(format!("{}{}", urlencoding::encode(battery_id), SUFFIX))
    }

    async fn read(path: &Path) -> Result<Option<BatteryHistory>, AnalyticsError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(AnalyticsError::storage(
                    anyhow::Error::new(e).context(format!("reading {}", path.display())),
                ))
            }
        };
        let history = serde_json::from_slice(&bytes)
            .with_context(|| format!("decoding {}", path.display()))
            .map_err(AnalyticsError::storage)?;
        Ok(Some(history))
    }

    /// Write through a sibling temp file so readers never see a partial document.
    async fn write(path: &Path, history: &BatteryHistory) -> Result<(), AnalyticsError> {
        let bytes = serde_json::to_vec_pretty(history).map_err(AnalyticsError::storage)?;
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, bytes)
            .await
            .with_context(|| format!("writing {}", tmp.display()))
            .map_err(AnalyticsError::storage)?;
        tokio::fs::rename(&tmp, path)
            .await
            .with_context(|| format!("replacing {}", path.display()))
            .map_err(AnalyticsError::storage)
    }
}

#[async_trait]
impl HistoryRepository for FileHistoryRepository {
    async fn load_history(
        &self,
        battery_id: &str,
    ) -> Result<Option<BatteryHistory>, AnalyticsError> {
        Self::read(&self.path_for(battery_id)).await
    }

    async fn append_snapshot(
        &self,
        snapshot: &MetricsSnapshot,
        expected_version: u64,
    ) -> Result<u64, AnalyticsError> {
        let path = self.path_for(&snapshot.battery_id);
        let _guard = self.write_lock.lock().await;

        let mut history = Self::read(&path).await?.unwrap_or_default();
        let version = append_versioned(&mut history, snapshot, expected_version)?;
        Self::write(&path, &history).await?;
        tracing::debug!(
            "Stored snapshot {} for {} at {}",
            version,
            snapshot.battery_id,
            path.display()
        );
        Ok(version)
    }

    async fn list_battery_ids(&self) -> Result<Vec<String>, AnalyticsError> {
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(AnalyticsError::storage)?;
        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(AnalyticsError::storage)? {
            let file_name = entry.file_name();
            let Some(encoded) = file_name.to_str().and_then(|n| n.strip_suffix(SUFFIX)) else {
                continue;
            };
            match urlencoding::decode(encoded) {
                Ok(id) => ids.push(id.into_owned()),
                Err(e) => tracing::warn!("Skipping history file {:?}: {}", file_name, e),
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::memory_repository::tests::snapshot;

    #[tokio::test]
    async fn test_history_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let repository = FileHistoryRepository::open(dir.path()).await.unwrap();
            repository.append_snapshot(&snapshot("battery-001", 0, 99.0), 0).await.unwrap();
            repository.append_snapshot(&snapshot("battery-001", 60, 98.5), 1).await.unwrap();
        }

        let repository = FileHistoryRepository::open(dir.path()).await.unwrap();
        let history = repository.load_history("battery-001").await.unwrap().unwrap();
        assert_eq!(history.version, 2);
        assert_eq!(history.snapshots.len(), 2);
        assert_eq!(history.latest().unwrap().state_of_health, 98.5);
        assert_eq!(repository.list_battery_ids().await.unwrap(), vec!["battery-001"]);
    }

    #[tokio::test]
    async fn test_stale_version_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let repository = FileHistoryRepository::open(dir.path()).await.unwrap();
        repository.append_snapshot(&snapshot("battery-001", 0, 99.0), 0).await.unwrap();

        let err = repository
            .append_snapshot(&snapshot("battery-001", 60, 98.0), 0)
            .await
            .unwrap_err();
        assert_eq!(err.category(), "conflict");
    }

    #[tokio::test]
    async fn test_any_battery_id_is_stored_inside_root() {
        let dir = tempfile::tempdir().unwrap();
        let repository = FileHistoryRepository::open(dir.path()).await.unwrap();
        assert!(repository.load_history("missing").await.unwrap().is_none());

        let ids = ["../etc/passwd", "rack 3/bank é", "", ".."];
        for id in ids {
            repository.append_snapshot(&snapshot(id, 0, 97.0), 0).await.unwrap();
            let history = repository.load_history(id).await.unwrap().unwrap();
            assert_eq!(history.latest().unwrap().battery_id, id);
        }

        let mut expected: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
        expected.sort();
        assert_eq!(repository.list_battery_ids().await.unwrap(), expected);
        assert!(!dir.path().join("../etc/passwd.json").exists());
    }
}
