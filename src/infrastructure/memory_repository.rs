// In-memory history repository
use crate::application::history_repository::{append_versioned, HistoryRepository};
use crate::domain::error::AnalyticsError;
use crate::domain::metrics::{BatteryHistory, MetricsSnapshot};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
pub struct MemoryHistoryRepository {
    histories: RwLock<HashMap<String, BatteryHistory>>,
}

impl MemoryHistoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryRepository for MemoryHistoryRepository {
    async fn load_history(
        &self,
        battery_id: &str,
    ) -> Result<Option<BatteryHistory>, AnalyticsError> {
        Ok(self.histories.read().await.get(battery_id).cloned())
    }

    async fn append_snapshot(
        &self,
        snapshot: &MetricsSnapshot,
        expected_version: u64,
    ) -> Result<u64, AnalyticsError> {
        let mut histories = self.histories.write().await;
        let history = histories.entry(snapshot.battery_id.clone()).or_default();
        append_versioned(history, snapshot, expected_version)
    }

    async fn list_battery_ids(&self) -> Result<Vec<String>, AnalyticsError> {
        let mut ids: Vec<String> = self.histories.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}
