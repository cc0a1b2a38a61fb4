// Repository trait for per-battery metrics history
use crate::domain::error::AnalyticsError;
use crate::domain::metrics::{BatteryHistory, MetricsSnapshot};
use async_trait::async_trait;

/// Snapshot history store. Writes are optimistic: a writer states the version
/// it read and loses with `AnalyticsError::Conflict` if someone else appended
/// first.
#[async_trait]
pub trait HistoryRepository: Send + Sync {
    /// Full history for a battery, `None` when nothing has been stored yet
    async fn load_history(
        &self,
        battery_id: &str,
    ) -> Result<Option<BatteryHistory>, AnalyticsError>;

    /// Append a snapshot if the stored version still equals `expected_version`.
    /// Returns the new version.
    async fn append_snapshot(
        &self,
        snapshot: &MetricsSnapshot,
        expected_version: u64,
    ) -> Result<u64, AnalyticsError>;

    async fn list_battery_ids(&self) -> Result<Vec<String>, AnalyticsError>;
}

/// Shared check for implementations holding a history behind their own lock.
pub fn append_versioned(
    history: &mut BatteryHistory,
    snapshot: &MetricsSnapshot,
    expected_version: u64,
) -> Result<u64, AnalyticsError> {
    if history.version != expected_version {
        return Err(AnalyticsError::Conflict {
            battery_id: snapshot.battery_id.clone(),
            expected: expected_version,
            actual: history.version,
        });
    }
    history.snapshots.push(snapshot.clone());
    history.version += 1;
    Ok(history.version)
}
