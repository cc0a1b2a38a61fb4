// Battery metrics domain models
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Good,
    Warning,
    Critical,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Good => "good",
            HealthStatus::Warning => "warning",
            HealthStatus::Critical => "critical",
        }
    }
}

/// Where the snapshot's state of charge came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SocSource {
    Reported,
    CoulombCounted,
    Unavailable,
}

/// Where the snapshot's state of health came from. `Nameplate` means no
/// capacity evidence exists yet and the value is the rated 100%.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SohSource {
    Measured,
    Estimated,
    CarriedForward,
    Nameplate,
}

impl SohSource {
    /// True when the value came from capacity evidence in its own window.
    pub fn is_evidence(&self) -> bool {
        matches!(self, SohSource::Measured | SohSource::Estimated)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradationStatus {
    Computed,
    InsufficientHistory,
}

/// Point-in-time metrics for one battery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub battery_id: String,
    pub timestamp: DateTime<Utc>,
    pub state_of_health: f64,
    pub soh_source: SohSource,
    #[serde(rename = "current_soc")]
    pub state_of_charge: Option<f64>,
    pub soc_source: SocSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity_estimate_ah: Option<f64>,
    pub avg_voltage: f64,
    pub avg_current: f64,
    pub avg_temperature: f64,
    pub voltage_std: f64,
    pub max_temperature: f64,
    pub equivalent_cycles: f64,
    #[serde(rename = "full_cycles")]
    pub cycle_count: u64,
    /// Percentage points of SOH lost per 30 days.
    pub degradation_rate: f64,
    pub degradation_status: DegradationStatus,
    pub energy_charged_kwh: f64,
    pub energy_discharged_kwh: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub round_trip_efficiency: Option<f64>,
    pub health_status: HealthStatus,
}

impl MetricsSnapshot {
    pub fn soh_available(&self) -> bool {
        self.soh_source != SohSource::Nameplate
    }

    /// Usable as a degradation point; carried values repeat an older one.
    pub fn soh_is_evidence(&self) -> bool {
        self.soh_source.is_evidence()
    }
}

/// Prior snapshots for a battery, oldest first, plus the storage version they
/// were read at.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatteryHistory {
    pub version: u64,
    pub snapshots: Vec<MetricsSnapshot>,
}

impl BatteryHistory {
    pub fn new(version: u64, snapshots: Vec<MetricsSnapshot>) -> Self {
        Self { version, snapshots }
    }

    pub fn latest(&self) -> Option<&MetricsSnapshot> {
        self.snapshots.last()
    }
}

/// Explicit starting point for cumulative cycle counting. Supplying one
/// overrides whatever the prior snapshot carried, which is the only way to
/// move the count backwards.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CycleBaseline {
    pub equivalent_cycles: f64,
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
}

impl CycleBaseline {
    pub fn reset() -> Self {
        Self {
            equivalent_cycles: 0.0,
            since: None,
        }
    }
}
