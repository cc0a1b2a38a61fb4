use crate::domain::anomaly::{Bounds, ChannelThresholds};
use crate::domain::error::AnalyticsError;
use crate::domain::metrics::HealthStatus;
use serde::Deserialize;
use std::path::PathBuf;

/// Process-wide settings, loaded once at startup and read-only afterwards.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub battery: BatterySettings,
    #[serde(default)]
    pub health: HealthThresholds,
    #[serde(default)]
    pub anomaly: AnomalySettings,
}

impl AppConfig {
    /// The slice of configuration the analytics engine is built from.
    pub fn analytics(&self) -> AnalyticsConfig {
        AnalyticsConfig {
            battery: self.battery.clone(),
            health: self.health.clone(),
            anomaly: self.anomaly.clone(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSettings {
    /// `tracing_subscriber::EnvFilter` directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    Memory,
    File,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageSettings {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            path: default_storage_path(),
        }
    }
}

/// Engine configuration. Passed into the engine at construction.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AnalyticsConfig {
    #[serde(default)]
    pub battery: BatterySettings,
    #[serde(default)]
    pub health: HealthThresholds,
    #[serde(default)]
    pub anomaly: AnomalySettings,
}

impl AnalyticsConfig {
    pub fn validate(&self) -> Result<(), AnalyticsError> {
        self.battery.validate()?;
        self.health.validate()?;
        self.anomaly.validate()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BatterySettings {
    /// Nameplate capacity in amp-hours
    #[serde(default = "default_rated_capacity_ah")]
    pub rated_capacity_ah: f64,
    /// Intervals longer than this are not integrated
    #[serde(default = "default_max_integration_gap_secs")]
    pub max_integration_gap_secs: i64,
    /// Minimum SOC swing between anchors before a capacity estimate is taken
    #[serde(default = "default_min_soc_span_percent")]
    pub min_soc_span_percent: f64,
    #[serde(default = "default_capacity_ema_alpha")]
    pub capacity_ema_alpha: f64,
}

impl Default for BatterySettings {
    fn default() -> Self {
        Self {
            rated_capacity_ah: default_rated_capacity_ah(),
            max_integration_gap_secs: default_max_integration_gap_secs(),
            min_soc_span_percent: default_min_soc_span_percent(),
            capacity_ema_alpha: default_capacity_ema_alpha(),
        }
    }
}

impl BatterySettings {
    pub fn validate(&self) -> Result<(), AnalyticsError> {
        if !(self.rated_capacity_ah.is_finite() && self.rated_capacity_ah > 0.0) {
            return Err(AnalyticsError::configuration(
                "battery.rated_capacity_ah",
                format!("must be positive, got {}", self.rated_capacity_ah),
            ));
        }
        if self.max_integration_gap_secs <= 0 {
            return Err(AnalyticsError::configuration(
                "battery.max_integration_gap_secs",
                "must be positive",
            ));
        }
        if !(self.min_soc_span_percent > 0.0 && self.min_soc_span_percent <= 100.0) {
            return Err(AnalyticsError::configuration(
                "battery.min_soc_span_percent",
                format!("must lie in (0, 100], got {}", self.min_soc_span_percent),
            ));
        }
        if !(self.capacity_ema_alpha > 0.0 && self.capacity_ema_alpha <= 1.0) {
            return Err(AnalyticsError::configuration(
                "battery.capacity_ema_alpha",
                format!("must lie in (0, 1], got {}", self.capacity_ema_alpha),
            ));
        }
        Ok(())
    }
}

/// SOH breakpoints for health classification.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct HealthThresholds {
    #[serde(default = "default_good_min")]
    pub good_min: f64,
    #[serde(default = "default_warning_min")]
    pub warning_min: f64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            good_min: default_good_min(),
            warning_min: default_warning_min(),
        }
    }
}

impl HealthThresholds {
    pub fn classify(&self, state_of_health: f64) -> HealthStatus {
        if state_of_health >= self.good_min {
            HealthStatus::Good
        } else if state_of_health >= self.warning_min {
            HealthStatus::Warning
        } else {
            HealthStatus::Critical
        }
    }

    pub fn validate(&self) -> Result<(), AnalyticsError> {
        let in_range = |v: f64| (0.0..=100.0).contains(&v);
        if !in_range(self.good_min) || !in_range(self.warning_min) {
            return Err(AnalyticsError::configuration(
                "health",
                "thresholds must lie in [0, 100]",
            ));
        }
        if self.warning_min > self.good_min {
            return Err(AnalyticsError::configuration(
                "health.warning_min",
                format!(
                    "{} exceeds good_min {}",
                    self.warning_min, self.good_min
                ),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScorerKind {
    #[default]
    IsolationForest,
    ZScore,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnomalySettings {
    #[serde(default = "default_contamination")]
    pub default_contamination: f64,
    #[serde(default = "default_min_statistical_samples")]
    pub min_statistical_samples: usize,
    #[serde(default)]
    pub scorer: ScorerKind,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_trees")]
    pub trees: usize,
    #[serde(default = "default_subsample_size")]
    pub subsample_size: usize,
    #[serde(default = "default_thresholds")]
    pub thresholds: ChannelThresholds,
}

impl Default for AnomalySettings {
    fn default() -> Self {
        Self {
            default_contamination: default_contamination(),
            min_statistical_samples: default_min_statistical_samples(),
            scorer: ScorerKind::default(),
            seed: default_seed(),
            trees: default_trees(),
            subsample_size: default_subsample_size(),
            thresholds: default_thresholds(),
        }
    }
}

impl AnomalySettings {
    pub fn validate(&self) -> Result<(), AnalyticsError> {
        validate_contamination(self.default_contamination)?;
        validate_thresholds(&self.thresholds)?;
        if self.trees == 0 {
            return Err(AnalyticsError::configuration("anomaly.trees", "must be at least 1"));
        }
        if self.subsample_size < 2 {
            return Err(AnalyticsError::configuration(
                "anomaly.subsample_size",
                "must be at least 2",
            ));
        }
        Ok(())
    }
}

/// Contamination is a fraction strictly between 0 and 1.
pub fn validate_contamination(contamination: f64) -> Result<(), AnalyticsError> {
    if contamination.is_finite() && contamination > 0.0 && contamination < 1.0 {
        Ok(())
    } else {
        Err(AnalyticsError::configuration(
            "contamination",
            format!("must lie in (0, 1), got {}", contamination),
        ))
    }
}

pub fn validate_thresholds(thresholds: &ChannelThresholds) -> Result<(), AnalyticsError> {
    for (channel, bounds) in thresholds.configured() {
        if !bounds.min.is_finite() || !bounds.max.is_finite() || bounds.min > bounds.max {
            return Err(AnalyticsError::configuration(
                format!("thresholds.{}", channel.as_str()),
                format!("invalid bounds [{}, {}]", bounds.min, bounds.max),
            ));
        }
    }
    Ok(())
}

/// Load settings from `path` (optional, any format the `config` crate reads)
/// layered under `BESS__SECTION__KEY` environment variables.
pub fn load_app_config(path: &str) -> anyhow::Result<AppConfig> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name(path).required(false))
        .add_source(
            config::Environment::with_prefix("BESS")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let app_config: AppConfig = settings.try_deserialize()?;
    app_config.analytics().validate()?;
    Ok(app_config)
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_log_filter() -> String {
    "info,bess_analytics=debug".to_string()
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("data/history")
}

fn default_rated_capacity_ah() -> f64 {
    100.0
}

fn default_max_integration_gap_secs() -> i64 {
    15 * 60
}

fn default_min_soc_span_percent() -> f64 {
    20.0
}

fn default_capacity_ema_alpha() -> f64 {
    0.3
}

fn default_good_min() -> f64 {
    90.0
}

fn default_warning_min() -> f64 {
    70.0
}

fn default_contamination() -> f64 {
    0.05
}

fn default_min_statistical_samples() -> usize {
    20
}

fn default_seed() -> u64 {
    42
}

fn default_trees() -> usize {
    100
}

fn default_subsample_size() -> usize {
    256
}

fn default_thresholds() -> ChannelThresholds {
    ChannelThresholds {
        voltage: Some(Bounds::new(40.0, 60.0)),
        current: Some(Bounds::new(-200.0, 200.0)),
        temperature: Some(Bounds::new(0.0, 50.0)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_health() {
        let thresholds = HealthThresholds::default();
        assert_eq!(thresholds.classify(95.0), HealthStatus::Good);
        assert_eq!(thresholds.classify(90.0), HealthStatus::Good);
        assert_eq!(thresholds.classify(89.99), HealthStatus::Warning);
        assert_eq!(thresholds.classify(70.0), HealthStatus::Warning);
        assert_eq!(thresholds.classify(69.9), HealthStatus::Critical);
    }

    #[test]
    fn test_classify_uses_configured_breakpoints() {
        let thresholds = HealthThresholds {
            good_min: 80.0,
            warning_min: 50.0,
        };
        assert_eq!(thresholds.classify(85.0), HealthStatus::Good);
        assert_eq!(thresholds.classify(60.0), HealthStatus::Warning);
        assert_eq!(thresholds.classify(40.0), HealthStatus::Critical);
    }

    #[test]
    fn test_contamination_bounds() {
        assert!(validate_contamination(0.05).is_ok());
        assert!(validate_contamination(0.0).is_err());
        assert!(validate_contamination(1.0).is_err());
        assert!(validate_contamination(1.5).is_err());
        assert!(validate_contamination(f64::NAN).is_err());
    }

    #[test]
    fn test_inverted_bounds_rejected() {
        let thresholds = ChannelThresholds {
            voltage: Some(Bounds::new(60.0, 40.0)),
            ..Default::default()
        };
        let err = validate_thresholds(&thresholds).unwrap_err();
        assert_eq!(err.category(), "configuration");
    }

    #[test]
    fn test_inverted_health_thresholds_rejected() {
        let thresholds = HealthThresholds {
            good_min: 60.0,
            warning_min: 80.0,
        };
        assert!(thresholds.validate().is_err());
    }

    #[test]
    fn test_defaults_validate() {
        assert!(AppConfig::default().analytics().validate().is_ok());
    }

    #[test]
    fn test_load_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("analytics.toml");
        std::fs::write(
            &path,
            r#"
[battery]
rated_capacity_ah = 280.0

[health]
good_min = 85.0

[anomaly]
scorer = "z_score"
default_contamination = 0.1

[anomaly.thresholds]
voltage = { min = 44.0, max = 58.0 }
"#,
        )
        .unwrap();

        let config = load_app_config(path.to_str().unwrap()).unwrap();
        assert_eq!(config.battery.rated_capacity_ah, 280.0);
        assert_eq!(config.health.good_min, 85.0);
        assert_eq!(config.health.warning_min, 70.0);
        assert_eq!(config.anomaly.scorer, ScorerKind::ZScore);
        assert_eq!(config.anomaly.thresholds.voltage, Some(Bounds::new(44.0, 58.0)));
        assert_eq!(config.anomaly.thresholds.current, None);
        assert_eq!(config.server.port, 8000);
    }
}
