// Domain layer - Battery telemetry, metrics and anomaly models
pub mod anomaly;
pub mod error;
pub mod metrics;
pub mod telemetry;
