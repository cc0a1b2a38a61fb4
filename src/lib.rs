// Battery analytics engine - telemetry normalization, health metrics and anomaly detection
pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod presentation;
