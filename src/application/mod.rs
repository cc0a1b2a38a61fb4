// Application layer - Use cases over the battery domain
pub mod anomaly_detector;
pub mod engine;
pub mod features;
pub mod history_repository;
pub mod metrics_calculator;
pub mod normalizer;
pub mod outlier;
