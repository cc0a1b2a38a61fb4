// Infrastructure layer - External dependencies and adapters
pub mod config;
pub mod csv_source;
pub mod file_repository;
pub mod http_response;
pub mod memory_repository;
