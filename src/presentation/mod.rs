// Presentation layer - HTTP adapter over the analytics engine
pub mod app_state;
pub mod dto;
pub mod handlers;
