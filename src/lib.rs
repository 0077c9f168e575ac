pub mod config;
pub mod error;
pub mod inference;
pub mod server;
pub mod telemetry;
