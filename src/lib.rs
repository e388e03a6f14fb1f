pub mod configuration;
pub mod error;
pub mod refresh_token;
pub mod telemetry;
