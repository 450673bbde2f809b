//! Infrastructure concerns shared by the branch layer.

/// Runtime settings loaded from defaults and environment.
pub mod config;
/// Logging/tracing setup.
pub mod telemetry;

pub use config::Settings;
