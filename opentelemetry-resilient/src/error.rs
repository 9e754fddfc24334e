//! Configuration errors.
//!
//! Only mistakes in how the crate is configured surface as [`Error`]. Runtime
//! failures of the collector or of an exporter are absorbed by the wrappers
//! and turned into backoff scheduling plus a single diagnostic report.
use thiserror::Error;

/// Boxed error returned by exporter factories.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur while configuring wrappers or starting the prober.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The requested signal is not one of `logs`, `traces` or `metrics`.
    #[error("unknown signal '{0}' (expected one of logs, traces, metrics)")]
    UnknownSignal(String),

    /// The endpoint could not be parsed into a host and port.
    #[error("invalid endpoint {0}. Reason {1}")]
    InvalidEndpoint(String, String),

    /// No endpoint was configured, either in code or through
    /// `OTEL_EXPORTER_OTLP_ENDPOINT`.
    #[error("no collector endpoint configured")]
    MissingEndpoint,

    /// Invalid configuration.
    #[error("{name}: {reason}")]
    InvalidConfig {
        /// The configuration name.
        name: String,
        /// The reason the configuration is invalid.
        reason: String,
    },

    /// Spawning the prober thread failed.
    #[error("spawning the prober thread failed: {0}")]
    ThreadSpawnFailed(#[source] std::io::Error),
}
