//! Fault tolerant OpenTelemetry exporters.
//!
//! A collector that is down, restarting or not deployed yet should never
//! crash or stall the instrumented application. This crate provides two
//! building blocks for that:
//!
//! * [`ResilientExporter`], a wrapper around any logs, traces or metrics
//!   exporter. Failures are absorbed, reported once per outage, and followed
//!   by an exponential backoff during which exports are skipped without doing
//!   any work. An exporter that could not be built is created lazily by a
//!   later export. The wrapper implements the SDK exporter traits, so it can
//!   be handed to a provider in place of the exporter it wraps.
//! * A reachability prober, a background thread that waits (with backoff)
//!   until the collector endpoint accepts TCP connections and then attaches
//!   one wrapper per requested signal into a shared [`ExporterRegistry`].
//!
//! Delivery is best effort: records dropped during a backoff window are not
//! queued or replayed.
//!
//! # Wrapping an exporter
//!
//! ```no_run
//! use opentelemetry_resilient::{BackoffConfig, ResilientExporterBuilder};
//! use opentelemetry_sdk::trace::SdkTracerProvider;
//! use std::time::Duration;
//!
//! let exporter = ResilientExporterBuilder::default()
//!     .with_label("traces")
//!     .with_backoff(BackoffConfig::new(Duration::from_secs(1), Duration::from_secs(60)))
//!     .build(|| {
//!         opentelemetry_otlp::SpanExporter::builder()
//!             .with_http()
//!             .build()
//!             .map_err(Into::into)
//!     });
//!
//! let provider = SdkTracerProvider::builder()
//!     .with_batch_exporter(exporter)
//!     .build();
//! # drop(provider);
//! ```
//!
//! # Attaching once the collector is reachable
//!
//! ```no_run
//! use opentelemetry_resilient::{start_otlp_prober, ResilienceConfig};
//!
//! # fn main() -> Result<(), opentelemetry_resilient::Error> {
//! // OTEL_EXPORTER_OTLP_ENDPOINT, OTEL_RESILIENT_SIGNALS, ...
//! let config = ResilienceConfig::builder().build()?;
//! let prober = start_otlp_prober(&config)?;
//!
//! // later, once something was attached
//! if let Some(logs) = prober.registry().logs() {
//!     // hand `logs` to an SdkLoggerProvider
//! #   drop(logs);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Crate Feature Flags
//!
//! * `http-proto` (default): OTLP over HTTP with protobuf encoding.
//! * `http-json`: OTLP over HTTP with JSON encoding.
//! * `grpc-tonic`: OTLP over gRPC. Without it a `grpc` preference falls back
//!   to HTTP.
//! * `reqwest-blocking-client` (default), `reqwest-client`: HTTP client used
//!   by the OTLP exporters.
//! * `internal-logs` (default): operational events emitted through
//!   `tracing`, the way the SDK emits its own.
#![warn(missing_debug_implementations, missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

pub mod backoff;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod exporter;
mod logs;
mod metrics;
pub mod prober;
pub mod reachability;
pub mod registry;
pub mod report;
mod trace;
pub mod transport;

#[cfg(any(feature = "http-proto", feature = "http-json", feature = "grpc-tonic"))]
#[cfg_attr(
    docsrs,
    doc(cfg(any(feature = "http-proto", feature = "http-json", feature = "grpc-tonic")))
)]
pub mod otlp;

pub use backoff::BackoffConfig;
pub use config::{ResilienceConfig, ResilienceConfigBuilder};
pub use endpoint::{Endpoint, Signal};
pub use error::{BoxError, Error};
pub use exporter::{
    ExporterLifecycle, ExporterStatus, ResilientExporter, ResilientExporterBuilder,
};
pub use prober::{ProberBuilder, ProberHandle};
pub use reachability::{is_reachable, Probe, TcpProbe};
pub use registry::{AttachedExporter, ExporterRegistry};
pub use report::{FailureReporter, StderrReporter};
pub use transport::{select_transport, SignalExporters, Transport};

#[cfg(any(feature = "http-proto", feature = "http-json", feature = "grpc-tonic"))]
pub use otlp::{start_otlp_prober, OtlpExporters};
