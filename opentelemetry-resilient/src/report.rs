//! Diagnostic channel for exporter failures.
//!
//! Failure reports deliberately bypass `tracing` and the OpenTelemetry logs
//! pipeline: when the failing component is the logs exporter itself, routing
//! its own failure through it would loop.
use std::error::Error as StdError;
use std::fmt::{self, Debug, Display, Formatter};
use std::io::Write;

/// What a wrapper was doing when it failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The first exporter instantiation, when the wrapper was built.
    Construction,
    /// Re-instantiating an absent exporter from inside `export`.
    Recreation,
    /// The inner exporter's `export`.
    Export,
    /// The inner exporter's `shutdown`.
    Shutdown,
    /// The inner exporter's `force_flush`.
    ForceFlush,
}

impl FailureKind {
    /// The human readable report line.
    pub fn message(&self) -> &'static str {
        match self {
            FailureKind::Construction => {
                "initial exporter instantiation failed; will retry on export()"
            }
            FailureKind::Recreation => "OTLP exporter recreation failed; staying in backoff.",
            FailureKind::Export => {
                "OTLP export failed; entering backoff. Disabling immediate exports."
            }
            FailureKind::Shutdown => "Exception while shutting down OTLP exporter",
            FailureKind::ForceFlush => "Exception during force_flush",
        }
    }
}

impl Display for FailureKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// A single failure being reported.
#[derive(Debug)]
pub struct Failure<'a> {
    /// Label of the wrapper, usually the signal name.
    pub exporter: &'a str,
    /// The failing operation.
    pub kind: FailureKind,
    /// The underlying error.
    pub error: &'a (dyn StdError + 'static),
}

/// Receives failure reports. A wrapper calls it at most once per backoff
/// episode.
pub trait FailureReporter: Send + Sync + Debug {
    /// Reports one failure.
    fn report(&self, failure: &Failure<'_>);
}

/// Writes reports and their error source chain to standard error.
#[derive(Clone, Copy, Debug, Default)]
pub struct StderrReporter;

impl FailureReporter for StderrReporter {
    fn report(&self, failure: &Failure<'_>) {
        let stderr = std::io::stderr();
        // nowhere left to report to if stderr itself fails
        let _ = write_failure(&mut stderr.lock(), failure);
    }
}

fn write_failure<W: Write>(out: &mut W, failure: &Failure<'_>) -> std::io::Result<()> {
    writeln!(out, "[{}] {}", failure.exporter, failure.kind)?;
    writeln!(out, "  caused by: {}", failure.error)?;
    let mut source = failure.error.source();
    while let Some(err) = source {
        writeln!(out, "  caused by: {}", err)?;
        source = err.source();
    }
    Ok(())
}
