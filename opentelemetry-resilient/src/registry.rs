//! The set of wrappers attached so far, shared between the prober that fills
//! it and the code that exports through, flushes or shuts down its entries.
use crate::endpoint::Signal;
use crate::exporter::{ExporterStatus, ResilientExporter};
use crate::transport::SignalExporters;
use opentelemetry::otel_debug;
use std::fmt::{self, Debug, Formatter};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

/// One attached wrapper, typed by its signal.
pub enum AttachedExporter<S: SignalExporters> {
    /// The logs wrapper.
    Logs(ResilientExporter<S::Logs>),
    /// The traces wrapper.
    Traces(ResilientExporter<S::Traces>),
    /// The metrics wrapper.
    Metrics(ResilientExporter<S::Metrics>),
}

impl<S: SignalExporters> AttachedExporter<S> {
    /// The signal this wrapper exports.
    pub fn signal(&self) -> Signal {
        match self {
            AttachedExporter::Logs(_) => Signal::Logs,
            AttachedExporter::Traces(_) => Signal::Traces,
            AttachedExporter::Metrics(_) => Signal::Metrics,
        }
    }

    /// See [`ResilientExporter::status`].
    pub fn status(&self) -> ExporterStatus {
        match self {
            AttachedExporter::Logs(e) => e.status(),
            AttachedExporter::Traces(e) => e.status(),
            AttachedExporter::Metrics(e) => e.status(),
        }
    }

    /// See [`ResilientExporter::force_flush`].
    pub fn force_flush(&self, timeout: Duration) -> bool {
        match self {
            AttachedExporter::Logs(e) => e.force_flush(timeout),
            AttachedExporter::Traces(e) => e.force_flush(timeout),
            AttachedExporter::Metrics(e) => e.force_flush(timeout),
        }
    }

    /// See [`ResilientExporter::shutdown`].
    pub fn shutdown(&self) {
        match self {
            AttachedExporter::Logs(e) => e.shutdown(),
            AttachedExporter::Traces(e) => e.shutdown(),
            AttachedExporter::Metrics(e) => e.shutdown(),
        }
    }
}

impl<S: SignalExporters> Clone for AttachedExporter<S> {
    fn clone(&self) -> Self {
        match self {
            AttachedExporter::Logs(e) => AttachedExporter::Logs(e.clone()),
            AttachedExporter::Traces(e) => AttachedExporter::Traces(e.clone()),
            AttachedExporter::Metrics(e) => AttachedExporter::Metrics(e.clone()),
        }
    }
}

impl<S: SignalExporters> Debug for AttachedExporter<S> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            AttachedExporter::Logs(e) => f.debug_tuple("Logs").field(e).finish(),
            AttachedExporter::Traces(e) => f.debug_tuple("Traces").field(e).finish(),
            AttachedExporter::Metrics(e) => f.debug_tuple("Metrics").field(e).finish(),
        }
    }
}

struct Slots<S: SignalExporters> {
    logs: Option<ResilientExporter<S::Logs>>,
    traces: Option<ResilientExporter<S::Traces>>,
    metrics: Option<ResilientExporter<S::Metrics>>,
}

/// Shared mapping from [`Signal`] to its attached wrapper.
///
/// Cloning yields another handle onto the same registry. Only the prober
/// inserts; everyone else reads.
pub struct ExporterRegistry<S: SignalExporters> {
    slots: Arc<RwLock<Slots<S>>>,
}

impl<S: SignalExporters> ExporterRegistry<S> {
    /// An empty registry.
    pub fn new() -> Self {
        ExporterRegistry {
            slots: Arc::new(RwLock::new(Slots {
                logs: None,
                traces: None,
                metrics: None,
            })),
        }
    }

    /// The logs wrapper, once attached.
    pub fn logs(&self) -> Option<ResilientExporter<S::Logs>> {
        self.read().logs.clone()
    }

    /// The traces wrapper, once attached.
    pub fn traces(&self) -> Option<ResilientExporter<S::Traces>> {
        self.read().traces.clone()
    }

    /// The metrics wrapper, once attached.
    pub fn metrics(&self) -> Option<ResilientExporter<S::Metrics>> {
        self.read().metrics.clone()
    }

    /// The wrapper attached for `signal`, if any.
    pub fn get(&self, signal: Signal) -> Option<AttachedExporter<S>> {
        let slots = self.read();
        match signal {
            Signal::Logs => slots.logs.clone().map(AttachedExporter::Logs),
            Signal::Traces => slots.traces.clone().map(AttachedExporter::Traces),
            Signal::Metrics => slots.metrics.clone().map(AttachedExporter::Metrics),
        }
    }

    /// Whether a wrapper is attached for `signal`.
    pub fn contains(&self, signal: Signal) -> bool {
        let slots = self.read();
        match signal {
            Signal::Logs => slots.logs.is_some(),
            Signal::Traces => slots.traces.is_some(),
            Signal::Metrics => slots.metrics.is_some(),
        }
    }

    /// Whether nothing is attached yet.
    pub fn is_empty(&self) -> bool {
        Signal::ALL.iter().all(|signal| !self.contains(*signal))
    }

    /// The signals with an attached wrapper, in `logs, traces, metrics` order.
    pub fn signals(&self) -> Vec<Signal> {
        Signal::ALL
            .into_iter()
            .filter(|signal| self.contains(*signal))
            .collect()
    }

    /// A snapshot of every attached wrapper.
    ///
    /// The lock is released before the snapshot is returned, so working on
    /// the entries never blocks the prober.
    pub fn attached(&self) -> Vec<AttachedExporter<S>> {
        Signal::ALL
            .into_iter()
            .filter_map(|signal| self.get(signal))
            .collect()
    }

    /// Flushes every attached wrapper, returning `true` if all succeeded.
    pub fn force_flush(&self, timeout: Duration) -> bool {
        self.attached().iter().fold(true, |ok, exporter| {
            let flushed = exporter.force_flush(timeout);
            otel_debug!(
                name: "ExporterRegistry.ForceFlush",
                signal = exporter.signal().as_str(),
                success = flushed,
            );
            ok && flushed
        })
    }

    /// Shuts every attached wrapper down. The entries stay registered.
    pub fn shutdown(&self) {
        for exporter in self.attached() {
            exporter.shutdown();
            otel_debug!(
                name: "ExporterRegistry.Shutdown",
                signal = exporter.signal().as_str(),
            );
        }
    }

    /// Registers `exporter`, replacing a previous one for the same signal.
    pub(crate) fn insert(&self, exporter: AttachedExporter<S>) {
        let mut slots = self.write();
        match exporter {
            AttachedExporter::Logs(e) => slots.logs = Some(e),
            AttachedExporter::Traces(e) => slots.traces = Some(e),
            AttachedExporter::Metrics(e) => slots.metrics = Some(e),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Slots<S>> {
        self.slots.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Slots<S>> {
        self.slots.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<S: SignalExporters> Default for ExporterRegistry<S> {
    fn default() -> Self {
        ExporterRegistry::new()
    }
}

impl<S: SignalExporters> Clone for ExporterRegistry<S> {
    fn clone(&self) -> Self {
        ExporterRegistry {
            slots: Arc::clone(&self.slots),
        }
    }
}

impl<S: SignalExporters> Debug for ExporterRegistry<S> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExporterRegistry")
            .field("attached", &self.signals())
            .finish()
    }
}
