//! # Reachability prober
//!
//! A background thread that polls the collector endpoint until it answers,
//! then attaches one [`ResilientExporter`] per requested signal into an
//! [`ExporterRegistry`] and exits:
//!
//! ```text
//!  Polling --unreachable--> wait (backoff) --> Polling
//!     |
//!  reachable
//!     v
//!  Attaching (each signal in order) --> Idle (thread exits)
//! ```
//!
//! Attachment happens once. Losing the endpoint afterwards is handled by the
//! wrappers themselves, the prober does not come back.
use crate::backoff::{Backoff, BackoffConfig};
use crate::endpoint::{parse_signals, Endpoint, Signal};
use crate::error::{BoxError, Error};
use crate::exporter::{ExporterLifecycle, ResilientExporter, ResilientExporterBuilder};
use crate::reachability::{Probe, TcpProbe};
use crate::registry::{AttachedExporter, ExporterRegistry};
use crate::report::{FailureReporter, StderrReporter};
use crate::transport::SignalExporters;
use opentelemetry::{otel_debug, otel_error, otel_info, otel_warn, Context};
use std::fmt::{self, Debug, Formatter};
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

const PROBER_THREAD_NAME: &str = "OpenTelemetry.Resilient.Prober";

/// Configures and starts a prober.
pub struct ProberBuilder<S: SignalExporters, P = TcpProbe> {
    endpoint: Endpoint,
    exporters: Arc<S>,
    signals: Vec<Signal>,
    backoff: BackoffConfig,
    exporter_backoff: BackoffConfig,
    reporter: Arc<dyn FailureReporter>,
    probe: P,
    registry: Option<ExporterRegistry<S>>,
}

impl<S: SignalExporters> ProberBuilder<S, TcpProbe> {
    /// A prober for `endpoint` attaching the exporters `exporters` builds,
    /// for every signal, using a [`TcpProbe`] and default backoffs.
    pub fn new(endpoint: Endpoint, exporters: S) -> Self {
        ProberBuilder {
            endpoint,
            exporters: Arc::new(exporters),
            signals: Signal::ALL.to_vec(),
            backoff: BackoffConfig::default(),
            exporter_backoff: BackoffConfig::default(),
            reporter: Arc::new(StderrReporter),
            probe: TcpProbe::default(),
            registry: None,
        }
    }
}

impl<S: SignalExporters, P: Probe> ProberBuilder<S, P> {
    /// The signals to attach, in attachment order. Duplicates are ignored.
    pub fn with_signals(mut self, signals: impl IntoIterator<Item = Signal>) -> Self {
        self.signals.clear();
        for signal in signals {
            if !self.signals.contains(&signal) {
                self.signals.push(signal);
            }
        }
        self
    }

    /// The signals to attach, by name.
    ///
    /// Fails with [`Error::UnknownSignal`] on the first name that is not
    /// `logs`, `traces` or `metrics`.
    pub fn with_signal_names<I, N>(self, names: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = N>,
        N: AsRef<str>,
    {
        let signals = parse_signals(names)?;
        Ok(self.with_signals(signals))
    }

    /// Backoff between reachability attempts.
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Backoff of the wrappers the prober attaches.
    pub fn with_exporter_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.exporter_backoff = backoff;
        self
    }

    /// Where the attached wrappers report failures.
    pub fn with_reporter(mut self, reporter: Arc<dyn FailureReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Attaches into an existing registry instead of a fresh one.
    pub fn with_registry(mut self, registry: ExporterRegistry<S>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Replaces the reachability check.
    pub fn with_probe<Q: Probe>(self, probe: Q) -> ProberBuilder<S, Q> {
        ProberBuilder {
            endpoint: self.endpoint,
            exporters: self.exporters,
            signals: self.signals,
            backoff: self.backoff,
            exporter_backoff: self.exporter_backoff,
            reporter: self.reporter,
            probe,
            registry: self.registry,
        }
    }

    /// Spawns the prober thread.
    ///
    /// The returned handle gives access to the registry being filled. Dropping
    /// it leaves the prober running.
    pub fn start(self) -> Result<ProberHandle<S>, Error> {
        let registry = self.registry.unwrap_or_default();
        let (control_tx, control_rx) = mpsc::sync_channel(1);
        let prober = Prober {
            endpoint: self.endpoint,
            exporters: self.exporters,
            signals: self.signals,
            backoff: self.backoff,
            exporter_backoff: self.exporter_backoff,
            reporter: self.reporter,
            probe: self.probe,
            registry: registry.clone(),
        };

        let join = thread::Builder::new()
            .name(PROBER_THREAD_NAME.to_string())
            .spawn(move || prober.run(control_rx))
            .map_err(Error::ThreadSpawnFailed)?;

        Ok(ProberHandle {
            registry,
            control: control_tx,
            join,
        })
    }
}

impl<S: SignalExporters, P> Debug for ProberBuilder<S, P> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProberBuilder")
            .field("endpoint", &self.endpoint)
            .field("signals", &self.signals)
            .field("backoff", &self.backoff)
            .field("exporter_backoff", &self.exporter_backoff)
            .finish()
    }
}

/// Handle onto a running (or finished) prober.
pub struct ProberHandle<S: SignalExporters> {
    registry: ExporterRegistry<S>,
    control: SyncSender<()>,
    join: JoinHandle<()>,
}

impl<S: SignalExporters> ProberHandle<S> {
    /// The registry the prober attaches into.
    pub fn registry(&self) -> &ExporterRegistry<S> {
        &self.registry
    }

    /// Whether the prober thread has exited.
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wakes the prober from its backoff wait and ends it without attaching.
    ///
    /// Has no effect once attachment started.
    pub fn stop(&self) {
        // full means a stop is already pending, disconnected means it exited
        let _ = self.control.try_send(());
    }

    /// Waits for the prober thread to exit and returns the registry.
    pub fn join(self) -> ExporterRegistry<S> {
        if self.join.join().is_err() {
            otel_error!(name: "Prober.Panicked");
        }
        self.registry
    }
}

impl<S: SignalExporters> Debug for ProberHandle<S> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProberHandle")
            .field("registry", &self.registry)
            .field("finished", &self.is_finished())
            .finish()
    }
}

struct Prober<S: SignalExporters, P> {
    endpoint: Endpoint,
    exporters: Arc<S>,
    signals: Vec<Signal>,
    backoff: BackoffConfig,
    exporter_backoff: BackoffConfig,
    reporter: Arc<dyn FailureReporter>,
    probe: P,
    registry: ExporterRegistry<S>,
}

impl<S: SignalExporters, P: Probe> Prober<S, P> {
    fn run(self, control: Receiver<()>) {
        let _suppress_guard = Context::enter_telemetry_suppressed_scope();
        otel_info!(
            name: "Prober.Started",
            endpoint = self.endpoint.as_str(),
            signals = format!("{:?}", self.signals),
        );

        let mut backoff = Backoff::new(self.backoff);
        let mut attempt: u64 = 0;
        loop {
            attempt += 1;
            if self.probe_once() {
                otel_info!(
                    name: "Prober.EndpointReachable",
                    endpoint = self.endpoint.as_str(),
                    attempt = attempt,
                );
                break;
            }

            let wait = backoff.on_failure(Instant::now());
            otel_warn!(
                name: "Prober.EndpointUnreachable",
                endpoint = self.endpoint.as_str(),
                attempt = attempt,
                retry_in_millisecs = wait.as_millis(),
            );
            match control.recv_timeout(wait) {
                Ok(()) => {
                    otel_info!(name: "Prober.Stopped", attempt = attempt);
                    return;
                }
                Err(RecvTimeoutError::Timeout) => {}
                // the handle is gone, keep going as a daemon
                Err(RecvTimeoutError::Disconnected) => thread::sleep(wait),
            }
        }

        self.attach_all();
        otel_debug!(
            name: "Prober.Finished",
            attached = format!("{:?}", self.registry.signals()),
        );
    }

    fn probe_once(&self) -> bool {
        match panic::catch_unwind(AssertUnwindSafe(|| self.probe.is_reachable(&self.endpoint))) {
            Ok(reachable) => reachable,
            Err(_) => {
                otel_warn!(
                    name: "Prober.ProbePanicked",
                    endpoint = self.endpoint.as_str(),
                );
                false
            }
        }
    }

    fn attach_all(&self) {
        for signal in &self.signals {
            match panic::catch_unwind(AssertUnwindSafe(|| self.attach(*signal))) {
                Ok(exporter) => {
                    let attached = exporter.status().attached;
                    self.registry.insert(exporter);
                    otel_info!(
                        name: "Prober.ExporterAttached",
                        signal = signal.as_str(),
                        endpoint = self.endpoint.as_str(),
                        connected = attached,
                    );
                }
                Err(_) => {
                    otel_error!(
                        name: "Prober.AttachFailed",
                        signal = signal.as_str(),
                        endpoint = self.endpoint.as_str(),
                    );
                }
            }
        }
    }

    fn attach(&self, signal: Signal) -> AttachedExporter<S> {
        match signal {
            Signal::Logs => AttachedExporter::Logs(self.wrap(signal, S::logs)),
            Signal::Traces => AttachedExporter::Traces(self.wrap(signal, S::traces)),
            Signal::Metrics => AttachedExporter::Metrics(self.wrap(signal, S::metrics)),
        }
    }

    fn wrap<E, B>(&self, signal: Signal, build: B) -> ResilientExporter<E>
    where
        E: ExporterLifecycle,
        B: Fn(&S, &Endpoint) -> Result<E, BoxError> + Send + Sync + 'static,
    {
        let exporters = Arc::clone(&self.exporters);
        let endpoint = self.endpoint.clone();
        ResilientExporterBuilder::default()
            .with_label(signal.as_str())
            .with_backoff(self.exporter_backoff)
            .with_reporter(Arc::clone(&self.reporter))
            .build(move || build(&*exporters, &endpoint))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::tests::{NoopExporter, NoopExporters};
    use crate::report::tests::RecordingReporter;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn fast_backoff() -> BackoffConfig {
        BackoffConfig::new(Duration::from_millis(1), Duration::from_millis(4))
    }

    fn endpoint() -> Endpoint {
        Endpoint::parse("http://collector.test:4318").unwrap()
    }

    #[test]
    fn test_attaches_once_after_endpoint_becomes_reachable() {
        let calls = Arc::new(AtomicUsize::new(0));
        let probe = {
            let calls = Arc::clone(&calls);
            move |_: &Endpoint| calls.fetch_add(1, Ordering::SeqCst) >= 3
        };
        let reporter = Arc::new(RecordingReporter::default());

        let handle = ProberBuilder::new(endpoint(), NoopExporters::default())
            .with_backoff(fast_backoff())
            .with_reporter(reporter.clone())
            .with_probe(probe)
            .start()
            .unwrap();
        let registry = handle.join();

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(
            registry.signals(),
            vec![Signal::Logs, Signal::Traces, Signal::Metrics]
        );
        assert!(registry.logs().unwrap().status().attached);
        // a failing binding still registers a wrapper that heals later
        let metrics = registry.metrics().unwrap();
        assert!(!metrics.status().attached);
        assert_eq!(metrics.label(), "metrics");
        assert_eq!(reporter.count(), 1);
    }

    #[test]
    fn test_only_requested_signals_are_attached() {
        let handle = ProberBuilder::new(endpoint(), NoopExporters::default())
            .with_signal_names(["traces", "logs", "traces"])
            .unwrap()
            .with_reporter(Arc::new(RecordingReporter::default()))
            .with_probe(|_: &Endpoint| true)
            .start()
            .unwrap();
        let registry = handle.join();

        assert_eq!(registry.signals(), vec![Signal::Logs, Signal::Traces]);
        assert!(registry.metrics().is_none());
    }

    #[test]
    fn test_unknown_signal_fails_before_starting() {
        let probed = Arc::new(AtomicUsize::new(0));
        let probe = {
            let probed = Arc::clone(&probed);
            move |_: &Endpoint| {
                probed.fetch_add(1, Ordering::SeqCst);
                true
            }
        };

        let result = ProberBuilder::new(endpoint(), NoopExporters::default())
            .with_probe(probe)
            .with_signal_names(["logs", "profiles"]);

        assert!(matches!(result, Err(Error::UnknownSignal(name)) if name == "profiles"));
        assert_eq!(probed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_stop_ends_polling_without_attaching() {
        let handle = ProberBuilder::new(endpoint(), NoopExporters::default())
            .with_backoff(BackoffConfig::new(
                Duration::from_secs(60),
                Duration::from_secs(60),
            ))
            .with_probe(|_: &Endpoint| false)
            .start()
            .unwrap();

        handle.stop();
        let registry = handle.join();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_panicking_probe_counts_as_unreachable() {
        let calls = Arc::new(AtomicUsize::new(0));
        let probe = {
            let calls = Arc::clone(&calls);
            move |_: &Endpoint| {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    panic!("resolver exploded");
                }
                true
            }
        };

        let registry = ProberBuilder::new(endpoint(), NoopExporters::default())
            .with_signals([Signal::Logs])
            .with_backoff(fast_backoff())
            .with_probe(probe)
            .start()
            .unwrap()
            .join();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(registry.signals(), vec![Signal::Logs]);
    }

    #[derive(Debug, Default)]
    struct PanickingTraces(NoopExporters);

    impl SignalExporters for PanickingTraces {
        type Logs = NoopExporter;
        type Traces = NoopExporter;
        type Metrics = NoopExporter;

        fn logs(&self, endpoint: &Endpoint) -> Result<NoopExporter, BoxError> {
            self.0.logs(endpoint)
        }

        fn traces(&self, _endpoint: &Endpoint) -> Result<NoopExporter, BoxError> {
            panic!("traces binding exploded");
        }

        fn metrics(&self, endpoint: &Endpoint) -> Result<NoopExporter, BoxError> {
            self.0.metrics(endpoint)
        }
    }

    #[test]
    fn test_panicking_binding_skips_only_its_signal() {
        let registry = ProberBuilder::new(endpoint(), PanickingTraces::default())
            .with_reporter(Arc::new(RecordingReporter::default()))
            .with_probe(|_: &Endpoint| true)
            .start()
            .unwrap()
            .join();

        assert_eq!(registry.signals(), vec![Signal::Logs, Signal::Metrics]);
        assert!(registry.traces().is_none());
    }

    #[test]
    fn test_attaches_into_provided_registry() {
        let registry = ExporterRegistry::<NoopExporters>::new();
        let handle = ProberBuilder::new(endpoint(), NoopExporters::default())
            .with_signals([Signal::Traces])
            .with_registry(registry.clone())
            .with_probe(|_: &Endpoint| true)
            .start()
            .unwrap();

        handle.join();
        assert!(registry.contains(Signal::Traces));
    }
}
