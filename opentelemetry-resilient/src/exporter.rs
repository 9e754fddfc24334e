//! # Resilient exporter
//!
//! [`ResilientExporter`] wraps an exporter together with the factory that
//! creates it. A failing collector never turns into an error for the caller:
//!
//! * an export attempted inside an open backoff window is skipped without
//!   touching the inner exporter or the factory,
//! * a failed export or a failed (re)instantiation opens a window of the
//!   current delay and doubles the delay, up to the configured maximum,
//! * the first failure of a backoff episode is sent to the
//!   [`FailureReporter`], the following ones are not,
//! * an inner exporter that could never be built is created lazily by the
//!   next export attempt that is out of the window,
//! * a success resets the delay and ends the episode.
//!
//! The wrapper is a cheap handle, clones share the same exporter and state.
//! It implements the SDK exporter traits for logs, traces and metrics, so it
//! can be handed to a provider like any other exporter.
use crate::backoff::{Backoff, BackoffConfig};
use crate::error::BoxError;
use crate::report::{Failure, FailureKind, FailureReporter, StderrReporter};
use opentelemetry::{otel_debug, Context};
use opentelemetry_sdk::error::OTelSdkResult;
use opentelemetry_sdk::Resource;
use std::error::Error as StdError;
use std::fmt::{self, Debug, Formatter};
use std::future::Future;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Timeout passed to the inner exporter when the caller does not pick one.
pub const DEFAULT_FORCE_FLUSH_TIMEOUT: Duration = Duration::from_millis(30_000);

/// The optional part of the exporter contract.
///
/// Every method defaults to a successful no-op, so an exporter without a
/// meaningful shutdown or flush only needs an empty `impl`.
pub trait ExporterLifecycle: Send + Sync + 'static {
    /// Releases the exporter's resources.
    fn shutdown(&mut self) -> OTelSdkResult {
        Ok(())
    }

    /// Flushes anything buffered, waiting up to `timeout` where supported.
    fn force_flush(&mut self, _timeout: Duration) -> OTelSdkResult {
        Ok(())
    }

    /// Sets the resource describing the entity producing telemetry.
    fn set_resource(&mut self, _resource: &Resource) {}
}

type Factory<E> = Box<dyn Fn() -> Result<E, BoxError> + Send + Sync>;

/// Point in time view of a wrapper's state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExporterStatus {
    /// An inner exporter instance is present.
    pub attached: bool,
    /// The current backoff episode has already been reported.
    pub failure_reported: bool,
    /// Delay the next failure will wait for.
    pub current_delay: Duration,
    /// Exports are skipped until the open window expires.
    pub throttled: bool,
    /// The wrapper has been shut down.
    pub shut_down: bool,
}

/// An exporter that isolates the application from collector failures.
///
/// Built with [`ResilientExporterBuilder`], or [`ResilientExporter::new`] for
/// the defaults.
pub struct ResilientExporter<E> {
    shared: Arc<Shared<E>>,
}

struct Shared<E> {
    label: String,
    factory: Factory<E>,
    reporter: Arc<dyn FailureReporter>,
    state: Mutex<State<E>>,
    // notified each time an export releases the inner exporter
    export_done: Condvar,
}

struct State<E> {
    inner: Option<Arc<E>>,
    backoff: Backoff,
    reported: bool,
    is_shutdown: bool,
    resource: Option<Resource>,
    // shut down by whichever export releases it last
    pending_shutdown: Option<Arc<E>>,
}

impl<E> State<E> {
    fn recover(&mut self) {
        self.reported = false;
        self.backoff.on_success();
    }
}

impl<E> Clone for ResilientExporter<E> {
    fn clone(&self) -> Self {
        ResilientExporter {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<E> Debug for ResilientExporter<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilientExporter")
            .field("label", &self.shared.label)
            .field("status", &self.status())
            .finish()
    }
}

impl<E> ResilientExporter<E> {
    /// The label used in reports and internal logs.
    pub fn label(&self) -> &str {
        &self.shared.label
    }

    /// A snapshot of the wrapper's state.
    pub fn status(&self) -> ExporterStatus {
        let state = self.lock();
        ExporterStatus {
            attached: state.inner.is_some(),
            failure_reported: state.reported,
            current_delay: state.backoff.current_delay(),
            throttled: state.backoff.is_throttled(Instant::now()),
            shut_down: state.is_shutdown,
        }
    }

    /// Runs `f` against the inner exporter, if there is one.
    pub(crate) fn with_inner<R>(&self, f: impl FnOnce(&E) -> R) -> Option<R> {
        self.lock().inner.as_deref().map(f)
    }

    fn lock(&self) -> MutexGuard<'_, State<E>> {
        // every critical section leaves the state consistent
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn report_once(
        &self,
        state: &mut State<E>,
        kind: FailureKind,
        error: &(dyn StdError + 'static),
    ) {
        if state.reported {
            return;
        }
        state.reported = true;
        self.shared.reporter.report(&Failure {
            exporter: &self.shared.label,
            kind,
            error,
        });
    }

    fn enter_backoff(
        &self,
        state: &mut State<E>,
        kind: FailureKind,
        error: &(dyn StdError + 'static),
    ) {
        let now = Instant::now();
        // a concurrent attempt already opened the window for this failure
        if state.backoff.is_throttled(now) {
            return;
        }
        self.report_once(state, kind, error);
        let wait = state.backoff.on_failure(now);
        otel_debug!(
            name: "ResilientExporter.RetryScheduled",
            exporter = self.shared.label.as_str(),
            retry_in_millisecs = wait.as_millis(),
        );
    }

    fn record_success(&self) {
        let mut state = self.lock();
        if state.reported || state.backoff.is_backing_off() {
            state.recover();
            otel_debug!(
                name: "ResilientExporter.Recovered",
                exporter = self.shared.label.as_str(),
            );
        }
    }

    fn record_failure(&self, kind: FailureKind, error: &(dyn StdError + 'static)) {
        let mut state = self.lock();
        self.enter_backoff(&mut state, kind, error);
    }
}

impl<E: ExporterLifecycle> ResilientExporter<E> {
    /// Wraps the exporter `factory` creates, with the default backoff and the
    /// [`StderrReporter`].
    ///
    /// The factory is invoked once right away. If it fails the failure is
    /// reported and the wrapper starts without an inner exporter.
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> Result<E, BoxError> + Send + Sync + 'static,
    {
        ResilientExporterBuilder::default().build(factory)
    }

    /// Runs one export attempt.
    ///
    /// Returns `None` without doing any work inside a backoff window or after
    /// shutdown. Otherwise the inner exporter is (re)created if absent and
    /// handed to `op`; `None` is returned if that fails or `op` fails.
    pub async fn export_with<T, Err, F, Fut>(&self, op: F) -> Option<T>
    where
        F: FnOnce(Arc<E>) -> Fut,
        Fut: Future<Output = Result<T, Err>>,
        Err: StdError + 'static,
    {
        let inner = self.acquire()?;
        let _finished = ExportFinished(self);
        let result = op(inner).await;
        match result {
            Ok(value) => {
                self.record_success();
                Some(value)
            }
            Err(err) => {
                self.record_failure(FailureKind::Export, &err);
                None
            }
        }
    }

    /// Shuts the inner exporter down and marks the wrapper terminal.
    ///
    /// Failures are reported and swallowed. Calling it again, or without an
    /// inner exporter, does nothing. While an export is running the inner
    /// shutdown is deferred until that export returns.
    pub fn shutdown(&self) {
        let exporter = {
            let mut state = self.lock();
            state.is_shutdown = true;
            let Some(inner) = state.inner.take() else {
                return;
            };
            match Arc::try_unwrap(inner) {
                Ok(exporter) => exporter,
                Err(inner) => {
                    state.pending_shutdown = Some(inner);
                    otel_debug!(
                        name: "ResilientExporter.ShutdownDuringExport",
                        exporter = self.shared.label.as_str(),
                    );
                    return;
                }
            }
        };
        self.shutdown_inner(exporter);
    }

    /// Flushes the inner exporter, passing `timeout` through.
    ///
    /// Returns `true` when there is nothing to flush. Exports running
    /// concurrently are waited for, up to `timeout`. A failure is reported
    /// and yields `false`, as does a timeout while waiting.
    pub fn force_flush(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.lock();
        loop {
            let Some(inner) = state.inner.as_mut() else {
                return true;
            };
            if let Some(exporter) = Arc::get_mut(inner) {
                return match exporter.force_flush(timeout) {
                    Ok(()) => true,
                    Err(err) => {
                        self.report_once(&mut state, FailureKind::ForceFlush, &err);
                        false
                    }
                };
            }

            let wait = deadline.map_or(timeout, |deadline| {
                deadline.saturating_duration_since(Instant::now())
            });
            if wait.is_zero() {
                otel_debug!(
                    name: "ResilientExporter.ForceFlushTimedOut",
                    exporter = self.shared.label.as_str(),
                );
                return false;
            }
            state = self
                .shared
                .export_done
                .wait_timeout(state, wait)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Remembers `resource` for every exporter created from now on and
    /// applies it to the current one.
    pub fn set_resource(&self, resource: &Resource) {
        let mut state = self.lock();
        state.resource = Some(resource.clone());
        if let Some(exporter) = state.inner.as_mut().and_then(Arc::get_mut) {
            exporter.set_resource(resource);
        }
    }

    fn acquire(&self) -> Option<Arc<E>> {
        let mut state = self.lock();
        if state.is_shutdown || state.backoff.is_throttled(Instant::now()) {
            return None;
        }
        if let Some(inner) = &state.inner {
            return Some(Arc::clone(inner));
        }

        match self.instantiate() {
            Ok(mut exporter) => {
                if let Some(resource) = &state.resource {
                    exporter.set_resource(resource);
                }
                let inner = Arc::new(exporter);
                state.inner = Some(Arc::clone(&inner));
                state.recover();
                otel_debug!(
                    name: "ResilientExporter.Recreated",
                    exporter = self.shared.label.as_str(),
                );
                Some(inner)
            }
            Err(err) => {
                self.enter_backoff(&mut state, FailureKind::Recreation, &*err);
                None
            }
        }
    }

    fn shutdown_inner(&self, mut exporter: E) {
        if let Err(err) = exporter.shutdown() {
            let mut state = self.lock();
            self.report_once(&mut state, FailureKind::Shutdown, &err);
        }
    }

    fn finish_export(&self) {
        let exporter = {
            let mut state = self.lock();
            self.shared.export_done.notify_all();
            match state.pending_shutdown.take().map(Arc::try_unwrap) {
                Some(Ok(exporter)) => exporter,
                Some(Err(inner)) => {
                    state.pending_shutdown = Some(inner);
                    return;
                }
                None => return,
            }
        };
        self.shutdown_inner(exporter);
    }

    fn instantiate(&self) -> Result<E, BoxError> {
        let _suppress_guard = Context::enter_telemetry_suppressed_scope();
        (self.shared.factory)()
    }
}

// Runs once the export future is gone, including when it was cancelled.
struct ExportFinished<'a, E: ExporterLifecycle>(&'a ResilientExporter<E>);

impl<E: ExporterLifecycle> Drop for ExportFinished<'_, E> {
    fn drop(&mut self) {
        self.0.finish_export();
    }
}

/// Configures and builds a [`ResilientExporter`].
#[derive(Debug)]
pub struct ResilientExporterBuilder {
    label: String,
    backoff: BackoffConfig,
    reporter: Arc<dyn FailureReporter>,
}

impl Default for ResilientExporterBuilder {
    fn default() -> Self {
        ResilientExporterBuilder {
            label: "exporter".to_string(),
            backoff: BackoffConfig::default(),
            reporter: Arc::new(StderrReporter),
        }
    }
}

impl ResilientExporterBuilder {
    /// Label used in reports, usually the signal name.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Backoff bounds. Defaults to 1s initial, 300s maximum.
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Where failures are reported. Defaults to [`StderrReporter`].
    pub fn with_reporter(mut self, reporter: Arc<dyn FailureReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Builds the wrapper and attempts the first instantiation.
    pub fn build<E, F>(self, factory: F) -> ResilientExporter<E>
    where
        E: ExporterLifecycle,
        F: Fn() -> Result<E, BoxError> + Send + Sync + 'static,
    {
        let wrapper = ResilientExporter {
            shared: Arc::new(Shared {
                label: self.label,
                factory: Box::new(factory),
                reporter: self.reporter,
                state: Mutex::new(State {
                    inner: None,
                    backoff: Backoff::new(self.backoff),
                    reported: false,
                    is_shutdown: false,
                    resource: None,
                    pending_shutdown: None,
                }),
                export_done: Condvar::new(),
            }),
        };

        match wrapper.instantiate() {
            Ok(exporter) => wrapper.lock().inner = Some(Arc::new(exporter)),
            Err(err) => {
                let mut state = wrapper.lock();
                wrapper.report_once(&mut state, FailureKind::Construction, &*err);
            }
        }
        wrapper
    }
}
