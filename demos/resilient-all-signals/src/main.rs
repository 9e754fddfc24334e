//! Runs a small workload that emits logs, spans and metrics while the OTLP
//! collector may be down, not deployed yet, or restarting.
//!
//! ```shell
//! OTEL_EXPORTER_OTLP_ENDPOINT=http://localhost:4318 cargo run -p resilient-all-signals
//! ```
//!
//! Start or stop the collector while it runs: exports pause with backoff,
//! the application keeps going.
use opentelemetry::logs::{LogRecord, Logger, LoggerProvider, Severity};
use opentelemetry::metrics::{Counter, MeterProvider};
use opentelemetry::trace::{Span, Tracer, TracerProvider};
use opentelemetry::KeyValue;
use opentelemetry_resilient::{
    start_otlp_prober, ExporterRegistry, OtlpExporters, ResilienceConfig,
};
use opentelemetry_sdk::logs::{SdkLogger, SdkLoggerProvider};
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::{SdkTracer, SdkTracerProvider};
use opentelemetry_sdk::Resource;
use std::error::Error;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

const ITERATIONS: u64 = 30;
const INTERVAL: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(8);
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);
const SCOPE: &str = "resilient-all-signals";

fn resource() -> Resource {
    Resource::builder().with_service_name("resilient-demo").build()
}

/// Providers installed over the wrappers attached so far.
#[derive(Default)]
struct Pipelines {
    logs: Option<(SdkLoggerProvider, SdkLogger)>,
    traces: Option<(SdkTracerProvider, SdkTracer)>,
    metrics: Option<(SdkMeterProvider, Counter<u64>)>,
}

impl Pipelines {
    fn install_attached(&mut self, registry: &ExporterRegistry<OtlpExporters>) {
        if self.logs.is_none() {
            if let Some(exporter) = registry.logs() {
                let provider = SdkLoggerProvider::builder()
                    .with_resource(resource())
                    .with_batch_exporter(exporter)
                    .build();
                let logger = provider.logger(SCOPE);
                info!("logs exporter attached");
                self.logs = Some((provider, logger));
            }
        }

        if self.traces.is_none() {
            if let Some(exporter) = registry.traces() {
                let provider = SdkTracerProvider::builder()
                    .with_resource(resource())
                    .with_batch_exporter(exporter)
                    .build();
                let tracer = provider.tracer(SCOPE);
                info!("traces exporter attached");
                self.traces = Some((provider, tracer));
            }
        }

        if self.metrics.is_none() {
            if let Some(exporter) = registry.metrics() {
                let provider = SdkMeterProvider::builder()
                    .with_resource(resource())
                    .with_periodic_exporter(exporter)
                    .build();
                let counter = provider
                    .meter(SCOPE)
                    .u64_counter("demo.iterations")
                    .with_description("Iterations of the demo workload")
                    .build();
                info!("metrics exporter attached");
                self.metrics = Some((provider, counter));
            }
        }
    }

    fn record(&self, iteration: u64) {
        let attributes = [KeyValue::new("iteration", iteration as i64)];

        if let Some((_, tracer)) = &self.traces {
            let mut span = tracer.start("work");
            span.set_attributes(attributes.clone());
            thread::sleep(Duration::from_millis(10));
            span.end();
        }

        if let Some((_, counter)) = &self.metrics {
            counter.add(1, &attributes);
        }

        if let Some((_, logger)) = &self.logs {
            let mut record = logger.create_log_record();
            record.set_severity_number(Severity::Info);
            record.set_severity_text("INFO");
            record.set_body(format!("iteration {iteration} done").into());
            record.add_attribute("iteration", iteration as i64);
            logger.emit(record);
        }
    }

    /// Pushes what the processors still buffer into the exporters.
    fn force_flush(&self) {
        if let Some((provider, _)) = &self.traces {
            if let Err(err) = provider.force_flush() {
                warn!(error = %err, "tracer provider flush failed");
            }
        }
        if let Some((provider, _)) = &self.metrics {
            if let Err(err) = provider.force_flush() {
                warn!(error = %err, "meter provider flush failed");
            }
        }
        if let Some((provider, _)) = &self.logs {
            if let Err(err) = provider.force_flush() {
                warn!(error = %err, "logger provider flush failed");
            }
        }
    }

    fn shutdown(self) {
        if let Some((provider, _)) = self.traces {
            if let Err(err) = provider.shutdown() {
                warn!(error = %err, "tracer provider shutdown failed");
            }
        }
        if let Some((provider, _)) = self.metrics {
            if let Err(err) = provider.shutdown() {
                warn!(error = %err, "meter provider shutdown failed");
            }
        }
        if let Some((provider, _)) = self.logs {
            if let Err(err) = provider.shutdown() {
                warn!(error = %err, "logger provider shutdown failed");
            }
        }
    }
}

fn init_tracing() -> Result<(), Box<dyn Error + Send + Sync + 'static>> {
    // keep the HTTP stack's own events away from the console
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"))
        .add_directive("hyper=error".parse()?)
        .add_directive("reqwest=error".parse()?);

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(filter))
        .init();
    Ok(())
}

fn main() -> Result<(), Box<dyn Error + Send + Sync + 'static>> {
    init_tracing()?;

    let config = ResilienceConfig::builder()
        .with_max_backoff(MAX_BACKOFF)
        .build()?;
    let prober = match config.endpoint() {
        Some(endpoint) => {
            info!(%endpoint, signals = ?config.signals(), "starting prober");
            Some(start_otlp_prober(&config)?)
        }
        None => {
            info!("OTEL_EXPORTER_OTLP_ENDPOINT is not set, running without exporters");
            None
        }
    };

    let mut pipelines = Pipelines::default();
    for iteration in 0..ITERATIONS {
        if let Some(prober) = &prober {
            pipelines.install_attached(prober.registry());
        }
        pipelines.record(iteration);
        thread::sleep(INTERVAL);
    }

    pipelines.force_flush();
    // exporters attached after the last iteration have no provider yet
    if let Some(prober) = &prober {
        if !prober.registry().force_flush(FLUSH_TIMEOUT) {
            warn!("not every attached exporter could be flushed");
        }
    }
    pipelines.shutdown();
    if let Some(prober) = prober {
        prober.registry().shutdown();
        info!(finished = prober.is_finished(), "shut down");
    }
    Ok(())
}
