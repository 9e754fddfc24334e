//! [`SignalExporters`] bindings onto the `opentelemetry-otlp` exporters.
use crate::config::ResilienceConfig;
use crate::endpoint::{Endpoint, Signal};
use crate::error::{BoxError, Error};
use crate::exporter::ExporterLifecycle;
use crate::prober::{ProberBuilder, ProberHandle};
use crate::reachability::TcpProbe;
use crate::transport::{exporter_url, SignalExporters, Transport, TransportSelection};
use opentelemetry::otel_warn;
use opentelemetry_otlp::{
    LogExporter as OtlpLogExporter, MetricExporter as OtlpMetricExporter,
    SpanExporter as OtlpSpanExporter, WithExportConfig,
};
use opentelemetry_sdk::error::OTelSdkResult;
use opentelemetry_sdk::logs::LogExporter;
use opentelemetry_sdk::metrics::exporter::PushMetricExporter;
use opentelemetry_sdk::trace::SpanExporter;
use opentelemetry_sdk::Resource;
use std::time::Duration;

#[cfg(any(feature = "http-proto", feature = "http-json"))]
use opentelemetry_otlp::Protocol;

/// Builds `opentelemetry-otlp` exporters for one transport.
#[derive(Clone, Debug)]
pub struct OtlpExporters {
    transport: Transport,
    timeout: Option<Duration>,
}

impl OtlpExporters {
    /// Bindings for `transport` with the OTLP crate's default timeout.
    pub fn new(transport: Transport) -> Self {
        OtlpExporters {
            transport,
            timeout: None,
        }
    }

    /// Bindings for the outcome of [`select_transport`](crate::transport::select_transport).
    pub fn from_selection(selection: &TransportSelection) -> Self {
        OtlpExporters::new(selection.transport)
    }

    /// Export timeout handed to every exporter builder.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The transport exporters are built for.
    pub fn transport(&self) -> Transport {
        self.transport
    }
}

#[cfg(any(feature = "http-proto", feature = "http-json"))]
fn http_protocol(transport: Transport) -> Protocol {
    match transport {
        #[cfg(feature = "http-json")]
        Transport::HttpJson => Protocol::HttpJson,
        _ => Protocol::HttpBinary,
    }
}

macro_rules! build_otlp_exporter {
    ($exporter:ty, $bindings:expr, $endpoint:expr, $signal:expr) => {{
        let bindings: &OtlpExporters = $bindings;
        let url = exporter_url(bindings.transport, $endpoint, $signal);
        match bindings.transport {
            #[cfg(feature = "grpc-tonic")]
            Transport::Grpc => {
                let builder = <$exporter>::builder().with_tonic().with_endpoint(url);
                let builder = match bindings.timeout {
                    Some(timeout) => builder.with_timeout(timeout),
                    None => builder,
                };
                builder.build().map_err(BoxError::from)
            }
            #[cfg(any(feature = "http-proto", feature = "http-json"))]
            Transport::HttpBinary | Transport::HttpJson => {
                let builder = <$exporter>::builder()
                    .with_http()
                    .with_endpoint(url)
                    .with_protocol(http_protocol(bindings.transport));
                let builder = match bindings.timeout {
                    Some(timeout) => builder.with_timeout(timeout),
                    None => builder,
                };
                builder.build().map_err(BoxError::from)
            }
            #[allow(unreachable_patterns)]
            transport => Err(BoxError::from(format!(
                "no {} exporter is compiled into this build",
                transport
            ))),
        }
    }};
}

impl SignalExporters for OtlpExporters {
    type Logs = OtlpLogExporter;
    type Traces = OtlpSpanExporter;
    type Metrics = OtlpMetricExporter;

    fn logs(&self, endpoint: &Endpoint) -> Result<OtlpLogExporter, BoxError> {
        build_otlp_exporter!(OtlpLogExporter, self, endpoint, Signal::Logs)
    }

    fn traces(&self, endpoint: &Endpoint) -> Result<OtlpSpanExporter, BoxError> {
        build_otlp_exporter!(OtlpSpanExporter, self, endpoint, Signal::Traces)
    }

    fn metrics(&self, endpoint: &Endpoint) -> Result<OtlpMetricExporter, BoxError> {
        build_otlp_exporter!(OtlpMetricExporter, self, endpoint, Signal::Metrics)
    }
}

impl ExporterLifecycle for OtlpLogExporter {
    fn shutdown(&mut self) -> OTelSdkResult {
        LogExporter::shutdown(self)
    }

    fn set_resource(&mut self, resource: &Resource) {
        LogExporter::set_resource(self, resource)
    }
}

impl ExporterLifecycle for OtlpSpanExporter {
    fn shutdown(&mut self) -> OTelSdkResult {
        SpanExporter::shutdown(self)
    }

    fn force_flush(&mut self, _timeout: Duration) -> OTelSdkResult {
        SpanExporter::force_flush(self)
    }

    fn set_resource(&mut self, resource: &Resource) {
        SpanExporter::set_resource(self, resource)
    }
}

impl ExporterLifecycle for OtlpMetricExporter {
    fn shutdown(&mut self) -> OTelSdkResult {
        PushMetricExporter::shutdown(self)
    }

    fn force_flush(&mut self, _timeout: Duration) -> OTelSdkResult {
        PushMetricExporter::force_flush(self)
    }
}

/// Starts a prober that attaches OTLP exporters for the configured signals
/// once the configured endpoint is reachable.
///
/// Fails with [`Error::MissingEndpoint`] when no endpoint is configured. A
/// preferred transport missing from this build is replaced as described in
/// [`select_transport`](crate::transport::select_transport), with a warning.
pub fn start_otlp_prober(config: &ResilienceConfig) -> Result<ProberHandle<OtlpExporters>, Error> {
    let endpoint = config.endpoint().cloned().ok_or(Error::MissingEndpoint)?;
    let selection = config.transport();
    if let Some(reason) = selection.fallback_reason() {
        otel_warn!(name: "Prober.TransportFallback", reason = reason.as_str());
    }

    let mut exporters = OtlpExporters::from_selection(&selection);
    if let Some(timeout) = config.export_timeout() {
        exporters = exporters.with_timeout(timeout);
    }

    ProberBuilder::new(endpoint, exporters)
        .with_signals(config.signals().iter().copied())
        .with_backoff(config.backoff())
        .with_exporter_backoff(config.backoff())
        .with_probe(TcpProbe::new(config.probe_timeout()))
        .start()
}

#[cfg(all(test, feature = "http-proto", feature = "reqwest-blocking-client"))]
mod tests {
    use super::*;

    #[test]
    fn test_http_exporters_build_without_a_collector() {
        let endpoint = Endpoint::parse("http://127.0.0.1:4318").unwrap();
        let exporters =
            OtlpExporters::new(Transport::HttpBinary).with_timeout(Duration::from_secs(1));

        assert!(exporters.logs(&endpoint).is_ok());
        assert!(exporters.traces(&endpoint).is_ok());
        assert!(exporters.metrics(&endpoint).is_ok());
    }

    #[cfg(not(feature = "grpc-tonic"))]
    #[test]
    fn test_grpc_preference_falls_back_to_http() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let config = ResilienceConfig::builder()
            .with_endpoint(format!("http://127.0.0.1:{port}"))
            .with_protocol("grpc")
            .with_signals(["traces"])
            .build()
            .unwrap();
        assert_eq!(config.transport().transport, Transport::HttpBinary);

        let registry = start_otlp_prober(&config).unwrap().join();
        assert_eq!(registry.signals(), vec![Signal::Traces]);
        assert!(registry.traces().unwrap().status().attached);
        registry.shutdown();
    }

    #[test]
    fn test_missing_endpoint_is_rejected() {
        temp_env::with_var_unset(crate::config::OTEL_RESILIENT_SIGNALS, || {
            let config = ResilienceConfig::builder()
                .without_endpoint()
                .build()
                .unwrap();
            assert!(matches!(
                start_otlp_prober(&config),
                Err(Error::MissingEndpoint)
            ));
        });
    }
}
