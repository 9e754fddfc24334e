//! Transport selection and per-signal exporter bindings.
//!
//! Selection happens in two steps: the configured preference (or the endpoint
//! scheme when there is none) picks a transport, then a transport that is not
//! compiled into this build falls back to one that is.
use crate::endpoint::{Endpoint, Signal};
use crate::error::BoxError;
use crate::exporter::ExporterLifecycle;
use std::fmt::{Display, Formatter};

/// Protocol value for gRPC.
pub const PROTOCOL_GRPC: &str = "grpc";
/// Protocol value for HTTP with protobuf encoding.
pub const PROTOCOL_HTTP_PROTOBUF: &str = "http/protobuf";
/// Protocol value for HTTP with JSON encoding.
pub const PROTOCOL_HTTP_JSON: &str = "http/json";

/// The wire transport exporters are built for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Transport {
    /// OTLP over gRPC.
    Grpc,
    /// OTLP over HTTP, protobuf encoded.
    HttpBinary,
    /// OTLP over HTTP, JSON encoded.
    HttpJson,
}

impl Transport {
    /// Whether this build can create exporters for the transport.
    pub fn is_available(&self) -> bool {
        match self {
            Transport::Grpc => cfg!(feature = "grpc-tonic"),
            Transport::HttpBinary => cfg!(feature = "http-proto"),
            Transport::HttpJson => cfg!(feature = "http-json"),
        }
    }

    /// Whether this is one of the HTTP transports.
    pub fn is_http(&self) -> bool {
        matches!(self, Transport::HttpBinary | Transport::HttpJson)
    }

    fn feature(&self) -> &'static str {
        match self {
            Transport::Grpc => "grpc-tonic",
            Transport::HttpBinary => "http-proto",
            Transport::HttpJson => "http-json",
        }
    }
}

impl Display for Transport {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Transport::Grpc => PROTOCOL_GRPC,
            Transport::HttpBinary => PROTOCOL_HTTP_PROTOBUF,
            Transport::HttpJson => PROTOCOL_HTTP_JSON,
        })
    }
}

/// The outcome of [`select_transport`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportSelection {
    /// Transport exporters will be built for.
    pub transport: Transport,
    /// The transport that was asked for, when it had to be replaced.
    pub fallback_from: Option<Transport>,
}

impl TransportSelection {
    /// Why the preferred transport was replaced, if it was.
    pub fn fallback_reason(&self) -> Option<String> {
        self.fallback_from.map(|preferred| {
            format!(
                "{} exporter unavailable (feature '{}' is not enabled); falling back to {}",
                preferred,
                preferred.feature(),
                self.transport
            )
        })
    }
}

/// The transport the configuration asks for, before availability is taken
/// into account.
///
/// `grpc` selects gRPC, `http/json` selects JSON over HTTP and anything else
/// starting with `http` selects protobuf over HTTP. Without a recognizable
/// preference an `http`/`https` endpoint selects HTTP and everything else,
/// including no endpoint at all, selects gRPC.
pub fn preferred_transport(preference: Option<&str>, endpoint: Option<&Endpoint>) -> Transport {
    let preference = preference.map(|p| p.trim().to_ascii_lowercase());
    match preference.as_deref() {
        Some(PROTOCOL_GRPC) => Transport::Grpc,
        Some(PROTOCOL_HTTP_JSON) => Transport::HttpJson,
        Some(p) if p.starts_with("http") => Transport::HttpBinary,
        _ => match endpoint {
            Some(endpoint) if endpoint.is_http() => Transport::HttpBinary,
            _ => Transport::Grpc,
        },
    }
}

/// Picks the transport to build exporters for, never failing: an unavailable
/// preference falls back to HTTP/protobuf, then HTTP/JSON, then gRPC.
///
/// If none of them is compiled in the preference is returned unchanged and
/// building exporters will fail, which the wrappers absorb.
pub fn select_transport(preference: Option<&str>, endpoint: Option<&Endpoint>) -> TransportSelection {
    let preferred = preferred_transport(preference, endpoint);
    if preferred.is_available() {
        return TransportSelection {
            transport: preferred,
            fallback_from: None,
        };
    }
    [Transport::HttpBinary, Transport::HttpJson, Transport::Grpc]
        .into_iter()
        .find(Transport::is_available)
        .map(|transport| TransportSelection {
            transport,
            fallback_from: Some(preferred),
        })
        .unwrap_or(TransportSelection {
            transport: preferred,
            fallback_from: None,
        })
}

/// Constructor bindings for each signal's exporter.
///
/// The prober calls these through the wrappers' factories, so a binding may
/// be invoked many times and should be cheap when the collector is down.
pub trait SignalExporters: Send + Sync + 'static {
    /// Exporter type for logs.
    type Logs: ExporterLifecycle;
    /// Exporter type for traces.
    type Traces: ExporterLifecycle;
    /// Exporter type for metrics.
    type Metrics: ExporterLifecycle;

    /// Builds a logs exporter for `endpoint`.
    fn logs(&self, endpoint: &Endpoint) -> Result<Self::Logs, BoxError>;

    /// Builds a traces exporter for `endpoint`.
    fn traces(&self, endpoint: &Endpoint) -> Result<Self::Traces, BoxError>;

    /// Builds a metrics exporter for `endpoint`.
    fn metrics(&self, endpoint: &Endpoint) -> Result<Self::Metrics, BoxError>;
}

/// The URL handed to an exporter builder: the per-signal path is appended for
/// HTTP, gRPC gets the endpoint unchanged.
pub fn exporter_url(transport: Transport, endpoint: &Endpoint, signal: Signal) -> String {
    if transport.is_http() {
        endpoint.signal_url(signal)
    } else {
        endpoint.as_str().to_string()
    }
}
