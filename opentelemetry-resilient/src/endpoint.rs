//! Collector endpoints and telemetry signals.
use crate::Error;
use http::Uri;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Port the OTLP/HTTP receiver listens on when the endpoint carries none.
pub const OTLP_HTTP_DEFAULT_PORT: u16 = 4318;
/// Port the OTLP/gRPC receiver listens on when the endpoint carries none.
pub const OTLP_GRPC_DEFAULT_PORT: u16 = 4317;

const DEFAULT_HOST: &str = "localhost";

/// A telemetry category an exporter can be attached for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Signal {
    /// Log records.
    Logs,
    /// Spans.
    Traces,
    /// Metric data points.
    Metrics,
}

impl Signal {
    /// Every signal, in the order exporters are attached by default.
    pub const ALL: [Signal; 3] = [Signal::Logs, Signal::Traces, Signal::Metrics];

    /// The lower case name of the signal.
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Logs => "logs",
            Signal::Traces => "traces",
            Signal::Metrics => "metrics",
        }
    }

    /// Path the OTLP/HTTP receiver serves this signal on.
    pub fn http_path(&self) -> &'static str {
        match self {
            Signal::Logs => "/v1/logs",
            Signal::Traces => "/v1/traces",
            Signal::Metrics => "/v1/metrics",
        }
    }
}

impl Display for Signal {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Signal {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "logs" => Ok(Signal::Logs),
            "traces" => Ok(Signal::Traces),
            "metrics" => Ok(Signal::Metrics),
            _ => Err(Error::UnknownSignal(s.to_string())),
        }
    }
}

/// Parses a list of signal names, failing on the first unknown one.
///
/// Duplicates are dropped, the first occurrence keeps its position.
pub fn parse_signals<I, S>(names: I) -> Result<Vec<Signal>, Error>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut signals = Vec::with_capacity(Signal::ALL.len());
    for name in names {
        let signal = name.as_ref().parse::<Signal>()?;
        if !signals.contains(&signal) {
            signals.push(signal);
        }
    }
    Ok(signals)
}

/// A parsed collector endpoint.
///
/// When the URL carries no port, `http` and `https` endpoints resolve to
/// [`OTLP_HTTP_DEFAULT_PORT`] and everything else to [`OTLP_GRPC_DEFAULT_PORT`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    url: String,
    scheme: Option<String>,
    host: String,
    port: u16,
}

impl Endpoint {
    /// Parses `scheme://host[:port][/path]`.
    pub fn parse(url: &str) -> Result<Self, Error> {
        let url = url.trim();
        if url.is_empty() {
            return Err(Error::InvalidEndpoint(
                url.to_string(),
                "endpoint is empty".to_string(),
            ));
        }
        let uri = url
            .parse::<Uri>()
            .map_err(|err| Error::InvalidEndpoint(url.to_string(), err.to_string()))?;

        let scheme = uri.scheme_str().map(|s| s.to_ascii_lowercase());
        let host = match uri.host() {
            // ipv6 literals come back bracketed
            Some(host) if !host.is_empty() => host
                .trim_start_matches('[')
                .trim_end_matches(']')
                .to_string(),
            _ => DEFAULT_HOST.to_string(),
        };
        let port = uri
            .port_u16()
            .unwrap_or_else(|| default_port(scheme.as_deref()));

        Ok(Endpoint {
            url: url.to_string(),
            scheme,
            host,
            port,
        })
    }

    /// The endpoint as it was configured.
    pub fn as_str(&self) -> &str {
        &self.url
    }

    /// The lower cased scheme, if the URL had one.
    pub fn scheme(&self) -> Option<&str> {
        self.scheme.as_deref()
    }

    /// Host the reachability check connects to.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Resolved port, explicit or inferred from the scheme.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Whether the scheme is `http` or `https`.
    pub fn is_http(&self) -> bool {
        matches!(self.scheme(), Some("http") | Some("https"))
    }

    /// The OTLP/HTTP URL for `signal`, the base endpoint followed by the
    /// signal path.
    pub fn signal_url(&self, signal: Signal) -> String {
        format!("{}{}", self.url.trim_end_matches('/'), signal.http_path())
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.url)
    }
}

impl FromStr for Endpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Endpoint::parse(s)
    }
}

fn default_port(scheme: Option<&str>) -> u16 {
    match scheme {
        Some("http") | Some("https") => OTLP_HTTP_DEFAULT_PORT,
        _ => OTLP_GRPC_DEFAULT_PORT,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("http://collector", 4318)]
    #[case("https://collector", 4318)]
    #[case("HTTP://collector", 4318)]
    #[case("grpc://collector", 4317)]
    #[case("collector:4317", 4317)]
    #[case("http://collector:80", 80)]
    #[case("grpc://collector:9999", 9999)]
    #[case("https://collector:4317/otlp", 4317)]
    fn test_port_resolution(#[case] url: &str, #[case] expected: u16) {
        let endpoint = Endpoint::parse(url).unwrap();
        assert_eq!(endpoint.port(), expected);
        assert_eq!(endpoint.host(), "collector");
    }

    #[test]
    fn test_ipv6_host_is_unbracketed() {
        let endpoint = Endpoint::parse("http://[::1]:4318").unwrap();
        assert_eq!(endpoint.host(), "::1");
        assert_eq!(endpoint.port(), 4318);
    }

    #[test]
    fn test_empty_endpoint_is_rejected() {
        assert!(matches!(
            Endpoint::parse("  "),
            Err(Error::InvalidEndpoint(_, _))
        ));
        assert!(Endpoint::parse("http://bad host").is_err());
    }

    #[test]
    fn test_signal_url_appends_path() {
        let endpoint: Endpoint = "http://collector:4318/".parse().unwrap();
        assert_eq!(
            endpoint.signal_url(Signal::Traces),
            "http://collector:4318/v1/traces"
        );
        assert_eq!(
            endpoint.signal_url(Signal::Logs),
            "http://collector:4318/v1/logs"
        );
        assert!(endpoint.is_http());
    }

    #[test]
    fn test_signal_from_str() {
        assert_eq!("logs".parse::<Signal>().unwrap(), Signal::Logs);
        assert_eq!(" Traces ".parse::<Signal>().unwrap(), Signal::Traces);
        assert_eq!("metrics".parse::<Signal>().unwrap(), Signal::Metrics);
        match "profiles".parse::<Signal>() {
            Err(Error::UnknownSignal(name)) => assert_eq!(name, "profiles"),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_parse_signals_dedups_and_fails_fast() {
        let signals = parse_signals(["metrics", "logs", "metrics"]).unwrap();
        assert_eq!(signals, vec![Signal::Metrics, Signal::Logs]);

        assert!(parse_signals(["logs", "spans", "metrics"]).is_err());
    }
}
