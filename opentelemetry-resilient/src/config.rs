//! Configuration for the prober and the wrappers it attaches.
//!
//! [`ResilienceConfigBuilder::default`] reads the environment, values set in
//! code take precedence over it.
use crate::backoff::{BackoffConfig, DEFAULT_INITIAL_BACKOFF, DEFAULT_MAX_BACKOFF};
use crate::endpoint::{parse_signals, Endpoint, Signal};
use crate::error::Error;
use crate::reachability::DEFAULT_PROBE_TIMEOUT;
use crate::transport::{select_transport, TransportSelection};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Collector endpoint, `scheme://host[:port]`.
pub const OTEL_EXPORTER_OTLP_ENDPOINT: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";
/// Transport preference: `grpc`, `http/protobuf` or `http/json`.
pub const OTEL_EXPORTER_OTLP_PROTOCOL: &str = "OTEL_EXPORTER_OTLP_PROTOCOL";
/// Maximum time in milliseconds an OTLP exporter waits for each export.
pub const OTEL_EXPORTER_OTLP_TIMEOUT: &str = "OTEL_EXPORTER_OTLP_TIMEOUT";
/// Comma separated signals to attach. Defaults to `logs,traces,metrics`.
pub const OTEL_RESILIENT_SIGNALS: &str = "OTEL_RESILIENT_SIGNALS";
/// Delay after the first failure, in seconds. Defaults to 1.0.
pub const OTEL_RESILIENT_INITIAL_BACKOFF: &str = "OTEL_RESILIENT_INITIAL_BACKOFF";
/// Upper bound of the backoff delay, in seconds. Defaults to 300.0.
pub const OTEL_RESILIENT_MAX_BACKOFF: &str = "OTEL_RESILIENT_MAX_BACKOFF";
/// Timeout of one reachability check, in seconds. Defaults to 0.5.
pub const OTEL_RESILIENT_PROBE_TIMEOUT: &str = "OTEL_RESILIENT_PROBE_TIMEOUT";

/// Validated configuration.
#[derive(Clone, Debug)]
pub struct ResilienceConfig {
    endpoint: Option<Endpoint>,
    protocol: Option<String>,
    signals: Vec<Signal>,
    backoff: BackoffConfig,
    probe_timeout: Duration,
    export_timeout: Option<Duration>,
}

impl ResilienceConfig {
    /// A builder initialised from the environment.
    pub fn builder() -> ResilienceConfigBuilder {
        ResilienceConfigBuilder::default()
    }

    /// The collector endpoint, if one is configured.
    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.endpoint.as_ref()
    }

    /// The raw transport preference, if one is configured.
    pub fn protocol(&self) -> Option<&str> {
        self.protocol.as_deref()
    }

    /// Signals to attach, in attachment order.
    pub fn signals(&self) -> &[Signal] {
        &self.signals
    }

    /// Backoff used by the prober and by every attached wrapper.
    pub fn backoff(&self) -> BackoffConfig {
        self.backoff
    }

    /// Timeout of a single reachability check.
    pub fn probe_timeout(&self) -> Duration {
        self.probe_timeout
    }

    /// Export timeout for the OTLP exporters, when overridden.
    pub fn export_timeout(&self) -> Option<Duration> {
        self.export_timeout
    }

    /// The transport exporters will use, see
    /// [`select_transport`](crate::transport::select_transport).
    pub fn transport(&self) -> TransportSelection {
        select_transport(self.protocol.as_deref(), self.endpoint.as_ref())
    }
}

/// Builder for [`ResilienceConfig`].
#[derive(Clone, Debug)]
pub struct ResilienceConfigBuilder {
    endpoint: Option<String>,
    protocol: Option<String>,
    signals: Vec<String>,
    initial_backoff: Duration,
    max_backoff: Duration,
    probe_timeout: Duration,
    export_timeout: Option<Duration>,
}

impl Default for ResilienceConfigBuilder {
    /// Creates a builder from the environment, see the constants in this
    /// module. Unset or unparsable variables keep the defaults.
    fn default() -> Self {
        ResilienceConfigBuilder {
            endpoint: None,
            protocol: None,
            signals: Signal::ALL.iter().map(|s| s.as_str().to_string()).collect(),
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            export_timeout: None,
        }
        .init_from_env_vars()
    }
}

impl ResilienceConfigBuilder {
    /// Collector endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Clears the endpoint, including one taken from the environment.
    pub fn without_endpoint(mut self) -> Self {
        self.endpoint = None;
        self
    }

    /// Transport preference, e.g. `grpc` or `http/protobuf`.
    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = Some(protocol.into());
        self
    }

    /// Signals to attach, by name. Validated by [`build`](Self::build).
    pub fn with_signals<I, N>(mut self, signals: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<String>,
    {
        self.signals = signals.into_iter().map(Into::into).collect();
        self
    }

    /// Delay after the first failure.
    pub fn with_initial_backoff(mut self, initial: Duration) -> Self {
        self.initial_backoff = initial;
        self
    }

    /// Upper bound of the delay. Raised to the initial delay if below it.
    pub fn with_max_backoff(mut self, max: Duration) -> Self {
        self.max_backoff = max;
        self
    }

    /// Timeout of one reachability check.
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Export timeout passed to the OTLP exporter builders.
    pub fn with_export_timeout(mut self, timeout: Duration) -> Self {
        self.export_timeout = Some(timeout);
        self
    }

    /// Validates the configuration.
    ///
    /// Unknown signal names and endpoints without a usable host fail here,
    /// before anything is started.
    pub fn build(self) -> Result<ResilienceConfig, Error> {
        let signals = parse_signals(&self.signals)?;
        let endpoint = self.endpoint.as_deref().map(Endpoint::parse).transpose()?;
        if self.probe_timeout.is_zero() {
            return Err(Error::InvalidConfig {
                name: OTEL_RESILIENT_PROBE_TIMEOUT.to_string(),
                reason: "the probe timeout must be greater than zero".to_string(),
            });
        }

        Ok(ResilienceConfig {
            endpoint,
            protocol: self.protocol,
            signals,
            backoff: BackoffConfig::new(self.initial_backoff, self.max_backoff),
            probe_timeout: self.probe_timeout,
            export_timeout: self.export_timeout,
        })
    }

    fn init_from_env_vars(mut self) -> Self {
        if let Some(endpoint) = non_empty_var(OTEL_EXPORTER_OTLP_ENDPOINT) {
            self.endpoint = Some(endpoint);
        }

        if let Some(protocol) = non_empty_var(OTEL_EXPORTER_OTLP_PROTOCOL) {
            self.protocol = Some(protocol);
        }

        if let Some(signals) = non_empty_var(OTEL_RESILIENT_SIGNALS) {
            self.signals = signals
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect();
        }

        if let Some(initial) = seconds_var(OTEL_RESILIENT_INITIAL_BACKOFF) {
            self.initial_backoff = initial;
        }

        if let Some(max) = seconds_var(OTEL_RESILIENT_MAX_BACKOFF) {
            self.max_backoff = max;
        }

        if let Some(timeout) = seconds_var(OTEL_RESILIENT_PROBE_TIMEOUT) {
            self.probe_timeout = timeout;
        }

        if let Some(timeout) = env::var(OTEL_EXPORTER_OTLP_TIMEOUT)
            .ok()
            .and_then(|timeout| u64::from_str(timeout.trim()).ok())
        {
            self.export_timeout = Some(Duration::from_millis(timeout));
        }

        self
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn seconds_var(name: &str) -> Option<Duration> {
    env::var(name)
        .ok()
        .and_then(|value| f64::from_str(value.trim()).ok())
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_VARS: [&str; 7] = [
        OTEL_EXPORTER_OTLP_ENDPOINT,
        OTEL_EXPORTER_OTLP_PROTOCOL,
        OTEL_EXPORTER_OTLP_TIMEOUT,
        OTEL_RESILIENT_SIGNALS,
        OTEL_RESILIENT_INITIAL_BACKOFF,
        OTEL_RESILIENT_MAX_BACKOFF,
        OTEL_RESILIENT_PROBE_TIMEOUT,
    ];

    #[test]
    fn test_default_config() {
        temp_env::with_vars_unset(ALL_VARS, || {
            let config = ResilienceConfig::builder().build().unwrap();

            assert!(config.endpoint().is_none());
            assert!(config.protocol().is_none());
            assert_eq!(config.signals(), &Signal::ALL);
            assert_eq!(config.backoff(), BackoffConfig::default());
            assert_eq!(config.probe_timeout(), Duration::from_millis(500));
            assert!(config.export_timeout().is_none());
        });
    }

    #[test]
    fn test_config_from_env() {
        temp_env::with_vars(
            [
                (OTEL_EXPORTER_OTLP_ENDPOINT, Some("http://collector:4318")),
                (OTEL_EXPORTER_OTLP_PROTOCOL, Some("http/protobuf")),
                (OTEL_EXPORTER_OTLP_TIMEOUT, Some("2500")),
                (OTEL_RESILIENT_SIGNALS, Some(" traces, logs ,")),
                (OTEL_RESILIENT_INITIAL_BACKOFF, Some("0.25")),
                (OTEL_RESILIENT_MAX_BACKOFF, Some("8.0")),
                (OTEL_RESILIENT_PROBE_TIMEOUT, Some("2")),
            ],
            || {
                let config = ResilienceConfig::builder().build().unwrap();

                assert_eq!(config.endpoint().unwrap().port(), 4318);
                assert_eq!(config.protocol(), Some("http/protobuf"));
                assert_eq!(config.export_timeout(), Some(Duration::from_millis(2500)));
                assert_eq!(config.signals(), &[Signal::Traces, Signal::Logs]);
                assert_eq!(
                    config.backoff(),
                    BackoffConfig::new(Duration::from_millis(250), Duration::from_secs(8))
                );
                assert_eq!(config.probe_timeout(), Duration::from_secs(2));
            },
        );
    }

    #[test]
    fn test_code_overrides_env() {
        temp_env::with_vars(
            [
                (OTEL_EXPORTER_OTLP_ENDPOINT, Some("http://from-env:4318")),
                (OTEL_RESILIENT_MAX_BACKOFF, Some("60")),
                (OTEL_RESILIENT_SIGNALS, Some("logs")),
            ],
            || {
                let config = ResilienceConfig::builder()
                    .with_endpoint("grpc://from-code")
                    .with_max_backoff(Duration::from_secs(8))
                    .with_signals(["metrics"])
                    .build()
                    .unwrap();

                assert_eq!(config.endpoint().unwrap().host(), "from-code");
                assert_eq!(config.endpoint().unwrap().port(), 4317);
                assert_eq!(config.backoff().max(), Duration::from_secs(8));
                assert_eq!(config.signals(), &[Signal::Metrics]);
            },
        );
    }

    #[test]
    fn test_invalid_numbers_keep_defaults() {
        temp_env::with_vars(
            [
                (OTEL_RESILIENT_INITIAL_BACKOFF, Some("soon")),
                (OTEL_RESILIENT_MAX_BACKOFF, Some("-5")),
                (OTEL_RESILIENT_PROBE_TIMEOUT, Some("NaN")),
                (OTEL_EXPORTER_OTLP_TIMEOUT, Some("1.5")),
            ],
            || {
                let config = ResilienceConfig::builder().build().unwrap();

                assert_eq!(config.backoff(), BackoffConfig::default());
                assert_eq!(config.probe_timeout(), DEFAULT_PROBE_TIMEOUT);
                assert!(config.export_timeout().is_none());
            },
        );
    }

    #[test]
    fn test_unknown_signal_in_env_fails_fast() {
        temp_env::with_var(OTEL_RESILIENT_SIGNALS, Some("logs,profiles"), || {
            let result = ResilienceConfig::builder().build();
            assert!(matches!(result, Err(Error::UnknownSignal(name)) if name == "profiles"));
        });
    }

    #[test]
    fn test_zero_probe_timeout_is_rejected() {
        temp_env::with_vars_unset(ALL_VARS, || {
            let result = ResilienceConfig::builder()
                .with_probe_timeout(Duration::ZERO)
                .build();
            assert!(matches!(result, Err(Error::InvalidConfig { .. })));
        });
    }

    #[cfg(feature = "http-proto")]
    #[test]
    fn test_transport_follows_endpoint_scheme() {
        temp_env::with_vars_unset(ALL_VARS, || {
            let config = ResilienceConfig::builder()
                .with_endpoint("https://collector")
                .build()
                .unwrap();
            assert!(config.transport().transport.is_http());
        });
    }
}
