//! [`PushMetricExporter`] implementation for [`ResilientExporter`].
use crate::exporter::{ExporterLifecycle, ResilientExporter, DEFAULT_FORCE_FLUSH_TIMEOUT};
use opentelemetry_sdk::error::{OTelSdkError, OTelSdkResult};
use opentelemetry_sdk::metrics::data::ResourceMetrics;
use opentelemetry_sdk::metrics::exporter::PushMetricExporter;
use opentelemetry_sdk::metrics::Temporality;
use std::time::Duration;

impl<E> PushMetricExporter for ResilientExporter<E>
where
    E: PushMetricExporter + ExporterLifecycle,
{
    /// Exports through the wrapper. Always `Ok`: a batch that was skipped or
    /// failed is dropped, and a failure has already been reported.
    #[allow(clippy::manual_async_fn)]
    fn export(
        &self,
        metrics: &ResourceMetrics,
    ) -> impl std::future::Future<Output = OTelSdkResult> + Send {
        async move {
            let _ = self
                .export_with(|inner| async move { inner.export(metrics).await })
                .await;
            Ok(())
        }
    }

    fn force_flush(&self) -> OTelSdkResult {
        if ResilientExporter::force_flush(self, DEFAULT_FORCE_FLUSH_TIMEOUT) {
            Ok(())
        } else {
            Err(OTelSdkError::InternalFailure(format!(
                "force flush of {} exporter did not complete",
                self.label()
            )))
        }
    }

    fn shutdown_with_timeout(&self, _timeout: Duration) -> OTelSdkResult {
        ResilientExporter::shutdown(self);
        Ok(())
    }

    /// The inner exporter's temporality, cumulative while there is none.
    fn temporality(&self) -> Temporality {
        self.with_inner(|inner| inner.temporality())
            .unwrap_or(Temporality::Cumulative)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exporter::ResilientExporterBuilder;
    use crate::report::tests::RecordingReporter;
    use opentelemetry::metrics::MeterProvider;
    use opentelemetry_sdk::metrics::SdkMeterProvider;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug, Default, Clone)]
    struct DeltaExporter {
        exports: Arc<AtomicUsize>,
    }

    impl PushMetricExporter for DeltaExporter {
        async fn export(&self, _metrics: &ResourceMetrics) -> OTelSdkResult {
            self.exports.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn force_flush(&self) -> OTelSdkResult {
            Ok(())
        }

        fn shutdown_with_timeout(&self, _timeout: Duration) -> OTelSdkResult {
            Ok(())
        }

        fn temporality(&self) -> Temporality {
            Temporality::Delta
        }
    }

    impl ExporterLifecycle for DeltaExporter {}

    #[test]
    fn test_temporality_defaults_to_cumulative_without_inner() {
        let reporter = Arc::new(RecordingReporter::default());
        let wrapper: ResilientExporter<DeltaExporter> = ResilientExporterBuilder::default()
            .with_reporter(reporter.clone())
            .build(|| Err("not yet".into()));

        assert_eq!(wrapper.temporality(), Temporality::Cumulative);
        assert_eq!(reporter.count(), 1);
    }

    #[test]
    fn test_metrics_flow_through_periodic_reader() {
        let exporter = DeltaExporter::default();
        let reporter = Arc::new(RecordingReporter::default());
        let factory_exporter = exporter.clone();
        let wrapper = ResilientExporterBuilder::default()
            .with_label("metrics")
            .with_reporter(reporter.clone())
            .build(move || Ok(factory_exporter.clone()));
        assert_eq!(wrapper.temporality(), Temporality::Delta);

        let provider = SdkMeterProvider::builder()
            .with_periodic_exporter(wrapper.clone())
            .build();
        let counter = provider.meter("resilient-test").u64_counter("requests").build();
        counter.add(1, &[]);

        assert!(provider.force_flush().is_ok());
        assert!(exporter.exports.load(Ordering::SeqCst) >= 1);
        assert_eq!(reporter.count(), 0);

        assert!(provider.shutdown().is_ok());
        assert!(wrapper.status().shut_down);
    }
}
