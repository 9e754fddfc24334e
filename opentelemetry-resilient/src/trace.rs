//! [`SpanExporter`] implementation for [`ResilientExporter`].
use crate::exporter::{ExporterLifecycle, ResilientExporter, DEFAULT_FORCE_FLUSH_TIMEOUT};
use opentelemetry_sdk::error::{OTelSdkError, OTelSdkResult};
use opentelemetry_sdk::trace::{SpanData, SpanExporter};
use opentelemetry_sdk::Resource;
use std::time::Duration;

impl<E> SpanExporter for ResilientExporter<E>
where
    E: SpanExporter + ExporterLifecycle,
{
    /// Exports through the wrapper. Always `Ok`: a batch that was skipped or
    /// failed is dropped, and a failure has already been reported.
    #[allow(clippy::manual_async_fn)]
    fn export(
        &self,
        batch: Vec<SpanData>,
    ) -> impl std::future::Future<Output = OTelSdkResult> + Send {
        async move {
            let _ = self
                .export_with(|inner| async move { inner.export(batch).await })
                .await;
            Ok(())
        }
    }

    fn shutdown_with_timeout(&mut self, _timeout: Duration) -> OTelSdkResult {
        ResilientExporter::shutdown(self);
        Ok(())
    }

    fn force_flush(&mut self) -> OTelSdkResult {
        if ResilientExporter::force_flush(self, DEFAULT_FORCE_FLUSH_TIMEOUT) {
            Ok(())
        } else {
            Err(OTelSdkError::InternalFailure(format!(
                "force flush of {} exporter did not complete",
                self.label()
            )))
        }
    }

    fn set_resource(&mut self, resource: &Resource) {
        ResilientExporter::set_resource(self, resource);
    }
}
