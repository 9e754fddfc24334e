//! [`LogExporter`] implementation for [`ResilientExporter`].
use crate::exporter::{ExporterLifecycle, ResilientExporter};
use opentelemetry_sdk::error::OTelSdkResult;
use opentelemetry_sdk::logs::{LogBatch, LogExporter};
use opentelemetry_sdk::Resource;
use std::time::Duration;

impl<E> LogExporter for ResilientExporter<E>
where
    E: LogExporter + ExporterLifecycle,
{
    /// Exports through the wrapper. Always `Ok`: a batch that was skipped or
    /// failed is dropped, and a failure has already been reported.
    #[allow(clippy::manual_async_fn)]
    fn export(
        &self,
        batch: LogBatch<'_>,
    ) -> impl std::future::Future<Output = OTelSdkResult> + Send {
        async move {
            let _ = self
                .export_with(|inner| async move { inner.export(batch).await })
                .await;
            Ok(())
        }
    }

    fn shutdown_with_timeout(&self, _timeout: Duration) -> OTelSdkResult {
        ResilientExporter::shutdown(self);
        Ok(())
    }

    fn set_resource(&mut self, resource: &Resource) {
        ResilientExporter::set_resource(self, resource);
    }
}
