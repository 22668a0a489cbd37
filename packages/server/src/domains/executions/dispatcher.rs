//! Batch dispatcher - turns one inbound request into a tracked background execution

use saga::{CancellationToken, SagaDefinitionError};
use std::sync::Arc;
use tokio_util::task::TaskTracker;
use tracing::{info, info_span, Instrument};

use super::error::DispatchError;
use super::models::{ExecutionKind, ExecutionStatus, StartedExecution};
use super::registry::ExecutionRegistry;
use crate::common::{ExecutionId, RunId};
use crate::domains::devices::{DeviceConfigRequest, DeviceConfigurator};
use crate::domains::sites::{validate_site_batch, Site, SiteProvisioner};
use crate::kernel::ServerDeps;

#[derive(Clone)]
pub struct BatchDispatcher {
    sites: SiteProvisioner,
    devices: DeviceConfigurator,
    registry: Arc<ExecutionRegistry>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl BatchDispatcher {
    pub fn new(deps: Arc<ServerDeps>) -> Result<Self, SagaDefinitionError> {
        Ok(Self {
            sites: SiteProvisioner::new(deps.clone())?,
            registry: Arc::new(ExecutionRegistry::with_retention(
                deps.settings.retained_executions,
            )),
            devices: DeviceConfigurator::new(deps),
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
        })
    }

    pub fn registry(&self) -> &ExecutionRegistry {
        &self.registry
    }

    /// Validate `sites` and start provisioning them in the background
    pub fn start_site_batch(&self, sites: Vec<Site>) -> Result<StartedExecution, DispatchError> {
        let sites = validate_site_batch(sites)?;

        let started = self.registry.register(ExecutionKind::SiteProvisioning);
        info!(
            execution_id = %started.execution_id,
            run_id = %started.run_id,
            sites = sites.len(),
            "site batch started"
        );

        let provisioner = self.sites.clone();
        let registry = self.registry.clone();
        let cancel = self.shutdown.child_token();
        let span = info_span!("site_batch", execution_id = %started.execution_id);
        self.tasks.spawn(
            async move {
                let batch = provisioner.provision_sites(sites, &cancel).await;
                log_finished(&batch.summary(), batch.is_success());
                registry.update(started.execution_id, |status| status.finish_sites(batch));
            }
            .instrument(span),
        );
        Ok(started)
    }

    /// Validate `request` and start configuring the matching devices in the background
    pub fn start_device_config(
        &self,
        request: DeviceConfigRequest,
    ) -> Result<StartedExecution, DispatchError> {
        let (query, config) = request.into_parts()?;

        let started = self.registry.register(ExecutionKind::DeviceConfiguration);
        info!(
            execution_id = %started.execution_id,
            run_id = %started.run_id,
            query = %query,
            "device configuration started"
        );

        let configurator = self.devices.clone();
        let registry = self.registry.clone();
        let cancel = self.shutdown.child_token();
        let span = info_span!("device_config", execution_id = %started.execution_id);
        self.tasks.spawn(
            async move {
                let result = configurator.configure_devices(&query, config, &cancel).await;
                match &result {
                    Ok(batch) => log_finished(&batch.summary(), batch.is_success()),
                    Err(failure) => info!(error = %failure, "device search failed"),
                }
                registry.update(started.execution_id, |status| status.finish_devices(result));
            }
            .instrument(span),
        );
        Ok(started)
    }

    pub fn status(
        &self,
        execution_id: ExecutionId,
        run_id: Option<RunId>,
    ) -> Result<ExecutionStatus, DispatchError> {
        self.registry.status(execution_id, run_id)
    }

    pub async fn wait_for_completion(&self, execution_id: ExecutionId) -> Option<ExecutionStatus> {
        self.registry.wait_for_completion(execution_id).await
    }

    /// Stop forward progress of every running execution and wait for them to
    /// finish. Compensations still run to completion.
    pub async fn shutdown(&self) {
        info!(running = self.tasks.len(), "cancelling running executions");
        self.shutdown.cancel();
        self.tasks.close();
        self.tasks.wait().await;
    }
}

fn log_finished(summary: &saga::BatchSummary, success: bool) {
    info!(
        total = summary.total,
        succeeded = summary.succeeded,
        failed = summary.failed,
        success,
        "execution finished"
    );
}
