//! Mass device configuration: one search, then one retried unit per device.
//!
//! Units are flat activities rather than sagas. Patching attributes and
//! sending a command have nothing to compensate.

use saga::{retry, BatchExecution, CancellationToken, StepError, StepFailure};
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

use super::activities::{configure_device, find_devices};
use super::models::DeviceConfig;
use crate::kernel::ServerDeps;

pub const SEARCH_STEP: &str = "search_devices";
pub const CONFIGURE_STEP: &str = "configure_device";

pub type DeviceBatch = BatchExecution<String, StepFailure>;

#[derive(Clone)]
pub struct DeviceConfigurator {
    deps: Arc<ServerDeps>,
}

impl DeviceConfigurator {
    pub fn new(deps: Arc<ServerDeps>) -> Self {
        Self { deps }
    }

    /// Configure every device matching `query`.
    ///
    /// Fails as a whole only when the search itself fails. Otherwise returns
    /// one outcome per matched device; zero matches is an empty success.
    pub async fn configure_devices(
        &self,
        query: &str,
        config: DeviceConfig,
        cancel: &CancellationToken,
    ) -> Result<DeviceBatch, StepFailure> {
        let deps = self.deps.clone();
        let devices = retried(SEARCH_STEP, &deps, cancel, |_| find_devices(query, &deps)).await?;
        info!(query = %query, devices = devices.len(), kind = config.kind(), "configuring devices");

        let config = Arc::new(config);
        let inputs = devices
            .into_iter()
            .map(|device| (device.thing_id.clone(), device.thing_id));

        let batch = deps
            .settings
            .fan_out()
            .run(inputs, |thing_id| {
                let deps = deps.clone();
                let config = config.clone();
                let cancel = cancel.clone();
                async move {
                    let result = retried(CONFIGURE_STEP, &deps, &cancel, |_| {
                        configure_device(&thing_id, &config, &deps)
                    })
                    .await;
                    result.map(|()| thing_id)
                }
            })
            .await;

        if !batch.is_success() {
            warn!(
                query = %query,
                failed = batch.total() - batch.succeeded(),
                total = batch.total(),
                "device configuration partially failed"
            );
        }
        Ok(batch)
    }
}

/// Run `op` under the configured retry policy until it succeeds, gives up, or
/// `cancel` fires.
async fn retried<T, F, Fut>(
    step: &str,
    deps: &ServerDeps,
    cancel: &CancellationToken,
    op: F,
) -> Result<T, StepFailure>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, StepError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(StepFailure::new(
            step,
            0,
            StepError::cancelled("execution cancelled"),
        )),
        result = retry::execute(step, &deps.settings.retry, op) => result,
    }
}
