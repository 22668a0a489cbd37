//! Device configuration activities

use saga::StepError;

use super::models::{Device, DeviceConfig};
use crate::domains::messaging::send_message;
use crate::domains::things::patch_thing_attributes;
use crate::kernel::{Filter, ServerDeps};

/// Every device matched by `query`, across all result pages.
pub async fn find_devices(query: &str, deps: &ServerDeps) -> Result<Vec<Device>, StepError> {
    let things = deps.things.search(&Filter::raw(query)).await?;
    Ok(things.into_iter().map(Device::from).collect())
}

/// Apply `config` to one device.
pub async fn configure_device(
    thing_id: &str,
    config: &DeviceConfig,
    deps: &ServerDeps,
) -> Result<(), StepError> {
    match config {
        DeviceConfig::Attributes(attributes) => {
            patch_thing_attributes(thing_id, attributes, deps.things.as_ref()).await?;
        }
        DeviceConfig::Message(template) => {
            send_message(template, thing_id, deps.channel.as_ref()).await?;
        }
    }
    Ok(())
}
