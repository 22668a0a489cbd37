//! Devices domain - mass configuration of existing device things
//!
//! Architecture:
//!   API → BatchDispatcher → DeviceConfigurator.configure_devices()
//!       → search (retried) → FanOut → configure_device per match (retried)

pub mod activities;
pub mod configurator;
pub mod models;

pub use activities::{configure_device, find_devices};
pub use configurator::{DeviceBatch, DeviceConfigurator, CONFIGURE_STEP, SEARCH_STEP};
pub use models::{Device, DeviceConfig, DeviceConfigRequest, DeviceValidationError};
