//! Sites domain - gateway provisioning
//!
//! Architecture:
//!   API → BatchDispatcher → SiteProvisioner.provision_sites() → FanOut
//!       → one `provision_site` saga per site:
//!         create thing → update policy → create connection
//!         (a failure after the thing exists deletes it again)

pub mod models;
pub mod provisioner;
pub mod steps;

pub use models::{validate_site_batch, Site, SiteValidationError};
pub use provisioner::{ProvisionedSite, SiteBatch, SiteFailure, SiteProvisioner, SITE_SAGA};
pub use steps::{
    gateway_connection_spec, gateway_policy_message, integration_subject, SiteContext,
    SITE_NAME_ATTRIBUTE,
};
