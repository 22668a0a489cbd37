//! Site provisioning saga and batch fan-out

use saga::{
    BatchExecution, CancellationToken, Saga, SagaDefinitionError, SagaError, SagaExecution,
    SagaRun,
};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

use super::models::Site;
use super::steps::{CreateGatewayConnection, CreateGatewayThing, SiteContext, UpdateGatewayPolicy};
use crate::kernel::ServerDeps;

pub const SITE_SAGA: &str = "provision_site";

/// A fully provisioned gateway
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionedSite {
    pub site_name: String,
    pub thing_id: String,
    pub connection_id: String,
    #[serde(skip)]
    pub execution: SagaExecution,
}

/// A site whose saga did not succeed, with its execution record
#[derive(Debug, Clone, Error)]
#[error("site '{site}' was not provisioned")]
pub struct SiteFailure {
    pub site: String,
    pub execution: SagaExecution,
    #[source]
    pub error: SagaError,
}

impl SiteFailure {
    pub fn requires_intervention(&self) -> bool {
        self.error.requires_intervention()
    }
}

pub type SiteBatch = BatchExecution<ProvisionedSite, SiteFailure>;

/// Runs the site saga. The definition is built once and shared by every run.
#[derive(Clone)]
pub struct SiteProvisioner {
    deps: Arc<ServerDeps>,
    saga: Arc<Saga<SiteContext>>,
}

impl SiteProvisioner {
    pub fn new(deps: Arc<ServerDeps>) -> Result<Self, SagaDefinitionError> {
        let settings = &deps.settings;
        let saga = Saga::builder(SITE_SAGA)
            .retry_policy(settings.retry.clone())
            .deadline(settings.saga_timeout)
            .compensation_grace(settings.compensation_grace)
            .step(CreateGatewayThing::new(deps.clone()))
            .step(UpdateGatewayPolicy::new(deps.clone()))
            .step(CreateGatewayConnection::new(deps.clone()))
            .build()?;
        Ok(Self {
            deps,
            saga: Arc::new(saga),
        })
    }

    pub fn saga(&self) -> &Saga<SiteContext> {
        &self.saga
    }

    /// Provision one site, returning the full run record.
    pub async fn provision(&self, site: Site, cancel: &CancellationToken) -> SagaRun<SiteContext> {
        run_site(&self.saga, site, cancel).await
    }

    /// Provision every site concurrently. One site's failure never affects another.
    pub async fn provision_sites(&self, sites: Vec<Site>, cancel: &CancellationToken) -> SiteBatch {
        let inputs = sites
            .into_iter()
            .map(|site| (site.site_name.clone(), site));

        self.deps
            .settings
            .fan_out()
            .run(inputs, |site| {
                let saga = self.saga.clone();
                let cancel = cancel.clone();
                async move { provision_unit(&saga, site, &cancel).await }
            })
            .await
    }
}

async fn run_site(
    saga: &Saga<SiteContext>,
    site: Site,
    cancel: &CancellationToken,
) -> SagaRun<SiteContext> {
    let name = site.site_name.clone();
    info!(site = %name, "provisioning site");
    let run = saga.run(SiteContext::new(site), cancel).await;

    match &run.error {
        None => info!(
            site = %name,
            thing_id = run.context.thing_id.as_deref().unwrap_or_default(),
            "site provisioned"
        ),
        Some(err) if err.requires_intervention() => error!(
            site = %name,
            thing_id = run.context.thing_id.as_deref().unwrap_or_default(),
            requires_intervention = true,
            error = %err,
            "site left partially provisioned"
        ),
        Some(err) => warn!(site = %name, error = %err, cause = %err.cause().error, "site not provisioned"),
    }
    run
}

async fn provision_unit(
    saga: &Saga<SiteContext>,
    site: Site,
    cancel: &CancellationToken,
) -> Result<ProvisionedSite, SiteFailure> {
    let run = run_site(saga, site, cancel).await;
    let SagaRun {
        execution,
        context,
        error,
    } = run;

    match error {
        None => Ok(ProvisionedSite {
            site_name: context.site.site_name,
            thing_id: context.thing_id.unwrap_or_default(),
            connection_id: context.connection_id.unwrap_or_default(),
            execution,
        }),
        Some(error) => Err(SiteFailure {
            site: context.site.site_name,
            execution,
            error,
        }),
    }
}
