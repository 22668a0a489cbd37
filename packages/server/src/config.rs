use anyhow::{bail, ensure, Context, Result};
use ditto::{Credentials, DittoClient};
use dotenvy::dotenv;
use saga::RetryPolicy;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::domains::connections::ConnectionTemplates;
use crate::domains::executions::DEFAULT_RETAINED_EXECUTIONS;
use crate::kernel::ProvisioningSettings;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub ditto_host_port: String,
    pub ditto_credentials: Credentials,
    /// Credentials for the connections API; the regular ones when unset
    pub ditto_devops_credentials: Option<Credentials>,
    pub ditto_namespace: String,
    pub connection_template: String,
    pub retry_initial_interval: Duration,
    pub retry_backoff_coefficient: f64,
    pub retry_max_attempts: u32,
    pub retry_max_interval: Option<Duration>,
    pub saga_timeout: Duration,
    pub compensation_grace: Duration,
    pub fanout_max_concurrency: Option<usize>,
    pub retained_executions: usize,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from any key/value source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |key: &str| -> Result<String> {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .with_context(|| format!("{} must be set", key))
        };

        let ditto_devops_credentials = match (
            lookup("DITTO_DEVOPS_USERNAME"),
            lookup("DITTO_DEVOPS_PASSWORD"),
        ) {
            (Some(username), Some(password)) => Some(Credentials::new(username, password)),
            (None, None) => None,
            _ => bail!("DITTO_DEVOPS_USERNAME and DITTO_DEVOPS_PASSWORD must be set together"),
        };

        let config = Self {
            port: parse_or(&lookup, "PORT", 18080)?,
            ditto_host_port: required("DITTO_HOSTPORT")?,
            ditto_credentials: Credentials::new(
                required("DITTO_USERNAME")?,
                required("DITTO_PASSWORD")?,
            ),
            ditto_devops_credentials,
            ditto_namespace: lookup("DITTO_NAMESPACE")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| "gateway".to_string()),
            connection_template: lookup("CONNECTION_TEMPLATE")
                .unwrap_or_else(|| "mqtt5".to_string()),
            retry_initial_interval: Duration::from_millis(parse_or(
                &lookup,
                "RETRY_INITIAL_INTERVAL_MS",
                1000,
            )?),
            retry_backoff_coefficient: parse_or(&lookup, "RETRY_BACKOFF_COEFFICIENT", 2.0)?,
            retry_max_attempts: parse_or(&lookup, "RETRY_MAX_ATTEMPTS", 5)?,
            retry_max_interval: parse_optional::<u64>(&lookup, "RETRY_MAX_INTERVAL_MS")?
                .map(Duration::from_millis),
            saga_timeout: Duration::from_secs(parse_or(&lookup, "SAGA_TIMEOUT_SECS", 300)?),
            compensation_grace: Duration::from_secs(parse_or(
                &lookup,
                "COMPENSATION_GRACE_SECS",
                60,
            )?),
            fanout_max_concurrency: parse_optional(&lookup, "FANOUT_MAX_CONCURRENCY")?,
            retained_executions: parse_or(
                &lookup,
                "RETAINED_EXECUTIONS",
                DEFAULT_RETAINED_EXECUTIONS,
            )?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        ensure!(
            self.retry_backoff_coefficient >= 1.0,
            "RETRY_BACKOFF_COEFFICIENT must be at least 1.0"
        );
        ensure!(self.retry_max_attempts > 0, "RETRY_MAX_ATTEMPTS must be at least 1");
        ensure!(
            self.fanout_max_concurrency != Some(0),
            "FANOUT_MAX_CONCURRENCY must be at least 1"
        );
        let templates = ConnectionTemplates::builtin();
        ensure!(
            templates.contains(&self.connection_template),
            "CONNECTION_TEMPLATE '{}' is not one of {:?}",
            self.connection_template,
            templates.names()
        );
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let policy = RetryPolicy::new(
            self.retry_initial_interval,
            self.retry_backoff_coefficient,
            self.retry_max_attempts,
        );
        match self.retry_max_interval {
            Some(max) => policy.with_max_interval(max),
            None => policy,
        }
    }

    pub fn provisioning_settings(&self) -> ProvisioningSettings {
        ProvisioningSettings {
            namespace: self.ditto_namespace.clone(),
            connection_template: self.connection_template.clone(),
            retry: self.retry_policy(),
            saga_timeout: self.saga_timeout,
            compensation_grace: self.compensation_grace,
            fanout_max_concurrency: self.fanout_max_concurrency,
            retained_executions: self.retained_executions,
        }
    }

    pub fn ditto_client(&self) -> DittoClient {
        let client = DittoClient::new(self.ditto_host_port.clone(), self.ditto_credentials.clone());
        match &self.ditto_devops_credentials {
            Some(devops) => client.with_devops_credentials(devops.clone()),
            None => client,
        }
    }
}

fn parse_optional<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key).filter(|v| !v.trim().is_empty()) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("{} must be a valid number, got '{}'", key, raw)),
        None => Ok(None),
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    Ok(parse_optional(lookup, key)?.unwrap_or(default))
}
