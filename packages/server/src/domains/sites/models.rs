use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

/// A gateway site to provision, as submitted by API callers.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Site {
    /// Unique across all gateway things
    pub site_name: String,
    /// MQTT broker host the gateway connects to
    pub host: String,
    pub port: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub description: String,
}

impl fmt::Debug for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Site")
            .field("site_name", &self.site_name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("description", &self.description)
            .finish()
    }
}

impl Site {
    /// Strip surrounding whitespace from the fields that become identifiers
    /// or part of the broker URI. Credentials and description are kept as
    /// given.
    pub fn normalized(mut self) -> Self {
        for field in [&mut self.site_name, &mut self.host, &mut self.port] {
            *field = field.trim().to_string();
        }
        self
    }

    /// Name of the gateway's broker connection
    pub fn connection_name(&self) -> String {
        format!("{}-conn", self.site_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SiteValidationError {
    #[error("site batch is empty")]
    EmptyBatch,

    #[error("site at position {0} has no siteName")]
    MissingName(usize),

    #[error("site '{0}' has no host")]
    MissingHost(String),

    #[error("site '{site}' has invalid port '{port}'")]
    InvalidPort { site: String, port: String },

    #[error("site '{0}' appears more than once in the batch")]
    DuplicateName(String),
}

/// Normalize a batch and reject it before any remote call is made.
///
/// Two sites sharing a name in one batch would race each other through the
/// uniqueness check, so they are refused here. The returned sites are the
/// ones to provision.
pub fn validate_site_batch(sites: Vec<Site>) -> Result<Vec<Site>, SiteValidationError> {
    if sites.is_empty() {
        return Err(SiteValidationError::EmptyBatch);
    }
    let sites: Vec<Site> = sites.into_iter().map(Site::normalized).collect();
    let mut seen = HashSet::new();
    for (index, site) in sites.iter().enumerate() {
        let name = site.site_name.as_str();
        if name.is_empty() {
            return Err(SiteValidationError::MissingName(index));
        }
        if site.host.is_empty() {
            return Err(SiteValidationError::MissingHost(name.to_string()));
        }
        if site.port.parse::<u16>().is_err() {
            return Err(SiteValidationError::InvalidPort {
                site: name.to_string(),
                port: site.port.clone(),
            });
        }
        if !seen.insert(name) {
            return Err(SiteValidationError::DuplicateName(name.to_string()));
        }
    }
    Ok(sites)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn site(name: &str) -> Site {
        Site {
            site_name: name.to_string(),
            host: "broker.local".to_string(),
            port: "1883".to_string(),
            username: "user".to_string(),
            password: "secret".to_string(),
            description: String::new(),
        }
    }

    #[test]
    fn parses_camel_case_body() {
        let site: Site = serde_json::from_value(json!({
            "siteName": "site1",
            "host": "broker.local",
            "port": "1883",
            "username": "u",
            "password": "p",
            "description": "first floor"
        }))
        .unwrap();
        assert_eq!(site.site_name, "site1");
        assert_eq!(site.connection_name(), "site1-conn");
    }

    #[test]
    fn debug_redacts_password() {
        let rendered = format!("{:?}", site("site1"));
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn valid_batch_passes() {
        assert_eq!(
            validate_site_batch(vec![site("a"), site("b")]),
            Ok(vec![site("a"), site("b")])
        );
    }

    #[test]
    fn empty_batch_is_rejected() {
        assert_eq!(validate_site_batch(vec![]), Err(SiteValidationError::EmptyBatch));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        assert_eq!(
            validate_site_batch(vec![site("a"), site("b"), site("a")]),
            Err(SiteValidationError::DuplicateName("a".into()))
        );
    }

    #[test]
    fn missing_fields_are_rejected() {
        assert_eq!(
            validate_site_batch(vec![site("a"), site(" ")]),
            Err(SiteValidationError::MissingName(1))
        );

        let mut no_host = site("a");
        no_host.host.clear();
        assert_eq!(
            validate_site_batch(vec![no_host]),
            Err(SiteValidationError::MissingHost("a".into()))
        );

        let mut bad_port = site("a");
        bad_port.port = "70000".into();
        assert!(matches!(
            validate_site_batch(vec![bad_port]),
            Err(SiteValidationError::InvalidPort { .. })
        ));
    }

    #[test]
    fn names_are_trimmed_once_for_every_use() {
        let mut padded = site(" site1 ");
        padded.host = " broker.local".into();
        padded.port = "1883 ".into();
        padded.password = " secret ".into();

        let sites = validate_site_batch(vec![padded]).unwrap();

        assert_eq!(sites[0].site_name, "site1");
        assert_eq!(sites[0].connection_name(), "site1-conn");
        assert_eq!(sites[0].host, "broker.local");
        assert_eq!(sites[0].port, "1883");
        assert_eq!(sites[0].password, " secret ");
    }

    #[test]
    fn padded_duplicates_are_rejected() {
        assert_eq!(
            validate_site_batch(vec![site("a"), site(" a ")]),
            Err(SiteValidationError::DuplicateName("a".into()))
        );
    }
}
