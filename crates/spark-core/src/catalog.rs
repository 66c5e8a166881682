//! Service URL classification and resolution.

use std::collections::BTreeMap;

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("service `{0}` is not in the catalog")]
    UnknownService(String),
    #[error("invalid service definition `{0}`, expected name=url")]
    InvalidDefinition(String),
}

/// Answers which URLs belong to the platform and maps service names to base
/// URLs.
pub trait ServiceCatalog: Send + Sync {
    fn is_service_url(&self, uri: &str) -> bool;
    fn is_device_registration_url(&self, uri: &str) -> bool;
    fn is_pre_auth_service_url(&self, uri: &str) -> bool;
    fn resolve_service_url(&self, service: &str) -> Result<String, CatalogError>;
}

/// In-memory catalog built from known base URLs.
#[derive(Debug, Clone, Default)]
pub struct StaticServiceCatalog {
    services: BTreeMap<String, String>,
    device_registration: Vec<String>,
    pre_auth: Vec<String>,
}

impl StaticServiceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_service<N: Into<String>, U: Into<String>>(mut self, name: N, base_url: U) -> Self {
        self.services.insert(name.into(), trim_base(base_url.into()));
        self
    }

    pub fn with_device_registration<U: Into<String>>(mut self, base_url: U) -> Self {
        self.device_registration.push(trim_base(base_url.into()));
        self
    }

    pub fn with_pre_auth_service<U: Into<String>>(mut self, base_url: U) -> Self {
        self.pre_auth.push(trim_base(base_url.into()));
        self
    }

    /// Parse `name=url,name=url` as used by `SPARK_SERVICES`.
    pub fn parse(definitions: &str) -> Result<Self, CatalogError> {
        definitions
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .try_fold(Self::new(), |catalog, entry| match entry.split_once('=') {
                Some((name, url)) if !name.trim().is_empty() && !url.trim().is_empty() => {
                    Ok(catalog.with_service(name.trim(), url.trim()))
                }
                _ => Err(CatalogError::InvalidDefinition(entry.to_owned())),
            })
    }

    pub fn services(&self) -> impl Iterator<Item = (&str, &str)> {
        self.services
            .iter()
            .map(|(name, url)| (name.as_str(), url.as_str()))
    }
}

fn trim_base(url: String) -> String {
    url.trim_end_matches('/').to_owned()
}

fn has_prefix(bases: &[String], uri: &str) -> bool {
    bases.iter().any(|base| {
        uri.strip_prefix(base.as_str())
            .is_some_and(|rest| rest.is_empty() || rest.starts_with(['/', '?']))
    })
}

impl ServiceCatalog for StaticServiceCatalog {
    fn is_service_url(&self, uri: &str) -> bool {
        self.services.values().any(|base| has_prefix(std::slice::from_ref(base), uri))
    }

    fn is_device_registration_url(&self, uri: &str) -> bool {
        has_prefix(&self.device_registration, uri)
    }

    fn is_pre_auth_service_url(&self, uri: &str) -> bool {
        has_prefix(&self.pre_auth, uri)
    }

    fn resolve_service_url(&self, service: &str) -> Result<String, CatalogError> {
        self.services
            .get(service)
            .cloned()
            .ok_or_else(|| CatalogError::UnknownService(service.to_owned()))
    }
}
