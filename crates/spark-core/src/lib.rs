//! Core networking for spark clients: credentials, the interceptor
//! pipeline, and uploads. Shared by the CLI and any embedding application.

pub mod catalog;
pub mod client;
pub mod config;
pub mod credentials;
pub mod flight;
pub mod http;
pub mod upload;

#[cfg(test)]
mod test_support;

pub use catalog::{CatalogError, ServiceCatalog, StaticServiceCatalog};
pub use client::{SparkClient, SparkClientBuilder};
pub use config::{ClientConfig, ConfigError, ConfigLocator};
pub use credentials::{CredentialsConfig, CredentialsError, CredentialsManager, Token};
pub use http::{RequestError, RequestOptions, Response};
pub use upload::{SessionBinding, UploadPhase, UploadRequest};
