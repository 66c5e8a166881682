use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::catalog::ServiceCatalog;
use crate::http::{Interceptor, RequestError, RequestOptions};

/// Turns a `(service, resource)` target into a concrete uri.
pub struct ServiceUrlInterceptor {
    catalog: Arc<dyn ServiceCatalog>,
}

impl ServiceUrlInterceptor {
    pub fn new(catalog: Arc<dyn ServiceCatalog>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl Interceptor for ServiceUrlInterceptor {
    fn name(&self) -> &'static str {
        "service-url"
    }

    async fn on_request(&self, options: &mut RequestOptions) -> Result<(), RequestError> {
        if options.uri.is_some() {
            return Ok(());
        }
        let target = options.service.as_ref().ok_or(RequestError::MissingTarget)?;
        let base = self.catalog.resolve_service_url(&target.name)?;
        let resource = target.resource.trim_start_matches('/');
        let uri = if resource.is_empty() {
            base
        } else {
            format!("{base}/{resource}")
        };
        debug!(service = %target.name, %uri, "http: resolved service url");
        options.uri = Some(uri);
        Ok(())
    }
}
