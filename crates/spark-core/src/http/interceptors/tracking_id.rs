use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use super::targets_service;
use crate::catalog::ServiceCatalog;
use crate::http::{Interceptor, RequestError, RequestOptions};

pub const TRACKING_ID_HEADER: &str = "trackingid";

/// Produces `{prefix}_{base}_{counter}[_{suffix}]`. One generator per
/// client; the base is fixed for the generator's lifetime.
#[derive(Debug)]
pub struct TrackingIdGenerator {
    prefix: String,
    base: String,
    suffix: Option<String>,
    counter: AtomicU64,
}

impl TrackingIdGenerator {
    pub fn new<P: Into<String>>(prefix: P, suffix: Option<String>) -> Self {
        Self {
            prefix: prefix.into(),
            base: Uuid::new_v4().to_string(),
            suffix: suffix.filter(|suffix| !suffix.is_empty()),
            counter: AtomicU64::new(0),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn next_id(&self) -> String {
        let count = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        match &self.suffix {
            Some(suffix) => format!("{}_{}_{count}_{suffix}", self.prefix, self.base),
            None => format!("{}_{}_{count}", self.prefix, self.base),
        }
    }
}

pub struct TrackingIdInterceptor {
    generator: Arc<TrackingIdGenerator>,
    catalog: Arc<dyn ServiceCatalog>,
}

impl TrackingIdInterceptor {
    pub fn new(generator: Arc<TrackingIdGenerator>, catalog: Arc<dyn ServiceCatalog>) -> Self {
        Self { generator, catalog }
    }

    fn is_tracked(&self, options: &RequestOptions) -> bool {
        targets_service(self.catalog.as_ref(), options)
            || options.uri.as_deref().is_some_and(|uri| {
                self.catalog.is_device_registration_url(uri)
                    || self.catalog.is_pre_auth_service_url(uri)
            })
    }
}

#[async_trait]
impl Interceptor for TrackingIdInterceptor {
    fn name(&self) -> &'static str {
        "tracking-id"
    }

    async fn on_request(&self, options: &mut RequestOptions) -> Result<(), RequestError> {
        if !options.headers.contains(TRACKING_ID_HEADER) && self.is_tracked(options) {
            options
                .headers
                .insert(TRACKING_ID_HEADER, self.generator.next_id());
        }
        Ok(())
    }
}
