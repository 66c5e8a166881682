//! Built-in interceptors, in their default order.

mod auth;
mod decrypt;
mod device_url;
mod logging;
mod rate_limit;
mod redirect;
mod service_url;
mod timing;
mod tracking_id;

pub use auth::{AuthInterceptor, AUTHORIZATION_HEADER};
pub use decrypt::{DecryptInterceptor, DecryptionError, DecryptionService, ENCRYPTED_ERROR_CODE};
pub use device_url::{DeviceUrlInterceptor, DEVICE_URL_HEADER};
pub use logging::LoggingInterceptor;
pub use rate_limit::{api_name, retry_after, RateLimitInterceptor, RETRY_AFTER_HEADER};
pub use redirect::{RedirectInterceptor, LOCATION_HEADER, NO_HTTP_REDIRECT_HEADER};
pub use service_url::ServiceUrlInterceptor;
pub use timing::TimingInterceptor;
pub use tracking_id::{TrackingIdGenerator, TrackingIdInterceptor, TRACKING_ID_HEADER};

use crate::catalog::ServiceCatalog;
use crate::http::RequestOptions;

/// True for service targets and uris under a known service base.
fn targets_service(catalog: &dyn ServiceCatalog, options: &RequestOptions) -> bool {
    options.service.is_some()
        || options
            .uri
            .as_deref()
            .is_some_and(|uri| catalog.is_service_url(uri))
}
