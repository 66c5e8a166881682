use async_trait::async_trait;
use tokio::sync::watch;
use url::Url;

use crate::http::{Interceptor, RequestError, RequestOptions};

pub const DEVICE_URL_HEADER: &str = "cisco-device-url";

/// Adds the registered device URL to outgoing platform requests.
pub struct DeviceUrlInterceptor {
    device_url: watch::Receiver<Option<String>>,
}

impl DeviceUrlInterceptor {
    pub fn new(device_url: watch::Receiver<Option<String>>) -> Self {
        Self { device_url }
    }
}

const AUTHORIZATION_SEGMENTS: [&str; 5] = ["idb", "oauth", "oauth2", "saml", "saml2"];

/// Identity broker hosts, or paths with an oauth/SAML/idb segment.
fn is_authorization_endpoint(uri: &str) -> bool {
    let Ok(url) = Url::parse(uri) else {
        return false;
    };
    if url
        .host_str()
        .and_then(|host| host.split('.').next())
        .is_some_and(|label| label.starts_with("idbroker"))
    {
        return true;
    }
    url.path_segments().is_some_and(|mut segments| {
        segments.any(|segment| {
            AUTHORIZATION_SEGMENTS
                .iter()
                .any(|known| segment.eq_ignore_ascii_case(known))
        })
    })
}

#[async_trait]
impl Interceptor for DeviceUrlInterceptor {
    fn name(&self) -> &'static str {
        "device-url"
    }

    async fn on_request(&self, options: &mut RequestOptions) -> Result<(), RequestError> {
        let device_url = self.device_url.borrow().clone();
        let Some(device_url) = device_url else {
            return Ok(());
        };
        if options.headers.present_len() == 0 || options.headers.is_explicit(DEVICE_URL_HEADER) {
            return Ok(());
        }
        if options.uri.as_deref().is_some_and(is_authorization_endpoint) {
            return Ok(());
        }
        options.headers.insert(DEVICE_URL_HEADER, device_url);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn attaches_known_device_url() {
        let (tx, rx) = watch::channel(None);
        let interceptor = DeviceUrlInterceptor::new(rx);

        let mut options = RequestOptions::get("https://api.example.com/x").with_header("trackingid", "t");
        interceptor.on_request(&mut options).await.unwrap();
        assert!(!options.headers.contains(DEVICE_URL_HEADER));

        tx.send_replace(Some("https://wdm.example.com/devices/1".to_owned()));
        interceptor.on_request(&mut options).await.unwrap();
        assert_eq!(
            options.headers.get(DEVICE_URL_HEADER),
            Some("https://wdm.example.com/devices/1")
        );
    }

    #[tokio::test]
    async fn skips_bare_and_authorization_requests() {
        let (_tx, rx) = watch::channel(Some("https://wdm.example.com/devices/1".to_owned()));
        let interceptor = DeviceUrlInterceptor::new(rx);

        let mut bare = RequestOptions::get("https://api.example.com/x");
        interceptor.on_request(&mut bare).await.unwrap();
        assert!(!bare.headers.contains(DEVICE_URL_HEADER));

        let mut idb = RequestOptions::post("https://idbroker.example.com/idb/oauth2/v1/access_token")
            .with_header("trackingid", "t");
        interceptor.on_request(&mut idb).await.unwrap();
        assert!(!idb.headers.contains(DEVICE_URL_HEADER));

        let mut saml = RequestOptions::get("https://sso.example.com/saml2/login")
            .with_header("trackingid", "t");
        interceptor.on_request(&mut saml).await.unwrap();
        assert!(!saml.headers.contains(DEVICE_URL_HEADER));

        let mut preset = RequestOptions::get("https://api.example.com/x")
            .with_header("cisco-device-url", "https://other/device");
        interceptor.on_request(&mut preset).await.unwrap();
        assert_eq!(preset.headers.get(DEVICE_URL_HEADER), Some("https://other/device"));
    }

    #[tokio::test]
    async fn oauth_lookalike_service_paths_get_device_url() {
        let (_tx, rx) = watch::channel(Some("https://wdm.example.com/devices/1".to_owned()));
        let interceptor = DeviceUrlInterceptor::new(rx);

        let mut options = RequestOptions::get("https://api.example.com/v1/oauthClients")
            .with_header("trackingid", "t");
        interceptor.on_request(&mut options).await.unwrap();
        assert_eq!(
            options.headers.get(DEVICE_URL_HEADER),
            Some("https://wdm.example.com/devices/1")
        );
    }
}
