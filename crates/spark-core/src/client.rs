use std::sync::Arc;

use serde_json::Value;
use tokio::sync::watch;
use tracing::debug;

use crate::catalog::ServiceCatalog;
use crate::config::ClientConfig;
use crate::credentials::CredentialsManager;
use crate::http::interceptors::{
    AuthInterceptor, DecryptInterceptor, DecryptionService, DeviceUrlInterceptor,
    LoggingInterceptor, RateLimitInterceptor, RedirectInterceptor, ServiceUrlInterceptor,
    TimingInterceptor, TrackingIdGenerator, TrackingIdInterceptor,
};
use crate::http::{
    Headers, Interceptor, Pipeline, RequestDefaults, RequestError, RequestExecutor,
    RequestOptions, Response, ReqwestExecutor,
};
use crate::upload::{UploadOrchestrator, UploadRequest};

/// Entry point for platform requests and uploads.
pub struct SparkClient {
    config: ClientConfig,
    credentials: CredentialsManager,
    catalog: Arc<dyn ServiceCatalog>,
    pipeline: Arc<Pipeline>,
    uploads: UploadOrchestrator,
    device_url: watch::Sender<Option<String>>,
    tracking_ids: Arc<TrackingIdGenerator>,
}

impl SparkClient {
    pub fn builder(
        credentials: CredentialsManager,
        catalog: Arc<dyn ServiceCatalog>,
    ) -> SparkClientBuilder {
        SparkClientBuilder {
            config: ClientConfig::default(),
            credentials,
            catalog,
            decryption: None,
            executor: None,
            interceptors: Vec::new(),
            device_url: None,
            default_headers: Headers::new(),
        }
    }

    pub async fn request(&self, options: RequestOptions) -> Result<Response, RequestError> {
        self.pipeline.request(options).await
    }

    pub async fn upload(&self, request: UploadRequest) -> Result<Value, RequestError> {
        self.uploads.upload(request).await
    }

    pub fn credentials(&self) -> &CredentialsManager {
        &self.credentials
    }

    pub fn catalog(&self) -> &Arc<dyn ServiceCatalog> {
        &self.catalog
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Set or clear the registered device URL sent with platform requests.
    pub fn set_device_url(&self, device_url: Option<String>) {
        self.device_url.send_replace(device_url);
    }

    pub fn tracking_id_base(&self) -> &str {
        self.tracking_ids.base()
    }

    pub fn interceptor_names(&self) -> Vec<&'static str> {
        self.pipeline.interceptor_names()
    }
}

pub struct SparkClientBuilder {
    config: ClientConfig,
    credentials: CredentialsManager,
    catalog: Arc<dyn ServiceCatalog>,
    decryption: Option<Arc<dyn DecryptionService>>,
    executor: Option<Arc<dyn RequestExecutor>>,
    interceptors: Vec<Arc<dyn Interceptor>>,
    device_url: Option<String>,
    default_headers: Headers,
}

impl SparkClientBuilder {
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn decryption(mut self, service: Arc<dyn DecryptionService>) -> Self {
        self.decryption = Some(service);
        self
    }

    pub fn executor(mut self, executor: Arc<dyn RequestExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Runs after the built-in interceptors in the pre-phase.
    pub fn interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn device_url<S: Into<String>>(mut self, device_url: S) -> Self {
        self.device_url = Some(device_url.into());
        self
    }

    pub fn default_header<N: AsRef<str>, V: Into<String>>(mut self, name: N, value: V) -> Self {
        self.default_headers.insert(name, value);
        self
    }

    pub fn build(self) -> Result<SparkClient, RequestError> {
        let executor = match self.executor {
            Some(executor) => executor,
            None => Arc::new(ReqwestExecutor::new(&self.config.user_agent)?),
        };

        let tracking_ids = Arc::new(TrackingIdGenerator::new(
            self.config.tracking_id_prefix.clone(),
            self.config.tracking_id_suffix.clone(),
        ));
        let (device_url, device_url_rx) = watch::channel(self.device_url);

        let mut interceptors: Vec<Arc<dyn Interceptor>> = vec![
            Arc::new(TimingInterceptor),
            Arc::new(ServiceUrlInterceptor::new(Arc::clone(&self.catalog))),
            Arc::new(RateLimitInterceptor::new()),
            Arc::new(RedirectInterceptor::new(
                Arc::clone(&self.catalog),
                self.config.max_app_level_redirects,
            )),
            Arc::new(AuthInterceptor::new(
                self.credentials.clone(),
                Arc::clone(&self.catalog),
                self.config.max_replay_attempts,
            )),
            Arc::new(TrackingIdInterceptor::new(
                Arc::clone(&tracking_ids),
                Arc::clone(&self.catalog),
            )),
            Arc::new(DeviceUrlInterceptor::new(device_url_rx)),
        ];
        if let Some(service) = self.decryption {
            interceptors.push(Arc::new(DecryptInterceptor::new(service)));
        }
        if self.config.network_logging {
            interceptors.push(Arc::new(LoggingInterceptor));
        }
        interceptors.extend(self.interceptors);

        let defaults = RequestDefaults {
            headers: self.default_headers,
            ..RequestDefaults::default()
        };
        let pipeline = Arc::new(Pipeline::new(
            interceptors,
            executor,
            defaults,
            self.config.max_pipeline_passes(),
        ));
        debug!(interceptors = ?pipeline.interceptor_names(), "client: pipeline assembled");

        let uploads = UploadOrchestrator::new(Arc::clone(&pipeline), &self.config);

        Ok(SparkClient {
            config: self.config,
            credentials: self.credentials,
            catalog: self.catalog,
            pipeline,
            uploads,
            device_url,
            tracking_ids,
        })
    }
}
