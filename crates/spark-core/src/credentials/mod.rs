mod credential_store;
mod error;
mod manager;
mod oauth;
pub mod scope;
mod store;
mod token;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

pub use credential_store::{CredentialStore, FileCredentialStore};
pub use error::CredentialsError;
pub use manager::{CredentialsEvent, CredentialsManager, CredentialsPhase};
pub use oauth::{OAuthClient, OAuthConfig, OAuthEndpoints, SCOPE_REDUCTION_GRANT};
pub use store::TokenStore;
pub use token::Token;

pub const DEFAULT_RESERVED_SCOPE: &str = "spark:kms";

/// Host hook that mints a fresh JWT, used instead of the refresh-token grant
/// for guest or embedded sessions.
#[async_trait]
pub trait JwtRefresher: Send + Sync {
    async fn fetch_jwt(&self) -> Result<String, CredentialsError>;
}

#[derive(Clone)]
pub struct CredentialsConfig {
    /// Scope requested for the supertoken.
    pub scope: String,
    /// Removed from the default user-token scope.
    pub reserved_scope: String,
    pub jwt_refresher: Option<Arc<dyn JwtRefresher>>,
}

impl CredentialsConfig {
    pub fn new<S: Into<String>>(scope: S) -> Self {
        Self {
            scope: scope.into(),
            reserved_scope: DEFAULT_RESERVED_SCOPE.to_owned(),
            jwt_refresher: None,
        }
    }

    pub fn with_jwt_refresher(mut self, refresher: Arc<dyn JwtRefresher>) -> Self {
        self.jwt_refresher = Some(refresher);
        self
    }

    /// Scope handed out when a caller does not ask for one.
    pub fn default_user_scope(&self) -> String {
        scope::sort_scope(&scope::filter_scope(&self.reserved_scope, &self.scope))
    }
}

impl fmt::Debug for CredentialsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialsConfig")
            .field("scope", &self.scope)
            .field("reserved_scope", &self.reserved_scope)
            .field("jwt_refresher", &self.jwt_refresher.is_some())
            .finish()
    }
}
