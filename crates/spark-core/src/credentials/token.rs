use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::scope::sort_scope;
use super::CredentialsError;

pub const DEFAULT_TOKEN_TYPE: &str = "Bearer";

/// One OAuth grant: the supertoken or a downscoped child of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub access_token: String,
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub refresh_token_expires_at: Option<DateTime<Utc>>,
    /// Canonical (sorted) scope string.
    #[serde(default)]
    pub scope: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

fn default_token_type() -> String {
    DEFAULT_TOKEN_TYPE.to_owned()
}

impl Token {
    pub fn new<S: Into<String>>(access_token: S, scope: &str) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            token_type: default_token_type(),
            expires_at: None,
            refresh_token_expires_at: None,
            scope: sort_scope(scope),
            created_at: Utc::now(),
        }
    }

    pub fn with_refresh_token<S: Into<String>>(mut self, refresh_token: S) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn with_expires_in(self, lifetime: Duration) -> Self {
        let expires_at = Utc::now() + lifetime;
        self.with_expires_at(expires_at)
    }

    /// Copy of this token relabelled with another scope.
    pub fn relabel(&self, scope: &str) -> Self {
        Self {
            scope: sort_scope(scope),
            ..self.clone()
        }
    }

    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(ts) => Utc::now() >= ts,
            None => false,
        }
    }

    pub fn can_refresh(&self) -> bool {
        self.refresh_token
            .as_deref()
            .is_some_and(|token| !token.is_empty())
    }

    /// True when the access token is usable right now, or when it can be
    /// renewed with the refresh token.
    pub fn can_authorize(&self) -> bool {
        (!self.access_token.is_empty() && !self.is_expired()) || self.can_refresh()
    }

    /// Value for the `authorization` header, e.g. `Bearer abc`.
    pub fn authorization(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }

    /// Organisation id carried by the token: the `realm` claim of a JWT, or
    /// the trailing field of a `<a>_<b>_<org>` user token.
    pub fn org_id(&self) -> Result<String, CredentialsError> {
        org_id_from_jwt(&self.access_token)
            .or_else(|| org_id_from_user_token(&self.access_token))
            .ok_or(CredentialsError::OrgIdUnavailable)
    }
}

fn org_id_from_jwt(token: &str) -> Option<String> {
    let mut parts = token.split('.');
    let (_header, payload, _signature) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }
    let decoded = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&decoded).ok()?;
    claims
        .get("realm")
        .and_then(|realm| realm.as_str())
        .map(ToOwned::to_owned)
}

fn org_id_from_user_token(token: &str) -> Option<String> {
    let fields: Vec<&str> = token.split('_').collect();
    match fields.as_slice() {
        [_, _, org] if !org.is_empty() => Some((*org).to_owned()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_detection() {
        let live = Token::new("ST1", "a").with_expires_in(Duration::minutes(1));
        assert!(!live.is_expired());
        assert!(live.can_authorize());

        let expired = Token::new("ST1", "a").with_expires_at(Utc::now() - Duration::seconds(1));
        assert!(expired.is_expired());
        assert!(!expired.can_authorize());
    }

    #[test]
    fn refresh_token_keeps_expired_token_authorizable() {
        let token = Token::new("ST1", "a")
            .with_expires_at(Utc::now() - Duration::seconds(1))
            .with_refresh_token("RT1");
        assert!(token.can_refresh());
        assert!(token.can_authorize());
    }

    #[test]
    fn scope_is_canonicalised() {
        let token = Token::new("ST1", "c a b");
        assert_eq!(token.scope, "a b c");
        assert_eq!(token.relabel("z y").scope, "y z");
    }

    #[test]
    fn authorization_header_value() {
        assert_eq!(Token::new("ST1", "").authorization(), "Bearer ST1");
    }

    #[test]
    fn org_id_from_jwt_realm() {
        let payload = URL_SAFE_NO_PAD.encode(br#"{"realm":"org-123","sub":"user"}"#);
        let jwt = format!("eyJhbGciOiJIUzI1NiJ9.{payload}.signature");
        assert_eq!(Token::new(jwt, "").org_id().unwrap(), "org-123");
    }

    #[test]
    fn org_id_from_user_token_fields() {
        let token = Token::new("abc_def_org-456", "");
        assert_eq!(token.org_id().unwrap(), "org-456");
    }

    #[test]
    fn org_id_unavailable() {
        let err = Token::new("opaque", "").org_id().unwrap_err();
        assert!(matches!(err, CredentialsError::OrgIdUnavailable));
    }
}
