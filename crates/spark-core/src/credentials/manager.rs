use std::sync::{Arc, Weak};
use std::time::Duration as StdDuration;

use chrono::Utc;
use futures::future::join_all;
use rand::Rng;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::scope::sort_scope;
use super::{
    CredentialStore, CredentialsConfig, CredentialsError, OAuthClient, Token, TokenStore,
};
use crate::flight::SingleFlight;

const EVENT_CAPACITY: usize = 16;
const INVALID_REQUEST: &str = "invalid_request";

/// Lifecycle notifications for the host application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialsEvent {
    Refreshed,
    Invalidated,
    /// The refresh grant was rejected as invalid; every token was dropped.
    InvalidRequest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialsPhase {
    Idle,
    Refreshing,
    Invalidated,
}

/// Owns the supertoken and its downscoped children.
///
/// Cloning is cheap; clones share state. Refreshes are collapsed into one
/// network call per manager and downscopes into one call per scope.
#[derive(Clone)]
pub struct CredentialsManager {
    inner: Arc<Inner>,
}

struct Inner {
    oauth: OAuthClient,
    config: CredentialsConfig,
    state: Mutex<State>,
    refresh_flight: SingleFlight<(), Token, CredentialsError>,
    downscope_flight: SingleFlight<String, Token, CredentialsError>,
    refreshing: watch::Sender<bool>,
    ready: watch::Sender<bool>,
    persistence: Option<Persistence>,
    events: broadcast::Sender<CredentialsEvent>,
}

#[derive(Default)]
struct State {
    supertoken: Option<Token>,
    user_tokens: TokenStore,
    refresh_timer: Option<JoinHandle<()>>,
    invalidated: bool,
    /// Bumped whenever the supertoken is replaced or dropped from outside a
    /// refresh; a refresh that started under an older epoch is discarded.
    epoch: u64,
}

impl State {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.refresh_timer.take() {
            timer.abort();
        }
    }

    fn advance_epoch(&mut self) {
        self.epoch = self.epoch.wrapping_add(1);
    }
}

struct Persistence {
    store: Arc<dyn CredentialStore>,
    profile: String,
}

/// Holds the refreshing flag up for as long as a refresh runs, including
/// when the refresh future is dropped early.
struct RefreshingGuard<'a>(&'a watch::Sender<bool>);

impl<'a> RefreshingGuard<'a> {
    fn raise(flag: &'a watch::Sender<bool>) -> Self {
        flag.send_replace(true);
        Self(flag)
    }
}

impl Drop for RefreshingGuard<'_> {
    fn drop(&mut self) {
        self.0.send_replace(false);
    }
}

impl CredentialsManager {
    pub fn new(oauth: OAuthClient, config: CredentialsConfig) -> Self {
        Self::build(oauth, config, None)
    }

    /// Manager that restores and persists its supertoken through `store`.
    pub fn with_store<S: Into<String>>(
        oauth: OAuthClient,
        config: CredentialsConfig,
        store: Arc<dyn CredentialStore>,
        profile: S,
    ) -> Self {
        let persistence = Persistence {
            store,
            profile: profile.into(),
        };
        Self::build(oauth, config, Some(persistence))
    }

    fn build(oauth: OAuthClient, config: CredentialsConfig, persistence: Option<Persistence>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                oauth,
                config,
                state: Mutex::new(State::default()),
                refresh_flight: SingleFlight::new(),
                downscope_flight: SingleFlight::new(),
                refreshing: watch::Sender::new(false),
                ready: watch::Sender::new(false),
                persistence,
                events,
            }),
        }
    }

    pub fn config(&self) -> &CredentialsConfig {
        &self.inner.config
    }

    pub fn events(&self) -> broadcast::Receiver<CredentialsEvent> {
        self.inner.events.subscribe()
    }

    /// Install `supertoken`, or restore the persisted one when `None`, then
    /// mark the manager ready.
    pub async fn initialize(&self, supertoken: Option<Token>) -> Result<(), CredentialsError> {
        let (supertoken, restored) = match supertoken {
            Some(token) => (Some(token), false),
            None => (self.load_persisted()?, true),
        };

        if let Some(token) = supertoken {
            if !restored {
                self.persist(&token);
            }
            let timer = self.schedule_refresh(&token);
            let mut state = self.inner.state.lock().await;
            state.cancel_timer();
            state.user_tokens.drain();
            state.supertoken = Some(token);
            state.invalidated = false;
            state.advance_epoch();
            state.refresh_timer = timer;
            info!(restored, "credentials: supertoken installed");
        } else {
            debug!("credentials: initialised without a supertoken");
        }

        self.inner.ready.send_replace(true);
        Ok(())
    }

    /// Replace the supertoken, reviving an invalidated manager.
    pub async fn set_supertoken(&self, supertoken: Token) -> Result<(), CredentialsError> {
        self.initialize(Some(supertoken)).await
    }

    pub async fn supertoken(&self) -> Option<Token> {
        self.inner.state.lock().await.supertoken.clone()
    }

    pub fn is_ready(&self) -> bool {
        *self.inner.ready.borrow()
    }

    pub async fn phase(&self) -> CredentialsPhase {
        if *self.inner.refreshing.borrow() {
            return CredentialsPhase::Refreshing;
        }
        if self.inner.state.lock().await.invalidated {
            CredentialsPhase::Invalidated
        } else {
            CredentialsPhase::Idle
        }
    }

    pub async fn can_authorize(&self) -> bool {
        let state = self.inner.state.lock().await;
        state.supertoken.as_ref().is_some_and(Token::can_authorize)
            || self.inner.config.jwt_refresher.is_some()
    }

    pub async fn can_refresh(&self) -> bool {
        let state = self.inner.state.lock().await;
        state.supertoken.as_ref().is_some_and(Token::can_refresh)
            || self.inner.config.jwt_refresher.is_some()
    }

    /// Token for `scope`, or for the configured scope minus the reserved
    /// scope when `None`.
    pub async fn get_user_token(&self, scope: Option<&str>) -> Result<Token, CredentialsError> {
        self.wait_until_ready().await;
        self.wait_for_refresh().await;

        if !self.can_authorize().await {
            return Err(CredentialsError::NotAuthorizable);
        }

        let scope = match scope {
            Some(scope) => sort_scope(scope),
            None => self.inner.config.default_user_scope(),
        };

        let supertoken = self.usable_supertoken().await?;
        if scope == supertoken.scope {
            return Ok(supertoken);
        }

        {
            let state = self.inner.state.lock().await;
            if let Some(token) = state
                .user_tokens
                .get(&scope)
                .filter(|token| !token.access_token.is_empty())
            {
                return Ok(token.clone());
            }
        }

        let manager = self.clone();
        let key = scope.clone();
        self.inner
            .downscope_flight
            .run(scope, move || async move { manager.downscope_and_store(key).await })
            .await
    }

    /// Refresh the supertoken. Concurrent calls share one network refresh.
    pub async fn refresh(&self) -> Result<Token, CredentialsError> {
        let manager = self.clone();
        self.inner
            .refresh_flight
            .run((), move || async move { manager.refresh_now().await })
            .await
    }

    /// Drop every token and cancel the refresh timer.
    pub async fn invalidate(&self) {
        info!("credentials: invalidating tokens");
        {
            let mut state = self.inner.state.lock().await;
            state.cancel_timer();
            state.supertoken = None;
            state.user_tokens.drain();
            state.invalidated = true;
            state.advance_epoch();
        }
        if let Some(persistence) = &self.inner.persistence {
            if let Err(err) = persistence.store.delete(&persistence.profile) {
                warn!(error = %err, "credentials: failed to clear persisted supertoken");
            }
        }
        info!("credentials: finished removing tokens");
        self.emit(CredentialsEvent::Invalidated);
    }

    /// Revoke the supertoken where possible, then invalidate.
    pub async fn logout(&self) {
        if let Some(supertoken) = self.supertoken().await {
            if let Err(err) = self.inner.oauth.revoke(&supertoken).await {
                warn!(error = %err, "credentials: failed to revoke supertoken");
            }
        }
        self.invalidate().await;
    }

    /// Machine token from the client credentials grant. Never cached.
    pub async fn get_client_token(&self, scope: Option<&str>) -> Result<Token, CredentialsError> {
        self.inner.oauth.client_credentials(scope).await
    }

    pub async fn org_id(&self) -> Result<String, CredentialsError> {
        let state = self.inner.state.lock().await;
        state
            .supertoken
            .as_ref()
            .ok_or(CredentialsError::NotAuthorizable)?
            .org_id()
    }

    async fn wait_until_ready(&self) {
        let mut ready = self.inner.ready.subscribe();
        let _ = ready.wait_for(|ready| *ready).await;
    }

    async fn wait_for_refresh(&self) {
        let mut refreshing = self.inner.refreshing.subscribe();
        if *refreshing.borrow() {
            debug!("credentials: token refresh in flight, deferring");
        }
        let _ = refreshing.wait_for(|refreshing| !*refreshing).await;
    }

    /// Current supertoken, refreshed first when it is missing or expired and
    /// a refresh path exists.
    async fn usable_supertoken(&self) -> Result<Token, CredentialsError> {
        let current = self.supertoken().await;
        let jwt_mode = self.inner.config.jwt_refresher.is_some();
        match current {
            Some(token) if !token.is_expired() => Ok(token),
            Some(token) if token.can_refresh() || jwt_mode => self.refresh().await,
            None if jwt_mode => self.refresh().await,
            _ => Err(CredentialsError::NotAuthorizable),
        }
    }

    async fn downscope_and_store(&self, scope: String) -> Result<Token, CredentialsError> {
        let supertoken = self
            .supertoken()
            .await
            .ok_or(CredentialsError::NotAuthorizable)?;
        let token = self.downscope(&supertoken, &scope).await;
        self.inner.state.lock().await.user_tokens.insert(token.clone());
        Ok(token)
    }

    /// Never fails: a rejected downscope falls back to the supertoken
    /// labelled with the requested scope.
    async fn downscope(&self, supertoken: &Token, scope: &str) -> Token {
        match self.inner.oauth.downscope(supertoken, scope).await {
            Ok(token) => token,
            Err(err) => {
                warn!(%scope, error = %err, "credentials: failed to downscope supertoken, using supertoken");
                supertoken.relabel(scope)
            }
        }
    }

    async fn refresh_now(&self) -> Result<Token, CredentialsError> {
        let _refreshing = RefreshingGuard::raise(&self.inner.refreshing);
        info!("credentials: refresh requested");

        let (previous, children, epoch) = {
            let state = self.inner.state.lock().await;
            if state.invalidated {
                return Err(CredentialsError::NotAuthorizable);
            }
            let children: Vec<Token> = state.user_tokens.tokens().cloned().collect();
            (state.supertoken.clone(), children, state.epoch)
        };

        let supertoken = match self.request_supertoken(previous.as_ref()).await {
            Ok(token) => token,
            Err(err) => {
                warn!(error = %err, "credentials: refresh failed");
                if err.grant_code() == Some(INVALID_REQUEST)
                    && self.inner.state.lock().await.epoch == epoch
                {
                    self.drop_tokens().await;
                    self.emit(CredentialsEvent::InvalidRequest);
                }
                return Err(err);
            }
        };

        {
            let mut state = self.inner.state.lock().await;
            if state.epoch != epoch {
                warn!("credentials: tokens replaced during refresh, discarding refreshed supertoken");
                return Err(CredentialsError::NotAuthorizable);
            }
            state.cancel_timer();
            state.supertoken = Some(supertoken.clone());
            // Under the lock, ordered against the delete in invalidate.
            self.persist(&supertoken);
        }

        let renewals = children.iter().map(|child| self.downscope(&supertoken, &child.scope));
        let renewed = join_all(renewals).await;
        {
            let mut state = self.inner.state.lock().await;
            if state.epoch != epoch {
                warn!("credentials: tokens replaced during refresh, discarding renewed user tokens");
                return Err(CredentialsError::NotAuthorizable);
            }
            for token in renewed {
                state.user_tokens.insert(token);
            }
        }

        let revocations = children
            .iter()
            .filter(|child| Some(&child.access_token) != previous.as_ref().map(|t| &t.access_token))
            .map(|child| async move {
                if let Err(err) = self.inner.oauth.revoke(child).await {
                    warn!(scope = %child.scope, error = %err, "credentials: failed to revoke user token");
                }
            });
        join_all(revocations).await;

        {
            let mut state = self.inner.state.lock().await;
            if state.epoch == epoch {
                state.refresh_timer = self.schedule_refresh(&supertoken);
            }
        }

        info!(children = children.len(), "credentials: refresh complete");
        self.emit(CredentialsEvent::Refreshed);
        Ok(supertoken)
    }

    async fn request_supertoken(&self, previous: Option<&Token>) -> Result<Token, CredentialsError> {
        if let Some(refresher) = &self.inner.config.jwt_refresher {
            debug!("credentials: refreshing through JWT callback");
            let jwt = refresher.fetch_jwt().await?;
            return self.inner.oauth.exchange_jwt(&jwt, &self.inner.config.scope).await;
        }

        match previous {
            Some(token) if token.can_refresh() => self.inner.oauth.refresh(token).await,
            _ => Err(CredentialsError::RefreshUnavailable),
        }
    }

    async fn drop_tokens(&self) {
        let mut state = self.inner.state.lock().await;
        state.cancel_timer();
        state.supertoken = None;
        state.user_tokens.drain();
        state.advance_epoch();
        drop(state);

        if let Some(persistence) = &self.inner.persistence {
            if let Err(err) = persistence.store.delete(&persistence.profile) {
                warn!(error = %err, "credentials: failed to clear persisted supertoken");
            }
        }
    }

    /// Spawn a timer that refreshes `supertoken` at a random point between
    /// 60% and 90% of its remaining lifetime, or right away if it has
    /// already expired. The timer only holds a weak reference.
    fn schedule_refresh(&self, supertoken: &Token) -> Option<JoinHandle<()>> {
        let expires_at = supertoken.expires_at?;
        if !supertoken.can_refresh() && self.inner.config.jwt_refresher.is_none() {
            return None;
        }

        let remaining = (expires_at - Utc::now()).to_std().unwrap_or(StdDuration::ZERO);
        let delay = refresh_delay(remaining, &mut rand::thread_rng());
        debug!(delay_secs = delay.as_secs(), "credentials: scheduling token refresh");

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let manager = CredentialsManager { inner };
            // Detached so that cancelling this timer from inside the refresh
            // does not abort the refresh itself.
            tokio::spawn(async move {
                if let Err(err) = manager.refresh().await {
                    warn!(error = %err, "credentials: scheduled refresh failed");
                }
            });
        }))
    }

    #[cfg(test)]
    async fn refresh_timer(&self) -> Option<tokio::task::AbortHandle> {
        self.inner
            .state
            .lock()
            .await
            .refresh_timer
            .as_ref()
            .map(JoinHandle::abort_handle)
    }

    fn load_persisted(&self) -> Result<Option<Token>, CredentialsError> {
        match &self.inner.persistence {
            Some(persistence) => persistence.store.load(&persistence.profile),
            None => Ok(None),
        }
    }

    fn persist(&self, supertoken: &Token) {
        if let Some(persistence) = &self.inner.persistence {
            if let Err(err) = persistence.store.save(&persistence.profile, supertoken) {
                warn!(error = %err, "credentials: failed to persist supertoken");
            }
        }
    }

    fn emit(&self, event: CredentialsEvent) {
        let _ = self.inner.events.send(event);
    }
}

/// Point within `remaining` at which to refresh: a uniform fraction in
/// [0.6, 0.9), or immediately once nothing remains.
fn refresh_delay<R: Rng + ?Sized>(remaining: StdDuration, rng: &mut R) -> StdDuration {
    if remaining.is_zero() {
        return StdDuration::ZERO;
    }
    remaining.mul_f64(rng.gen_range(0.6..0.9))
}
