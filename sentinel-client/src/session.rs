//! Session lifecycle: login, silent refresh, logout
//!
//! [`SessionManager`] is the only component that writes tokens on the
//! protected-read path. Concurrent [`SessionManager::ensure_session`] calls
//! share one refresh request: the first caller starts it on a spawned task and
//! parks a [`Shared`] handle in `inflight`; later callers await a clone of
//! that handle instead of issuing their own request.

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use sentinel_core::{log_operation_error, log_operation_start, ApiError, AuthenticatedUser, TokenPair};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::executor::RequestExecutor;
use crate::token_store::TokenStore;

pub const LOGIN_ENDPOINT: &str = "/token";
pub const REFRESH_ENDPOINT: &str = "/refresh-token";
pub const LOGOUT_ENDPOINT: &str = "/logout";
pub const CURRENT_USER_ENDPOINT: &str = "/users/me";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticating,
    Authenticated,
}

type RefreshHandle = Shared<BoxFuture<'static, Result<TokenPair, ApiError>>>;

pub struct SessionManager {
    executor: Arc<RequestExecutor>,
    tokens: Arc<dyn TokenStore>,
    state: Arc<RwLock<SessionState>>,
    inflight: Arc<Mutex<Option<RefreshHandle>>>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("state", &self.state())
            .field("refresh_in_flight", &self.inflight.lock().is_some())
            .finish()
    }
}

impl SessionManager {
    /// Build a manager over the executor's token store.
    ///
    /// The initial state reflects what the store already holds, so a session
    /// persisted by an earlier run is picked up as Authenticated.
    pub fn new(executor: Arc<RequestExecutor>) -> Self {
        let tokens = executor.tokens().clone();
        let initial = if tokens.access_token().is_some() {
            SessionState::Authenticated
        } else {
            SessionState::Unauthenticated
        };

        Self {
            executor,
            tokens,
            state: Arc::new(RwLock::new(initial)),
            inflight: Arc::new(Mutex::new(None)),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state() == SessionState::Authenticated
    }

    fn set_state(&self, next: SessionState) {
        *self.state.write() = next;
    }

    /// Exchange credentials for a token pair, then fetch the user behind it.
    ///
    /// On any failure to obtain tokens the store is cleared and the state
    /// returns to Unauthenticated. A failure of the follow-up `/users/me`
    /// fetch is returned as-is; the freshly stored session is kept.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
    ) -> Result<AuthenticatedUser, ApiError> {
        log_operation_start!("login", username = username);
        self.set_state(SessionState::Authenticating);

        let issued = self
            .executor
            .request_form(
                LOGIN_ENDPOINT,
                &[("username", username), ("password", password)],
            )
            .await
            .and_then(|body| token_pair_from(LOGIN_ENDPOINT, body));

        let tokens = match issued {
            Ok(tokens) => tokens,
            Err(e) => {
                log_operation_error!("login", e, status = e.status);
                self.tokens.clear_session();
                self.set_state(SessionState::Unauthenticated);
                return Err(e);
            }
        };

        self.tokens.set_session(&tokens);
        self.set_state(SessionState::Authenticated);
        info!(username, "Logged in");

        self.current_user().await
    }

    /// Fetch the user behind the current access token
    pub async fn current_user(&self) -> Result<AuthenticatedUser, ApiError> {
        let body = self.executor.get(CURRENT_USER_ENDPOINT).await?;
        serde_json::from_value(body).map_err(|e| {
            ApiError::contract_violation(200, format!("Unexpected /users/me payload: {}", e))
        })
    }

    /// Make sure an access token is available before a protected read.
    ///
    /// - access token present: returns immediately, no network call
    /// - only a refresh token: one `/refresh-token` call, shared with any
    ///   concurrent callers; failure clears the store
    /// - neither: `AuthenticationMissing`, no network call
    pub async fn ensure_session(&self) -> Result<(), ApiError> {
        if self.tokens.access_token().is_some() {
            self.set_state(SessionState::Authenticated);
            return Ok(());
        }

        let pending = {
            let mut slot = self.inflight.lock();
            match slot.as_ref() {
                Some(handle) => {
                    debug!("Joining refresh already in flight");
                    handle.clone()
                }
                None => {
                    // A refresh may have finished between the check above
                    // and taking the slot; its rotated pair is already stored.
                    if self.tokens.access_token().is_some() {
                        self.set_state(SessionState::Authenticated);
                        return Ok(());
                    }
                    let Some(refresh_token) = self.tokens.refresh_token() else {
                        self.set_state(SessionState::Unauthenticated);
                        return Err(ApiError::authentication_missing());
                    };
                    let handle = self.start_refresh(refresh_token);
                    *slot = Some(handle.clone());
                    handle
                }
            }
        };

        pending.await.map(|_| ())
    }

    /// Spawn the refresh so it completes (and updates the store) even if
    /// every waiter goes away.
    fn start_refresh(&self, refresh_token: String) -> RefreshHandle {
        self.set_state(SessionState::Authenticating);

        let executor = self.executor.clone();
        let tokens = self.tokens.clone();
        let state = self.state.clone();
        let inflight = self.inflight.clone();

        let task = tokio::spawn(async move {
            log_operation_start!("refresh");
            let body = json!({ "refresh_token": refresh_token });
            let outcome = executor
                .post(REFRESH_ENDPOINT, Some(&body))
                .await
                .map_err(ApiError::into_expired)
                .and_then(|body| token_pair_from(REFRESH_ENDPOINT, body));

            match &outcome {
                Ok(pair) => {
                    tokens.set_session(pair);
                    *state.write() = SessionState::Authenticated;
                    info!("Session refreshed");
                }
                Err(e) => {
                    log_operation_error!("refresh", e, status = e.status);
                    tokens.clear_session();
                    *state.write() = SessionState::Unauthenticated;
                }
            }

            inflight.lock().take();
            outcome
        });

        async move {
            task.await.unwrap_or_else(|e| {
                Err(ApiError::network(format!("Refresh task aborted: {}", e)))
            })
        }
        .boxed()
        .shared()
    }

    /// End the session locally, telling the backend when possible.
    ///
    /// A refresh still in flight is awaited first, so it cannot write its
    /// pair back after the store is cleared. The `/logout` notification is
    /// best-effort; the store is cleared whatever it returns.
    pub async fn logout(&self) {
        let pending = self.inflight.lock().clone();
        if let Some(pending) = pending {
            debug!("Waiting for in-flight refresh before logout");
            let _ = pending.await;
        }

        if let Some(refresh_token) = self.tokens.refresh_token() {
            let body = json!({ "refresh_token": refresh_token });
            match self.executor.post(LOGOUT_ENDPOINT, Some(&body)).await {
                Ok(_) => debug!("Backend acknowledged logout"),
                Err(e) => warn!(
                    status = e.status,
                    error = %e,
                    "Logout notification failed; clearing local session anyway"
                ),
            }
        }

        self.tokens.clear_session();
        self.set_state(SessionState::Unauthenticated);
        info!("Logged out");
    }
}

/// Pull the token pair out of a `/token` or `/refresh-token` response.
fn token_pair_from(endpoint: &str, body: Value) -> Result<TokenPair, ApiError> {
    let access_token = body
        .get("access_token")
        .and_then(Value::as_str)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| {
            ApiError::contract_violation(
                200,
                format!("{} response did not include an access token", endpoint),
            )
        })?;

    let refresh_token = body
        .get("refresh_token")
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(TokenPair {
        access_token: access_token.to_string(),
        refresh_token,
    })
}
