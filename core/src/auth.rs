//! Auth state: the single source of truth for the current session.
//!
//! # Design
//! `AuthStore` is a cheap, cloneable handle over shared state. It is passed
//! explicitly to whatever needs it (the HTTP client, the OAuth callback, the
//! CLI) instead of living in a global.
//!
//! Every transition that changes the persisted fields writes the record through
//! `SessionStorage`. A failed write is logged and does not fail the transition.
//! The state lock is never held across an `.await`.
//!
//! Refresh is single-flight. The first caller spawns the provider call as a
//! task and installs a shared handle to it in `refresh`; callers arriving while
//! it is pending await that same handle and observe the same result. The task
//! runs to completion even when every waiter is dropped, so a rotated token is
//! always stored. The slot is cleared once the refresh settles.
//!
//! `generation` counts sign-ins and sign-outs. A refresh only writes its
//! outcome if the generation it started under is still current, so a session
//! ended (or replaced) mid-refresh stays ended.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::error::ApiError;
use crate::identity::IdentityProvider;
use crate::session::{AuthResponse, AuthSnapshot, PersistedSession, User};
use crate::storage::SessionStorage;

type SharedRefresh = Shared<BoxFuture<'static, Result<AuthResponse, ApiError>>>;

struct InflightRefresh {
    id: u64,
    future: SharedRefresh,
}

struct Inner {
    state: RwLock<AuthSnapshot>,
    provider: Arc<dyn IdentityProvider>,
    storage: Arc<dyn SessionStorage>,
    refresh: Mutex<Option<InflightRefresh>>,
    next_refresh_id: AtomicU64,
    generation: AtomicU64,
}

#[derive(Clone)]
pub struct AuthStore {
    inner: Arc<Inner>,
}

impl AuthStore {
    /// Create a store and rehydrate it from `storage`.
    ///
    /// The store starts with `is_loading = true`; `initialize()` settles it.
    pub fn new(provider: Arc<dyn IdentityProvider>, storage: Arc<dyn SessionStorage>) -> Self {
        let mut snapshot = AuthSnapshot {
            is_loading: true,
            ..AuthSnapshot::default()
        };
        match storage.load() {
            Ok(Some(persisted)) => {
                snapshot.user = persisted.user;
                snapshot.access_token = present(persisted.access_token);
                snapshot.refresh_token = present(persisted.refresh_token);
                snapshot.is_authenticated = persisted.is_authenticated;
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "could not load persisted session, starting signed out"),
        }

        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(snapshot),
                provider,
                storage,
                refresh: Mutex::new(None),
                next_refresh_id: AtomicU64::new(0),
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn snapshot(&self) -> AuthSnapshot {
        self.inner.state.read().clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.inner.state.read().access_token.clone()
    }

    pub fn user(&self) -> Option<User> {
        self.inner.state.read().user.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.state.read().is_authenticated
    }

    pub fn is_loading(&self) -> bool {
        self.inner.state.read().is_loading
    }

    /// Exchange an authorization code for a session.
    ///
    /// On failure the previous state is left untouched.
    pub async fn sign_in(&self, code: &str, redirect_uri: &str) -> Result<AuthResponse, ApiError> {
        match self.inner.provider.exchange_code(code, redirect_uri).await {
            Ok(response) => {
                self.transition(|state| fill(state, &response));
                info!(user_id = %response.user.id, "signed in");
                Ok(response)
            }
            Err(e) => {
                error!(error = %e, "sign-in failed");
                Err(e)
            }
        }
    }

    /// Trade the stored refresh token for a new session.
    ///
    /// Fails with `NoRefreshToken`, leaving state unchanged, when none is
    /// stored. Any other failure clears the session before being returned,
    /// unless the session was already ended or replaced in the meantime.
    pub async fn refresh_auth(&self) -> Result<AuthResponse, ApiError> {
        let future = {
            let mut slot = self.inner.refresh.lock();
            match slot.as_ref() {
                Some(inflight) => {
                    debug!(refresh_id = inflight.id, "joining in-flight refresh");
                    inflight.future.clone()
                }
                None => {
                    // Token and generation are read under one lock so a
                    // concurrent sign-out cannot fall between them.
                    let (refresh_token, generation) = {
                        let state = self.inner.state.read();
                        (
                            state.refresh_token.clone(),
                            self.inner.generation.load(Ordering::Acquire),
                        )
                    };
                    let Some(refresh_token) = refresh_token else {
                        return Err(ApiError::NoRefreshToken);
                    };
                    let id = self.inner.next_refresh_id.fetch_add(1, Ordering::Relaxed);
                    let store = self.clone();
                    let task = tokio::spawn(async move {
                        store.run_refresh(id, generation, refresh_token).await
                    });
                    let store = self.clone();
                    let future = async move {
                        match task.await {
                            Ok(result) => result,
                            Err(e) => {
                                store.release_refresh(id);
                                Err(ApiError::RefreshFailed(format!("refresh task failed: {e}")))
                            }
                        }
                    }
                    .boxed()
                    .shared();
                    *slot = Some(InflightRefresh {
                        id,
                        future: future.clone(),
                    });
                    future
                }
            }
        };
        future.await
    }

    async fn run_refresh(
        &self,
        id: u64,
        generation: u64,
        refresh_token: String,
    ) -> Result<AuthResponse, ApiError> {
        debug!(refresh_id = id, "refreshing session");
        let result = self.inner.provider.refresh_session(&refresh_token).await;
        let result = match result {
            Ok(response) => {
                if self.update_since(generation, |state| fill(state, &response)) {
                    info!(user_id = %response.user.id, "session refreshed");
                    Ok(response)
                } else {
                    info!(refresh_id = id, "session changed during refresh, discarding result");
                    Err(ApiError::RefreshFailed("session changed during refresh".into()))
                }
            }
            Err(e) => {
                if self.update_since(generation, empty) {
                    warn!(error = %e, "session refresh failed, clearing session");
                } else {
                    debug!(error = %e, "stale refresh failed, session already changed");
                }
                Err(e)
            }
        };

        self.release_refresh(id);
        result
    }

    fn release_refresh(&self, id: u64) {
        let mut slot = self.inner.refresh.lock();
        if slot.as_ref().map(|r| r.id) == Some(id) {
            *slot = None;
        }
    }

    /// Local-only sign-out: clears user, tokens and the authenticated flag.
    ///
    /// A refresh still in flight will not restore the session.
    pub fn sign_out(&self) {
        self.transition(empty);
        info!("signed out");
    }

    /// Populate the session directly, as the OAuth callback does.
    pub fn set_session(&self, access_token: String, refresh_token: String, user: User) {
        let response = AuthResponse {
            user,
            access_token,
            refresh_token,
        };
        self.transition(|state| fill(state, &response));
    }

    /// Startup reconciliation. Idempotent; never fails.
    ///
    /// Trusts a stored user + access token as-is, otherwise recovers through
    /// the refresh token or the access token. Any failure ends signed out.
    pub async fn initialize(&self) {
        let _loading = LoadingGuard::enter(&self.inner.state);

        if let Err(e) = self.reconcile().await {
            warn!(error = %e, "session initialization failed, signing out");
            self.transition(empty);
        }
    }

    async fn reconcile(&self) -> Result<(), ApiError> {
        let (has_user, access_token, has_refresh) = {
            let state = self.inner.state.read();
            (
                state.user.is_some(),
                state.access_token.clone(),
                state.refresh_token.is_some(),
            )
        };
        debug!(
            has_user,
            has_access_token = access_token.is_some(),
            has_refresh_token = has_refresh,
            "initializing session"
        );

        match access_token {
            Some(_) if has_user => {
                self.update(|state| state.is_authenticated = true);
                info!("restored persisted session");
            }
            Some(access_token) => {
                let user = self.inner.provider.get_user(&access_token).await?;
                info!(user_id = %user.id, "restored session from access token");
                self.update(|state| {
                    state.user = Some(user);
                    state.is_authenticated = true;
                });
            }
            None if has_refresh => {
                self.refresh_auth().await?;
            }
            None => {
                debug!("no stored tokens");
                self.update(empty);
            }
        }
        Ok(())
    }

    /// A sign-in or sign-out: supersedes any refresh in flight.
    fn transition(&self, change: impl FnOnce(&mut AuthSnapshot)) {
        self.write(None, |state| {
            change(state);
            self.inner.generation.fetch_add(1, Ordering::AcqRel);
        });
    }

    fn update(&self, change: impl FnOnce(&mut AuthSnapshot)) {
        self.write(None, change);
    }

    /// Apply `change` only if no transition happened since `generation`.
    fn update_since(&self, generation: u64, change: impl FnOnce(&mut AuthSnapshot)) -> bool {
        self.write(Some(generation), change)
    }

    fn write(&self, generation: Option<u64>, change: impl FnOnce(&mut AuthSnapshot)) -> bool {
        let persisted = {
            let mut state = self.inner.state.write();
            if generation.is_some_and(|g| g != self.inner.generation.load(Ordering::Acquire)) {
                return false;
            }
            change(&mut state);
            PersistedSession::from(&*state)
        };
        if let Err(e) = self.inner.storage.save(&persisted) {
            warn!(error = %e, "failed to persist session");
        }
        true
    }
}

fn fill(state: &mut AuthSnapshot, response: &AuthResponse) {
    state.user = Some(response.user.clone());
    state.access_token = Some(response.access_token.clone());
    state.refresh_token = Some(response.refresh_token.clone());
    state.is_authenticated = true;
}

fn empty(state: &mut AuthSnapshot) {
    state.user = None;
    state.access_token = None;
    state.refresh_token = None;
    state.is_authenticated = false;
}

fn present(token: Option<String>) -> Option<String> {
    token.filter(|t| !t.is_empty())
}

/// Sets `is_loading` for the lifetime of the guard, on every exit path.
struct LoadingGuard<'a> {
    state: &'a RwLock<AuthSnapshot>,
}

impl<'a> LoadingGuard<'a> {
    fn enter(state: &'a RwLock<AuthSnapshot>) -> Self {
        state.write().is_loading = true;
        Self { state }
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.state.write().is_loading = false;
    }
}
