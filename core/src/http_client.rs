//! Authenticated HTTP client with one-shot token-refresh recovery.
//!
//! # Design
//! Every outbound request gets `Content-Type: application/json` and, when the
//! auth store holds one, `Authorization: Bearer <token>`. A request without a
//! token still goes out.
//!
//! A 401 triggers `AuthStore::refresh_auth()` (single-flight) and a replay of
//! the original request with the new token. The number of replays is an
//! explicit counter in the send loop: after one replay, a further 401 is
//! returned to the caller as-is. If the refresh itself fails, the session is
//! signed out, the login redirect hook fires, and `RefreshFailed` is returned.
//!
//! All other statuses pass through untouched; interpreting them is the job of
//! `TodoClient::parse_*`.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::AuthStore;
use crate::error::ApiError;
use crate::http::{HttpRequest, HttpResponse, Transport, APPLICATION_JSON, AUTHORIZATION, CONTENT_TYPE};

const MAX_REPLAYS: u32 = 1;
pub const DEFAULT_LOGIN_PATH: &str = "/login";

/// Where to send the user when the session cannot be recovered.
pub trait LoginRedirect: Send + Sync {
    fn redirect_to_login(&self, login_path: &str);
}

/// Default hook: records the redirect in the log and nothing else.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogRedirect;

impl LoginRedirect for LogRedirect {
    fn redirect_to_login(&self, login_path: &str) {
        warn!(login_path, "session expired, sign-in required");
    }
}

#[derive(Clone)]
pub struct HttpClient {
    transport: Arc<dyn Transport>,
    auth: AuthStore,
    redirect: Arc<dyn LoginRedirect>,
    login_path: String,
}

impl HttpClient {
    pub fn new(transport: Arc<dyn Transport>, auth: AuthStore) -> Self {
        Self {
            transport,
            auth,
            redirect: Arc::new(LogRedirect),
            login_path: DEFAULT_LOGIN_PATH.to_string(),
        }
    }

    pub fn with_redirect(mut self, redirect: Arc<dyn LoginRedirect>) -> Self {
        self.redirect = redirect;
        self
    }

    pub fn with_login_path(mut self, login_path: impl Into<String>) -> Self {
        self.login_path = login_path.into();
        self
    }

    pub fn auth(&self) -> &AuthStore {
        &self.auth
    }

    pub async fn send(&self, request: HttpRequest) -> Result<HttpResponse, ApiError> {
        self.dispatch(request).await
    }

    /// Like `send`, but abandons the call with `Cancelled` once `cancel` fires.
    pub async fn send_with_cancel(
        &self,
        request: HttpRequest,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, ApiError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(path = %request.path, "request cancelled");
                Err(ApiError::Cancelled)
            }
            result = self.dispatch(request.clone()) => result,
        }
    }

    async fn dispatch(&self, request: HttpRequest) -> Result<HttpResponse, ApiError> {
        let mut replays: u32 = 0;
        loop {
            let outgoing = self.authorize(request.clone());
            debug!(
                method = request.method.as_str(),
                path = %request.path,
                replays,
                has_access_token = outgoing.bearer_token().is_some(),
                "sending request"
            );

            let response = self.transport.execute(outgoing).await?;
            if response.status != 401 {
                return Ok(response);
            }
            if replays >= MAX_REPLAYS {
                warn!(path = %request.path, "401 after token refresh, not retrying");
                return Ok(response);
            }
            replays += 1;

            info!(path = %request.path, "received 401, refreshing session");
            if let Err(e) = self.auth.refresh_auth().await {
                warn!(error = %e, "token refresh failed, signing out");
                self.auth.sign_out();
                self.redirect.redirect_to_login(&self.login_path);
                return Err(ApiError::RefreshFailed(e.to_string()));
            }
        }
    }

    fn authorize(&self, mut request: HttpRequest) -> HttpRequest {
        request.set_header(CONTENT_TYPE, APPLICATION_JSON);
        match self.auth.access_token() {
            Some(token) => request.set_header(AUTHORIZATION, format!("Bearer {token}")),
            None => {
                debug!("no access token available");
                request.remove_header(AUTHORIZATION);
            }
        }
        request
    }
}
