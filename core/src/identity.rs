//! Identity provider seam and the Supabase (GoTrue) implementation.
//!
//! # Design
//! `IdentityProvider` is the collaborator the auth store talks to: it turns an
//! authorization code or a refresh token into an `AuthResponse`, and an access
//! token into a `User`. `SupabaseAuth` speaks GoTrue's REST API through a
//! plain `Transport`; it never goes through the intercepting `HttpClient`, so
//! a 401 from the provider can never recurse into another refresh.
//!
//! Like `TodoClient`, the wire work is split into `build_*` / `parse_*` pairs.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;
use url::Url;

use crate::client::check_status;
use crate::error::ApiError;
use crate::http::{HttpMethod, HttpRequest, HttpResponse, Transport, AUTHORIZATION};
use crate::pkce;
use crate::session::{AuthResponse, User};

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Exchange an OAuth authorization code for a session.
    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<AuthResponse, ApiError>;

    /// Trade a refresh token for a new token pair.
    async fn refresh_session(&self, refresh_token: &str) -> Result<AuthResponse, ApiError>;

    /// Fetch the profile belonging to an access token.
    async fn get_user(&self, access_token: &str) -> Result<User, ApiError>;
}

/// Where to send the browser, plus the `state` value to check on return.
///
/// `code_verifier` is only needed when the exchange happens in a different
/// process; hand it back through `set_code_verifier`.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub url: String,
    pub state: String,
    pub code_verifier: String,
}

pub struct SupabaseAuth {
    base_url: String,
    anon_key: String,
    transport: Arc<dyn Transport>,
    code_verifier: Mutex<Option<String>>,
}

impl SupabaseAuth {
    pub fn new(base_url: &str, anon_key: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.into(),
            transport,
            code_verifier: Mutex::new(None),
        }
    }

    /// Build the Google sign-in URL and remember the PKCE verifier for the
    /// following `exchange_code`.
    pub fn authorize_url(&self, redirect_to: &str) -> Result<AuthorizationRequest, ApiError> {
        let verifier = pkce::generate_code_verifier();
        let challenge = pkce::generate_code_challenge(&verifier);
        let state = pkce::generate_state();

        let mut url = Url::parse(&format!("{}/auth/v1/authorize", self.base_url))
            .map_err(|e| ApiError::Validation(format!("invalid identity provider url: {e}")))?;
        url.query_pairs_mut()
            .append_pair("provider", "google")
            .append_pair("redirect_to", redirect_to)
            .append_pair("access_type", "offline")
            .append_pair("prompt", "consent")
            .append_pair("code_challenge", &challenge)
            .append_pair("code_challenge_method", "s256")
            .append_pair("state", &state);

        *self.code_verifier.lock() = Some(verifier.clone());
        Ok(AuthorizationRequest {
            url: url.into(),
            state,
            code_verifier: verifier,
        })
    }

    /// Seed the verifier directly, e.g. when the authorize step ran in
    /// another process.
    pub fn set_code_verifier(&self, verifier: impl Into<String>) {
        *self.code_verifier.lock() = Some(verifier.into());
    }

    fn token_endpoint(&self, grant_type: &str) -> String {
        format!("{}/auth/v1/token?grant_type={grant_type}", self.base_url)
    }

    pub fn build_exchange_request(&self, code: &str, code_verifier: &str) -> HttpRequest {
        let body = json!({ "auth_code": code, "code_verifier": code_verifier }).to_string();
        HttpRequest::new(HttpMethod::Post, self.token_endpoint("pkce"))
            .with_header("apikey", self.anon_key.clone())
            .with_json_body(body)
    }

    pub fn build_refresh_request(&self, refresh_token: &str) -> HttpRequest {
        let body = json!({ "refresh_token": refresh_token }).to_string();
        HttpRequest::new(HttpMethod::Post, self.token_endpoint("refresh_token"))
            .with_header("apikey", self.anon_key.clone())
            .with_json_body(body)
    }

    pub fn build_user_request(&self, access_token: &str) -> HttpRequest {
        HttpRequest::new(HttpMethod::Get, format!("{}/auth/v1/user", self.base_url))
            .with_header("apikey", self.anon_key.clone())
            .with_header(AUTHORIZATION, format!("Bearer {access_token}"))
    }

    pub fn parse_session_response(&self, response: HttpResponse) -> Result<AuthResponse, ApiError> {
        check_status(&response)?;
        let session: WireSession = serde_json::from_str(&response.body)
            .map_err(|e| ApiError::DeserializationError(e.to_string()))?;

        let access_token = non_empty(session.access_token)
            .ok_or_else(|| ApiError::Validation("provider returned no session".into()))?;
        let refresh_token = non_empty(session.refresh_token)
            .ok_or_else(|| ApiError::Validation("provider returned no refresh token".into()))?;
        let user = session
            .user
            .map(map_user)
            .ok_or_else(|| ApiError::Validation("provider returned no user".into()))?;

        Ok(AuthResponse {
            user,
            access_token,
            refresh_token,
        })
    }

    pub fn parse_user_response(&self, response: HttpResponse) -> Result<User, ApiError> {
        check_status(&response)?;
        let user: WireUser = serde_json::from_str(&response.body)
            .map_err(|e| ApiError::DeserializationError(e.to_string()))?;
        Ok(map_user(user))
    }
}

#[async_trait]
impl IdentityProvider for SupabaseAuth {
    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<AuthResponse, ApiError> {
        let verifier = self
            .code_verifier
            .lock()
            .take()
            .ok_or_else(|| ApiError::Validation("no PKCE code verifier for this sign-in".into()))?;
        debug!(redirect_uri, "exchanging authorization code");
        let response = self
            .transport
            .execute(self.build_exchange_request(code, &verifier))
            .await?;
        self.parse_session_response(response)
    }

    async fn refresh_session(&self, refresh_token: &str) -> Result<AuthResponse, ApiError> {
        let response = self
            .transport
            .execute(self.build_refresh_request(refresh_token))
            .await?;
        self.parse_session_response(response)
    }

    async fn get_user(&self, access_token: &str) -> Result<User, ApiError> {
        let response = self
            .transport
            .execute(self.build_user_request(access_token))
            .await?;
        self.parse_user_response(response)
    }
}

#[derive(Deserialize)]
struct WireSession {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    user: Option<WireUser>,
}

#[derive(Deserialize)]
struct WireUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    user_metadata: UserMetadata,
}

#[derive(Deserialize, Default)]
struct UserMetadata {
    #[serde(default)]
    full_name: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    avatar_url: Option<String>,
    #[serde(default)]
    picture: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn map_user(user: WireUser) -> User {
    let email = user.email.unwrap_or_default();
    let meta = user.user_metadata;
    let name = non_empty(meta.full_name)
        .or_else(|| non_empty(meta.name))
        .unwrap_or_else(|| email_username(&email));
    let avatar_url = non_empty(meta.avatar_url)
        .or_else(|| non_empty(meta.picture))
        .unwrap_or_default();
    User {
        id: user.id,
        email,
        name,
        avatar_url,
    }
}

fn email_username(email: &str) -> String {
    match email.split_once('@') {
        Some((local, _)) if !local.is_empty() => local.to_string(),
        _ => "User".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoTransport;

    #[async_trait]
    impl Transport for NoTransport {
        async fn execute(&self, _request: HttpRequest) -> Result<HttpResponse, ApiError> {
            Err(ApiError::Network("offline".into()))
        }
    }

    fn auth() -> SupabaseAuth {
        SupabaseAuth::new("https://proj.supabase.co/", "anon", Arc::new(NoTransport))
    }

    fn wire_user(json: &str) -> User {
        map_user(serde_json::from_str(json).unwrap())
    }

    #[test]
    fn user_name_prefers_full_name_then_name_then_email() {
        let u = wire_user(r#"{"id":"1","email":"a@b.com","user_metadata":{"full_name":"Ada L","name":"ada"}}"#);
        assert_eq!(u.name, "Ada L");
        let u = wire_user(r#"{"id":"1","email":"a@b.com","user_metadata":{"name":"ada"}}"#);
        assert_eq!(u.name, "ada");
        let u = wire_user(r#"{"id":"1","email":"grace@b.com"}"#);
        assert_eq!(u.name, "grace");
        let u = wire_user(r#"{"id":"1"}"#);
        assert_eq!(u.name, "User");
        assert_eq!(u.email, "");
    }

    #[test]
    fn avatar_falls_back_to_picture() {
        let u = wire_user(r#"{"id":"1","user_metadata":{"picture":"p.png"}}"#);
        assert_eq!(u.avatar_url, "p.png");
        let u = wire_user(r#"{"id":"1","user_metadata":{}}"#);
        assert_eq!(u.avatar_url, "");
    }

    #[test]
    fn refresh_request_carries_apikey_and_grant() {
        let req = auth().build_refresh_request("r1");
        assert_eq!(req.method, HttpMethod::Post);
        assert_eq!(
            req.path,
            "https://proj.supabase.co/auth/v1/token?grant_type=refresh_token"
        );
        assert_eq!(req.header("apikey"), Some("anon"));
        let body: serde_json::Value = serde_json::from_str(req.body.as_deref().unwrap()).unwrap();
        assert_eq!(body["refresh_token"], "r1");
    }

    #[test]
    fn user_request_is_bearer_get() {
        let req = auth().build_user_request("tok");
        assert_eq!(req.method, HttpMethod::Get);
        assert_eq!(req.bearer_token(), Some("tok"));
    }

    #[test]
    fn session_without_user_is_validation_error() {
        let err = auth()
            .parse_session_response(HttpResponse::new(
                200,
                r#"{"access_token":"a","refresh_token":"r"}"#,
            ))
            .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[test]
    fn session_with_empty_access_token_is_validation_error() {
        let err = auth()
            .parse_session_response(HttpResponse::new(
                200,
                r#"{"access_token":"","refresh_token":"r","user":{"id":"1"}}"#,
            ))
            .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[test]
    fn authorize_url_carries_pkce_and_google_params() {
        let auth = auth();
        let req = auth
            .authorize_url("http://localhost:5173/auth/callback")
            .unwrap();
        let url = Url::parse(&req.url).unwrap();
        assert_eq!(url.path(), "/auth/v1/authorize");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        let get = |k: &str| pairs.iter().find(|(n, _)| n == k).map(|(_, v)| v.as_str());
        assert_eq!(get("provider"), Some("google"));
        assert_eq!(get("redirect_to"), Some("http://localhost:5173/auth/callback"));
        assert_eq!(get("access_type"), Some("offline"));
        assert_eq!(get("prompt"), Some("consent"));
        assert_eq!(get("code_challenge_method"), Some("s256"));
        assert!(get("code_challenge").is_some());
        assert!(!req.state.is_empty());
        assert_eq!(get("state"), Some(req.state.as_str()));
        assert_eq!(
            get("code_challenge"),
            Some(pkce::generate_code_challenge(&req.code_verifier).as_str())
        );
        assert_eq!(auth.code_verifier.lock().as_deref(), Some(req.code_verifier.as_str()));
    }

    #[test]
    fn each_authorize_request_gets_fresh_state() {
        let auth = auth();
        let first = auth.authorize_url("http://cb").unwrap();
        let second = auth.authorize_url("http://cb").unwrap();
        assert_ne!(first.state, second.state);
        assert_ne!(first.code_verifier, second.code_verifier);
    }

    #[tokio::test]
    async fn exchange_without_verifier_fails_before_network() {
        let err = auth().exchange_code("code", "http://cb").await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }
}
