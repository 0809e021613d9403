//! OAuth redirect handling.
//!
//! The implicit flow delivers tokens in the URL fragment. The PKCE flow
//! delivers `?code=...&state=...` in the query, to be checked against the
//! `state` sent with the authorize URL before the code is exchanged.

use tracing::{debug, info};
use url::{form_urlencoded, Url};

use crate::auth::AuthStore;
use crate::error::ApiError;
use crate::identity::IdentityProvider;
use crate::session::User;

/// Tokens carried by the callback fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackTokens {
    pub access_token: String,
    pub refresh_token: String,
}

/// Extract `access_token` and `refresh_token` from the callback URL fragment.
pub fn parse_callback_fragment(callback_url: &str) -> Result<CallbackTokens, ApiError> {
    let url = Url::parse(callback_url)
        .map_err(|e| ApiError::Validation(format!("invalid callback url: {e}")))?;
    let fragment = url
        .fragment()
        .filter(|f| !f.is_empty())
        .ok_or_else(|| ApiError::Validation("no tokens found in callback url".into()))?;

    let mut access_token = None;
    let mut refresh_token = None;
    for (key, value) in form_urlencoded::parse(fragment.as_bytes()) {
        match key.as_ref() {
            "access_token" => access_token = Some(value.into_owned()),
            "refresh_token" => refresh_token = Some(value.into_owned()),
            _ => {}
        }
    }

    match (access_token, refresh_token) {
        (Some(access_token), Some(refresh_token))
            if !access_token.is_empty() && !refresh_token.is_empty() =>
        {
            Ok(CallbackTokens {
                access_token,
                refresh_token,
            })
        }
        _ => Err(ApiError::Validation("missing tokens in callback".into())),
    }
}

/// Authorization code returned by a PKCE redirect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackCode {
    pub code: String,
    pub state: Option<String>,
}

/// Read `code` and `state` from the callback query, percent-decoded.
///
/// `Ok(None)` when the URL carries no code, i.e. a fragment callback.
pub fn parse_callback_code(callback_url: &str) -> Result<Option<CallbackCode>, ApiError> {
    let url = Url::parse(callback_url)
        .map_err(|e| ApiError::Validation(format!("invalid callback url: {e}")))?;

    let mut code = None;
    let mut state = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" if !value.is_empty() => code = Some(value.into_owned()),
            "state" if !value.is_empty() => state = Some(value.into_owned()),
            _ => {}
        }
    }
    Ok(code.map(|code| CallbackCode { code, state }))
}

/// Reject a callback whose `state` is absent or differs from the one issued.
pub fn verify_state(expected: &str, returned: Option<&str>) -> Result<(), ApiError> {
    match returned {
        Some(state) if state == expected => Ok(()),
        Some(_) => Err(ApiError::Validation("callback state does not match".into())),
        None => Err(ApiError::Validation("callback carried no state".into())),
    }
}

/// Complete sign-in from the redirect URL: read the fragment tokens, fetch
/// the user they belong to, then populate the auth store.
pub async fn handle_oauth_callback(
    store: &AuthStore,
    provider: &dyn IdentityProvider,
    callback_url: &str,
) -> Result<User, ApiError> {
    let tokens = parse_callback_fragment(callback_url)?;
    debug!("callback carried access and refresh tokens");

    let user = provider.get_user(&tokens.access_token).await?;
    info!(user_id = %user.id, "signed in from oauth callback");
    store.set_session(tokens.access_token, tokens.refresh_token, user.clone());
    Ok(user)
}
