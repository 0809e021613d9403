//! Session data: the signed-in user and the token pair.

use serde::{Deserialize, Serialize};

/// Application user, as mapped from the identity provider's profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    pub avatar_url: String,
}

/// Result of a successful code exchange or token refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthResponse {
    pub user: User,
    pub access_token: String,
    pub refresh_token: String,
}

/// Read-only view of the auth store at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthSnapshot {
    pub user: Option<User>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub is_authenticated: bool,
    pub is_loading: bool,
}

/// The durable part of the session. Loading flags are never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSession {
    #[serde(default)]
    pub user: Option<User>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub is_authenticated: bool,
}

impl From<&AuthSnapshot> for PersistedSession {
    fn from(snapshot: &AuthSnapshot) -> Self {
        Self {
            user: snapshot.user.clone(),
            access_token: snapshot.access_token.clone(),
            refresh_token: snapshot.refresh_token.clone(),
            is_authenticated: snapshot.is_authenticated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persisted_session_uses_camel_case() {
        let session = PersistedSession {
            user: None,
            access_token: Some("a".into()),
            refresh_token: Some("r".into()),
            is_authenticated: true,
        };
        let json = serde_json::to_value(&session).unwrap();
        assert_eq!(json["accessToken"], "a");
        assert_eq!(json["refreshToken"], "r");
        assert_eq!(json["isAuthenticated"], true);
        assert!(json.get("isLoading").is_none());
    }

    #[test]
    fn persisted_session_tolerates_missing_fields() {
        let session: PersistedSession = serde_json::from_str(r#"{"refreshToken":"r1"}"#).unwrap();
        assert_eq!(session.refresh_token.as_deref(), Some("r1"));
        assert!(session.access_token.is_none());
        assert!(!session.is_authenticated);
    }
}
