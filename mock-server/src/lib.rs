use std::{collections::HashMap, sync::Arc};

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::{net::TcpListener, sync::RwLock};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

pub const DEMO_USER_ID: &str = "demo-user";
pub const DEMO_EMAIL: &str = "demo@example.com";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Todo {
    pub id: Uuid,
    pub user_id: String,
    pub title: String,
    pub completed: bool,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TodoList {
    pub items: Vec<Todo>,
}

#[derive(Deserialize)]
pub struct CreateTodo {
    pub title: String,
    #[serde(default)]
    pub completed: bool,
}

#[derive(Deserialize)]
pub struct UpdateTodo {
    pub title: Option<String>,
    pub completed: Option<bool>,
}

/// Identity provider user, shaped like GoTrue's.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthUser {
    pub id: String,
    pub email: String,
    pub user_metadata: UserMetadata,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: u64,
    pub user: AuthUser,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Default)]
struct Sessions {
    users: HashMap<String, AuthUser>,
    /// access token -> user id
    access: HashMap<String, String>,
    /// refresh token -> user id
    refresh: HashMap<String, String>,
    /// authorization code -> user id
    codes: HashMap<String, String>,
}

/// Shared server state. Cloning shares the same underlying data, so tests
/// can hold a handle and manipulate sessions while the server runs.
#[derive(Clone, Default)]
pub struct AppState {
    todos: Arc<RwLock<Vec<Todo>>>,
    sessions: Arc<RwLock<Sessions>>,
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sign `user_id` in directly and return its token pair.
    pub async fn issue_session(&self, user_id: &str, email: &str) -> TokenResponse {
        let mut sessions = self.sessions.write().await;
        let user = upsert_user(&mut sessions, user_id, email);
        mint_tokens(&mut sessions, user)
    }

    /// Register a one-time authorization code for the PKCE exchange.
    pub async fn register_auth_code(&self, user_id: &str, email: &str) -> String {
        let mut sessions = self.sessions.write().await;
        upsert_user(&mut sessions, user_id, email);
        let code = format!("code_{}", Uuid::new_v4().simple());
        sessions.codes.insert(code.clone(), user_id.to_string());
        code
    }

    /// Make an access token stale, as if it had expired.
    pub async fn expire_access_token(&self, access_token: &str) {
        self.sessions.write().await.access.remove(access_token);
    }

    pub async fn revoke_refresh_token(&self, refresh_token: &str) {
        self.sessions.write().await.refresh.remove(refresh_token);
    }

    pub async fn todos(&self) -> Vec<Todo> {
        self.todos.read().await.clone()
    }

    async fn user_for_access_token(&self, token: &str) -> Option<String> {
        self.sessions.read().await.access.get(token).cloned()
    }
}

fn upsert_user(sessions: &mut Sessions, user_id: &str, email: &str) -> AuthUser {
    sessions
        .users
        .entry(user_id.to_string())
        .or_insert_with(|| AuthUser {
            id: user_id.to_string(),
            email: email.to_string(),
            user_metadata: UserMetadata::default(),
        })
        .clone()
}

fn mint_tokens(sessions: &mut Sessions, user: AuthUser) -> TokenResponse {
    let access_token = format!("at_{}", Uuid::new_v4().simple());
    let refresh_token = format!("rt_{}", Uuid::new_v4().simple());
    sessions.access.insert(access_token.clone(), user.id.clone());
    sessions.refresh.insert(refresh_token.clone(), user.id.clone());
    TokenResponse {
        access_token,
        refresh_token,
        token_type: "bearer".to_string(),
        expires_in: 3600,
        user,
    }
}

pub fn app() -> Router {
    app_with_state(AppState::new())
}

pub fn app_with_state(state: AppState) -> Router {
    Router::new()
        .route("/api/todos/list", post(list_todos))
        .route("/api/todos/create", post(create_todo))
        .route("/api/todos/get/{id}", post(get_todo))
        .route("/api/todos/update/{id}", post(update_todo))
        .route("/api/todos/toggle/{id}", post(toggle_todo))
        .route("/api/todos/delete/{id}", post(delete_todo))
        .route("/auth/v1/authorize", get(authorize))
        .route("/auth/v1/token", post(token))
        .route("/auth/v1/user", get(current_user))
        .with_state(state)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    run_with_state(listener, AppState::new()).await
}

/// Log filter for the server binary: the given directives (normally
/// `RUST_LOG`) when they parse, `info` otherwise.
pub fn log_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

pub async fn run_with_state(listener: TcpListener, state: AppState) -> Result<(), std::io::Error> {
    axum::serve(listener, app_with_state(state)).await
}

type Failure = (StatusCode, Json<ErrorBody>);

fn failure(status: StatusCode, message: &str) -> Failure {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<String, Failure> {
    let token = bearer(headers).ok_or_else(|| failure(StatusCode::UNAUTHORIZED, "missing bearer token"))?;
    match state.user_for_access_token(token).await {
        Some(user_id) => Ok(user_id),
        None => {
            debug!("rejecting unknown or expired access token");
            Err(failure(StatusCode::UNAUTHORIZED, "invalid or expired token"))
        }
    }
}

async fn list_todos(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<TodoList>, Failure> {
    let user_id = authenticate(&state, &headers).await?;
    let todos = state.todos.read().await;
    let items = todos.iter().filter(|t| t.user_id == user_id).cloned().collect();
    Ok(Json(TodoList { items }))
}

async fn create_todo(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(input): Json<CreateTodo>,
) -> Result<(StatusCode, Json<Todo>), Failure> {
    let user_id = authenticate(&state, &headers).await?;
    if input.title.trim().is_empty() {
        return Err(failure(StatusCode::BAD_REQUEST, "title is required"));
    }
    let now = Utc::now();
    let todo = Todo {
        id: Uuid::new_v4(),
        user_id,
        title: input.title,
        completed: input.completed,
        created_at: now,
        updated_at: now,
    };
    state.todos.write().await.push(todo.clone());
    info!(id = %todo.id, "todo created");
    Ok((StatusCode::CREATED, Json(todo)))
}

async fn get_todo(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<Todo>, Failure> {
    let user_id = authenticate(&state, &headers).await?;
    let todos = state.todos.read().await;
    todos
        .iter()
        .find(|t| t.id == id && t.user_id == user_id)
        .cloned()
        .map(Json)
        .ok_or_else(|| failure(StatusCode::NOT_FOUND, "todo not found"))
}

async fn update_todo(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(input): Json<UpdateTodo>,
) -> Result<Json<Todo>, Failure> {
    let user_id = authenticate(&state, &headers).await?;
    let mut todos = state.todos.write().await;
    let todo = todos
        .iter_mut()
        .find(|t| t.id == id && t.user_id == user_id)
        .ok_or_else(|| failure(StatusCode::NOT_FOUND, "todo not found"))?;
    if let Some(title) = input.title {
        todo.title = title;
    }
    if let Some(completed) = input.completed {
        todo.completed = completed;
    }
    todo.updated_at = Utc::now();
    Ok(Json(todo.clone()))
}

async fn toggle_todo(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<Todo>, Failure> {
    let user_id = authenticate(&state, &headers).await?;
    let mut todos = state.todos.write().await;
    let todo = todos
        .iter_mut()
        .find(|t| t.id == id && t.user_id == user_id)
        .ok_or_else(|| failure(StatusCode::NOT_FOUND, "todo not found"))?;
    todo.completed = !todo.completed;
    todo.updated_at = Utc::now();
    Ok(Json(todo.clone()))
}

async fn delete_todo(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, Failure> {
    let user_id = authenticate(&state, &headers).await?;
    let mut todos = state.todos.write().await;
    let before = todos.len();
    todos.retain(|t| !(t.id == id && t.user_id == user_id));
    if todos.len() < before {
        info!(%id, "todo deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(failure(StatusCode::NOT_FOUND, "todo not found"))
    }
}

#[derive(Deserialize)]
pub struct AuthorizeQuery {
    pub redirect_to: String,
}

/// Stand-in for the hosted sign-in page: signs the demo user in and sends the
/// browser back with the tokens in the fragment.
async fn authorize(State(state): State<AppState>, Query(query): Query<AuthorizeQuery>) -> Redirect {
    let session = state.issue_session(DEMO_USER_ID, DEMO_EMAIL).await;
    info!(redirect_to = %query.redirect_to, "issuing demo session");
    Redirect::to(&format!(
        "{}#access_token={}&refresh_token={}&token_type=bearer&expires_in={}",
        query.redirect_to, session.access_token, session.refresh_token, session.expires_in
    ))
}

#[derive(Deserialize)]
pub struct TokenQuery {
    pub grant_type: String,
}

#[derive(Deserialize, Default)]
pub struct TokenRequest {
    #[serde(default)]
    pub auth_code: Option<String>,
    #[serde(default)]
    pub code_verifier: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

async fn token(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
    Json(input): Json<TokenRequest>,
) -> Response {
    if headers.get("apikey").is_none() {
        return failure(StatusCode::UNAUTHORIZED, "no api key found in request").into_response();
    }
    let mut sessions = state.sessions.write().await;

    let user_id = match query.grant_type.as_str() {
        "pkce" => {
            if input.code_verifier.as_deref().unwrap_or_default().is_empty() {
                return failure(StatusCode::BAD_REQUEST, "code verifier is required").into_response();
            }
            input
                .auth_code
                .as_deref()
                .and_then(|code| sessions.codes.remove(code))
        }
        "refresh_token" => input
            .refresh_token
            .as_deref()
            .and_then(|token| sessions.refresh.remove(token)),
        other => {
            return failure(StatusCode::BAD_REQUEST, &format!("unsupported grant_type {other}"))
                .into_response();
        }
    };

    let Some(user) = user_id.and_then(|id| sessions.users.get(&id).cloned()) else {
        debug!(grant_type = %query.grant_type, "rejecting token grant");
        return failure(StatusCode::BAD_REQUEST, "invalid_grant").into_response();
    };
    info!(grant_type = %query.grant_type, user_id = %user.id, "issuing session");
    Json(mint_tokens(&mut sessions, user)).into_response()
}

async fn current_user(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<AuthUser>, Failure> {
    let user_id = authenticate(&state, &headers).await?;
    let sessions = state.sessions.read().await;
    sessions
        .users
        .get(&user_id)
        .cloned()
        .map(Json)
        .ok_or_else(|| failure(StatusCode::UNAUTHORIZED, "user not found"))
}
