//! Scripted collaborators shared by the unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::ApiError;
use crate::http::{HttpRequest, HttpResponse, Transport};
use crate::http_client::LoginRedirect;
use crate::identity::IdentityProvider;
use crate::session::{AuthResponse, User};
use crate::types::{CreateTodo, Todo, TodoList, UpdateTodo};

pub fn user(id: &str, email: &str) -> User {
    User {
        id: id.to_string(),
        email: email.to_string(),
        name: id.to_string(),
        avatar_url: String::new(),
    }
}

pub fn auth_response(access: &str, refresh: &str, user: User) -> AuthResponse {
    AuthResponse {
        user,
        access_token: access.to_string(),
        refresh_token: refresh.to_string(),
    }
}

fn unscripted<T>() -> Result<T, ApiError> {
    Err(ApiError::Network("not scripted".into()))
}

#[derive(Default)]
pub struct FakeProvider {
    exchange: Mutex<Option<Result<AuthResponse, ApiError>>>,
    refresh: Mutex<Option<Result<AuthResponse, ApiError>>>,
    user: Mutex<Option<Result<User, ApiError>>>,
    last_refresh_token: Mutex<Option<String>>,
    delay: Duration,
    pub exchange_calls: AtomicUsize,
    pub refresh_calls: AtomicUsize,
    pub user_calls: AtomicUsize,
}

impl FakeProvider {
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn set_exchange(&self, result: Result<AuthResponse, ApiError>) {
        *self.exchange.lock() = Some(result);
    }

    pub fn set_refresh(&self, result: Result<AuthResponse, ApiError>) {
        *self.refresh.lock() = Some(result);
    }

    pub fn set_user(&self, result: Result<User, ApiError>) {
        *self.user.lock() = Some(result);
    }

    pub fn last_refresh_token(&self) -> Option<String> {
        self.last_refresh_token.lock().clone()
    }

    pub fn total_calls(&self) -> usize {
        self.exchange_calls.load(Ordering::SeqCst)
            + self.refresh_calls.load(Ordering::SeqCst)
            + self.user_calls.load(Ordering::SeqCst)
    }

    async fn pause(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

#[async_trait]
impl IdentityProvider for FakeProvider {
    async fn exchange_code(&self, _code: &str, _redirect_uri: &str) -> Result<AuthResponse, ApiError> {
        self.exchange_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        self.exchange.lock().clone().unwrap_or_else(unscripted)
    }

    async fn refresh_session(&self, refresh_token: &str) -> Result<AuthResponse, ApiError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_refresh_token.lock() = Some(refresh_token.to_string());
        self.pause().await;
        self.refresh.lock().clone().unwrap_or_else(unscripted)
    }

    async fn get_user(&self, _access_token: &str) -> Result<User, ApiError> {
        self.user_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        self.user.lock().clone().unwrap_or_else(unscripted)
    }
}

/// Replays a fixed sequence of responses and records every request.
#[derive(Default)]
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<Result<HttpResponse, ApiError>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub fn new(responses: Vec<Result<HttpResponse, ApiError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, ApiError> {
        self.requests.lock().push(request);
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(ApiError::Network("script exhausted".into())))
    }
}

/// In-memory todo service behind the `Transport` seam.
///
/// When `valid_token` is set, any request not bearing it gets a 401.
#[derive(Default)]
pub struct FakeTodoBackend {
    todos: Mutex<Vec<Todo>>,
    valid_token: Mutex<Option<String>>,
    fail_next: Mutex<Option<HttpResponse>>,
    requests: Mutex<Vec<HttpRequest>>,
    delay: Duration,
}

impl FakeTodoBackend {
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn require_token(&self, token: &str) {
        *self.valid_token.lock() = Some(token.to_string());
    }

    pub fn fail_next(&self, response: HttpResponse) {
        *self.fail_next.lock() = Some(response);
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    pub fn server_todos(&self) -> Vec<Todo> {
        self.todos.lock().clone()
    }

    fn route(&self, request: &HttpRequest) -> HttpResponse {
        if let Some(response) = self.fail_next.lock().take() {
            return response;
        }
        if let Some(valid) = self.valid_token.lock().as_deref() {
            if request.bearer_token() != Some(valid) {
                return HttpResponse::new(401, r#"{"error":"invalid token"}"#);
            }
        }

        let action = request
            .path
            .split_once("/api/todos/")
            .map(|(_, action)| action)
            .unwrap_or_default();
        let (verb, id) = match action.split_once('/') {
            Some((verb, id)) => (verb, id.parse::<Uuid>().ok()),
            None => (action, None),
        };
        let body = request.body.as_deref().unwrap_or("{}");
        let mut todos = self.todos.lock();

        match (verb, id) {
            ("list", None) => json_response(200, &TodoList { items: todos.clone() }),
            ("create", None) => match serde_json::from_str::<CreateTodo>(body) {
                Ok(input) => {
                    let now = Utc::now();
                    let todo = Todo {
                        id: Uuid::new_v4(),
                        title: input.title,
                        completed: input.completed,
                        created_at: now,
                        updated_at: now,
                    };
                    todos.push(todo.clone());
                    json_response(201, &todo)
                }
                Err(e) => HttpResponse::new(400, e.to_string()),
            },
            ("get", Some(id)) => match todos.iter().find(|t| t.id == id) {
                Some(todo) => json_response(200, todo),
                None => HttpResponse::new(404, ""),
            },
            ("update", Some(id)) => {
                let input: UpdateTodo = serde_json::from_str(body).unwrap_or_default();
                match todos.iter_mut().find(|t| t.id == id) {
                    Some(todo) => {
                        if let Some(title) = input.title {
                            todo.title = title;
                        }
                        if let Some(completed) = input.completed {
                            todo.completed = completed;
                        }
                        todo.updated_at = Utc::now();
                        json_response(200, todo)
                    }
                    None => HttpResponse::new(404, ""),
                }
            }
            ("toggle", Some(id)) => match todos.iter_mut().find(|t| t.id == id) {
                Some(todo) => {
                    todo.completed = !todo.completed;
                    todo.updated_at = Utc::now();
                    json_response(200, todo)
                }
                None => HttpResponse::new(404, ""),
            },
            ("delete", Some(id)) => {
                let before = todos.len();
                todos.retain(|t| t.id != id);
                if todos.len() < before {
                    HttpResponse::new(204, "")
                } else {
                    HttpResponse::new(404, "")
                }
            }
            _ => HttpResponse::new(400, "bad route"),
        }
    }
}

fn json_response<T: serde::Serialize>(status: u16, value: &T) -> HttpResponse {
    HttpResponse::new(status, serde_json::to_string(value).unwrap())
}

#[async_trait]
impl Transport for FakeTodoBackend {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, ApiError> {
        self.requests.lock().push(request.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.route(&request))
    }
}

#[derive(Default)]
pub struct RecordingRedirect {
    pub count: AtomicUsize,
    pub last_path: Mutex<Option<String>>,
}

impl LoginRedirect for RecordingRedirect {
    fn redirect_to_login(&self, login_path: &str) {
        self.count.fetch_add(1, Ordering::SeqCst);
        *self.last_path.lock() = Some(login_path.to_string());
    }
}
