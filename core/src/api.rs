//! Todo API operations over the authenticated client.
//!
//! Each operation is one request through `HttpClient`, so every call inherits
//! bearer injection and the single refresh-and-replay on 401. Failures are
//! logged and returned to the caller unchanged.

use tokio_util::sync::CancellationToken;
use tracing::error;
use uuid::Uuid;

use crate::client::TodoClient;
use crate::error::ApiError;
use crate::http_client::HttpClient;
use crate::types::{CreateTodo, Todo, UpdateTodo};

#[derive(Clone)]
pub struct TodoApi {
    client: TodoClient,
    http: HttpClient,
    cancel: CancellationToken,
}

impl TodoApi {
    pub fn new(base_url: &str, http: HttpClient) -> Self {
        Self {
            client: TodoClient::new(base_url),
            http,
            cancel: CancellationToken::new(),
        }
    }

    /// A copy of this API whose calls are abandoned once `parent` is
    /// cancelled.
    pub fn scoped(&self, parent: &CancellationToken) -> Self {
        Self {
            client: self.client.clone(),
            http: self.http.clone(),
            cancel: parent.child_token(),
        }
    }

    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    pub async fn list(&self) -> Result<Vec<Todo>, ApiError> {
        let response = self
            .http
            .send_with_cancel(self.client.build_list_todos(), &self.cancel)
            .await;
        logged("list", response.and_then(|r| self.client.parse_list_todos(r)))
    }

    pub async fn get(&self, id: Uuid) -> Result<Todo, ApiError> {
        let response = self
            .http
            .send_with_cancel(self.client.build_get_todo(id), &self.cancel)
            .await;
        logged("get", response.and_then(|r| self.client.parse_get_todo(r)))
    }

    pub async fn create(&self, input: &CreateTodo) -> Result<Todo, ApiError> {
        let request = self.client.build_create_todo(input);
        let response = match request {
            Ok(request) => self.http.send_with_cancel(request, &self.cancel).await,
            Err(e) => Err(e),
        };
        logged("create", response.and_then(|r| self.client.parse_create_todo(r)))
    }

    pub async fn update(&self, id: Uuid, input: &UpdateTodo) -> Result<Todo, ApiError> {
        let request = self.client.build_update_todo(id, input);
        let response = match request {
            Ok(request) => self.http.send_with_cancel(request, &self.cancel).await,
            Err(e) => Err(e),
        };
        logged("update", response.and_then(|r| self.client.parse_update_todo(r)))
    }

    pub async fn toggle(&self, id: Uuid) -> Result<Todo, ApiError> {
        let response = self
            .http
            .send_with_cancel(self.client.build_toggle_todo(id), &self.cancel)
            .await;
        logged("toggle", response.and_then(|r| self.client.parse_toggle_todo(r)))
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), ApiError> {
        let response = self
            .http
            .send_with_cancel(self.client.build_delete_todo(id), &self.cancel)
            .await;
        logged("delete", response.and_then(|r| self.client.parse_delete_todo(r)))
    }
}

fn logged<T>(operation: &str, result: Result<T, ApiError>) -> Result<T, ApiError> {
    if let Err(e) = &result {
        if *e != ApiError::Cancelled {
            error!(operation, error = %e, "todo api call failed");
        }
    }
    result
}
