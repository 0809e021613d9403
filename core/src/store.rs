//! Todo state: a local cache of the server's list.
//!
//! # Design
//! `TodoStore` keeps the list consistent with the last successful remote
//! mutation. Each action is `idle -> loading -> idle`, ending either with an
//! updated list or with `error()` set. There is no retry.
//!
//! `loading()` is backed by an in-flight counter, so it stays true until the
//! last overlapping action settles. Overlapping mutations of the same id are
//! last-write-wins: whichever response is applied last decides the entry.
//!
//! The store owns a cancellation scope. After `shutdown()` outstanding actions
//! return `Cancelled` and never touch the list or the error slot.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::api::TodoApi;
use crate::error::ApiError;
use crate::types::{CreateTodo, Todo, TodoCounts, TodoFilter, UpdateTodo};

#[derive(Default)]
struct State {
    todos: Vec<Todo>,
    error: Option<ApiError>,
}

struct Inner {
    api: TodoApi,
    state: RwLock<State>,
    in_flight: AtomicUsize,
    scope: CancellationToken,
}

#[derive(Clone)]
pub struct TodoStore {
    inner: Arc<Inner>,
}

impl TodoStore {
    pub fn new(api: TodoApi) -> Self {
        let scope = CancellationToken::new();
        Self {
            inner: Arc::new(Inner {
                api: api.scoped(&scope),
                state: RwLock::new(State::default()),
                in_flight: AtomicUsize::new(0),
                scope,
            }),
        }
    }

    pub fn todos(&self) -> Vec<Todo> {
        self.inner.state.read().todos.clone()
    }

    pub fn visible(&self, filter: TodoFilter) -> Vec<Todo> {
        self.inner
            .state
            .read()
            .todos
            .iter()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect()
    }

    pub fn counts(&self) -> TodoCounts {
        TodoCounts::from_todos(&self.inner.state.read().todos)
    }

    pub fn loading(&self) -> bool {
        self.inner.in_flight.load(Ordering::SeqCst) > 0
    }

    pub fn error(&self) -> Option<ApiError> {
        self.inner.state.read().error.clone()
    }

    /// Cancel every outstanding action. Later actions fail with `Cancelled`.
    pub fn shutdown(&self) {
        debug!("shutting down todo store");
        self.inner.scope.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.scope.is_cancelled()
    }

    pub async fn fetch_todos(&self) -> Result<Vec<Todo>, ApiError> {
        let _loading = self.begin();
        let result = self.inner.api.list().await;
        self.settle(result, |state, todos| state.todos = todos.clone())
    }

    pub async fn fetch_todo(&self, id: Uuid) -> Result<Todo, ApiError> {
        let _loading = self.begin();
        let result = self.inner.api.get(id).await;
        self.settle(result, |_, _| {})
    }

    pub async fn create_todo(&self, input: CreateTodo) -> Result<Todo, ApiError> {
        let _loading = self.begin();
        let result = self.inner.api.create(&input).await;
        self.settle(result, |state, todo| {
            // Ids are server-assigned; a repeated id replaces rather than duplicates.
            match state.todos.iter_mut().find(|t| t.id == todo.id) {
                Some(existing) => *existing = todo.clone(),
                None => state.todos.push(todo.clone()),
            }
        })
    }

    pub async fn update_todo(&self, id: Uuid, input: UpdateTodo) -> Result<Todo, ApiError> {
        let _loading = self.begin();
        let result = self.inner.api.update(id, &input).await;
        self.settle(result, replace)
    }

    pub async fn toggle_todo(&self, id: Uuid) -> Result<Todo, ApiError> {
        let _loading = self.begin();
        let result = self.inner.api.toggle(id).await;
        self.settle(result, replace)
    }

    pub async fn delete_todo(&self, id: Uuid) -> Result<(), ApiError> {
        let _loading = self.begin();
        let result = self.inner.api.delete(id).await;
        self.settle(result, |state, _| state.todos.retain(|t| t.id != id))
    }

    fn begin(&self) -> InFlight<'_> {
        self.inner.state.write().error = None;
        InFlight::enter(&self.inner.in_flight)
    }

    /// Apply a finished action, unless the store was shut down meanwhile.
    fn settle<T>(
        &self,
        result: Result<T, ApiError>,
        apply: impl FnOnce(&mut State, &T),
    ) -> Result<T, ApiError> {
        if self.is_shut_down() {
            return Err(ApiError::Cancelled);
        }
        let mut state = self.inner.state.write();
        match result {
            Ok(value) => {
                apply(&mut state, &value);
                Ok(value)
            }
            Err(e) => {
                state.error = Some(e.clone());
                Err(e)
            }
        }
    }
}

fn replace(state: &mut State, todo: &Todo) {
    state.todos = state
        .todos
        .iter()
        .map(|t| if t.id == todo.id { todo.clone() } else { t.clone() })
        .collect();
}

struct InFlight<'a> {
    counter: &'a AtomicUsize,
}

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self { counter }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}
