//! Client core for the todo service.
//!
//! # Overview
//! The session lives in `AuthStore`. `HttpClient` attaches its bearer token to
//! every request and recovers from one expired-token 401 by refreshing and
//! replaying. `TodoApi` maps the CRUD verbs onto that client, and `TodoStore`
//! caches the resulting list.
//!
//! # Design
//! - `TodoClient` stays sans-IO: `build_*` produces an `HttpRequest`,
//!   `parse_*` consumes an `HttpResponse`. The network sits behind the
//!   `Transport` trait, so tests can swap in scripted transports.
//! - Stores are cloneable handles passed explicitly, not globals.
//! - DTOs are defined independently from the mock-server crate; integration
//!   tests catch schema drift.

pub mod api;
pub mod auth;
pub mod callback;
pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod http_client;
pub mod identity;
pub mod logging;
pub mod pkce;
pub mod session;
pub mod storage;
pub mod store;
pub mod types;

#[cfg(test)]
mod testing;

pub use api::TodoApi;
pub use auth::AuthStore;
pub use callback::{handle_oauth_callback, parse_callback_code, verify_state, CallbackCode};
pub use client::TodoClient;
pub use config::{ClientConfig, ConfigError, LoggingConfig};
pub use error::ApiError;
pub use http::{HttpMethod, HttpRequest, HttpResponse, ReqwestTransport, Transport};
pub use http_client::{HttpClient, LogRedirect, LoginRedirect};
pub use identity::{AuthorizationRequest, IdentityProvider, SupabaseAuth};
pub use session::{AuthResponse, AuthSnapshot, PersistedSession, User};
pub use storage::{FileStorage, MemoryStorage, SessionStorage};
pub use store::TodoStore;
pub use types::{CreateTodo, Todo, TodoCounts, TodoFilter, TodoList, UpdateTodo};
