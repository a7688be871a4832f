//! HTTP surface: lead capture, campaigns, auto-reply settings and webhooks.

pub mod auth;
pub mod routes;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use secrecy::SecretString;
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::autoreply::AutoReplyDispatcher;
use crate::error::{AuthError, AutoReplyError, DatabaseError, ValidationError};
use crate::store::Database;

pub use auth::{ApiKeyAuthorizer, Authorizer, Principal};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Database>,
    pub dispatcher: Arc<AutoReplyDispatcher>,
    pub authorizer: Arc<dyn Authorizer>,
    /// Token for Meta webhook verification (None refuses every attempt).
    pub verify_token: Option<SecretString>,
}

/// Build the Axum router with every API route.
pub fn router(state: AppState) -> Router {
    routes::routes().with_state(state).layer(CorsLayer::permissive())
}

/// Handler error rendered as `{"error": "..."}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn internal() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::MissingCredentials | AuthError::InvalidCredentials => {
                Self::new(StatusCode::UNAUTHORIZED, e.to_string())
            }
            AuthError::Forbidden => Self::new(StatusCode::FORBIDDEN, e.to_string()),
            AuthError::Database(db) => db.into(),
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        Self::bad_request(e.to_string())
    }
}

impl From<DatabaseError> for ApiError {
    fn from(e: DatabaseError) -> Self {
        match e {
            DatabaseError::NotFound { entity, .. } => Self::not_found(format!("{entity} not found")),
            DatabaseError::Constraint(_) => Self::new(StatusCode::CONFLICT, "Already exists"),
            other => {
                tracing::error!(error = %other, "Database error while handling request");
                Self::internal()
            }
        }
    }
}

impl From<AutoReplyError> for ApiError {
    fn from(e: AutoReplyError) -> Self {
        match e {
            AutoReplyError::AccountNotFound(_) => Self::not_found("Account not found"),
            AutoReplyError::Database(db) => db.into(),
        }
    }
}
