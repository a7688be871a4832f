//! Request authorization.
//!
//! Handlers never check identities themselves; they ask the injected
//! [`Authorizer`] for a [`Principal`].

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::HeaderMap;
use serde::Serialize;
use uuid::Uuid;

use crate::error::AuthError;
use crate::store::Database;

/// Header carrying the caller's API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// The authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    pub account_id: Uuid,
    pub email: String,
    pub is_admin: bool,
}

impl Principal {
    pub fn require_admin(&self) -> Result<(), AuthError> {
        if self.is_admin {
            Ok(())
        } else {
            Err(AuthError::Forbidden)
        }
    }
}

/// Maps request headers to the calling principal.
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn authorize(&self, headers: &HeaderMap) -> Result<Principal, AuthError>;
}

/// Resolves `x-api-key` through the store; admins are listed by e-mail.
pub struct ApiKeyAuthorizer {
    store: Arc<dyn Database>,
    admin_emails: HashSet<String>,
}

impl ApiKeyAuthorizer {
    pub fn new<I, S>(store: Arc<dyn Database>, admin_emails: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            store,
            admin_emails: admin_emails
                .into_iter()
                .map(|e| e.as_ref().trim().to_lowercase())
                .collect(),
        }
    }
}

#[async_trait]
impl Authorizer for ApiKeyAuthorizer {
    async fn authorize(&self, headers: &HeaderMap) -> Result<Principal, AuthError> {
        let key = headers
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or(AuthError::MissingCredentials)?;

        let account = self
            .store
            .get_account_by_api_key(key)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        Ok(Principal {
            is_admin: self.admin_emails.contains(&account.email.to_lowercase()),
            account_id: account.id,
            email: account.email,
        })
    }
}

/// Fresh random API key.
pub fn generate_api_key() -> String {
    format!("bk_{}", Uuid::new_v4().simple())
}
