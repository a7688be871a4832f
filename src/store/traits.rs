//! Unified `Database` trait: single async interface for all persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::autoreply::types::RuleBook;
use crate::campaigns::Campaign;
use crate::error::DatabaseError;
use crate::leads::{Lead, NewLead};

/// An account that owns rules, leads and campaigns.
#[derive(Debug, Clone, Serialize)]
pub struct Account {
    pub id: Uuid,
    pub email: String,
    /// Public id embedded in lead-form and webhook URLs.
    pub unique_id: String,
    #[serde(skip_serializing)]
    pub api_key: String,
    /// Auto-reply ON/OFF switch.
    pub auto_reply_enabled: bool,
    /// Free-text assistant instructions saved alongside the switch.
    pub assistant_instructions: String,
    pub created_at: DateTime<Utc>,
}

/// Backend-agnostic database trait covering accounts, rules, leads and campaigns.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Accounts ────────────────────────────────────────────────────

    /// Create an account with a fresh id and public unique id.
    async fn create_account(&self, email: &str, api_key: &str) -> Result<Account, DatabaseError>;

    async fn get_account(&self, id: Uuid) -> Result<Option<Account>, DatabaseError>;

    async fn get_account_by_email(&self, email: &str) -> Result<Option<Account>, DatabaseError>;

    async fn get_account_by_api_key(&self, api_key: &str)
    -> Result<Option<Account>, DatabaseError>;

    async fn get_account_by_unique_id(
        &self,
        unique_id: &str,
    ) -> Result<Option<Account>, DatabaseError>;

    async fn list_accounts(&self) -> Result<Vec<Account>, DatabaseError>;

    /// Flip the auto-reply switch. `NotFound` if the account does not exist.
    async fn set_auto_reply_enabled(&self, id: Uuid, enabled: bool) -> Result<(), DatabaseError>;

    /// Replace the assistant instructions. `NotFound` if the account does not exist.
    async fn set_assistant_instructions(
        &self,
        id: Uuid,
        instructions: &str,
    ) -> Result<(), DatabaseError>;

    // ── Rules ───────────────────────────────────────────────────────

    /// Load the account's rule book; empty if none was ever saved.
    async fn load_rule_book(&self, account_id: Uuid) -> Result<RuleBook, DatabaseError>;

    /// Replace the account's rule book wholesale.
    async fn save_rule_book(&self, account_id: Uuid, book: &RuleBook)
    -> Result<(), DatabaseError>;

    /// Record that an inbound message was handled.
    /// Returns `false` if it had already been recorded.
    async fn mark_message_processed(
        &self,
        account_id: Uuid,
        message_id: &str,
    ) -> Result<bool, DatabaseError>;

    /// Forget processed message ids recorded before `older_than`.
    /// Returns how many were removed.
    async fn purge_processed_messages(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<u64, DatabaseError>;

    // ── Leads ───────────────────────────────────────────────────────

    /// Add a lead with set semantics on (account, phone, source).
    /// Returns `true` if the lead was new.
    async fn add_lead(&self, account_id: Uuid, lead: &NewLead) -> Result<bool, DatabaseError>;

    /// Leads in insertion order.
    async fn list_leads(&self, account_id: Uuid) -> Result<Vec<Lead>, DatabaseError>;

    // ── Campaigns ───────────────────────────────────────────────────

    /// Store a campaign. `Constraint` if the campaign id is taken for this account.
    async fn insert_campaign(
        &self,
        account_id: Uuid,
        campaign: &Campaign,
    ) -> Result<(), DatabaseError>;

    /// Campaigns in creation order.
    async fn list_campaigns(&self, account_id: Uuid) -> Result<Vec<Campaign>, DatabaseError>;
}
