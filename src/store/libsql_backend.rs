//! libSQL backend: async `Database` trait implementation.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::autoreply::types::RuleBook;
use crate::campaigns::{Campaign, CampaignRecipient};
use crate::error::DatabaseError;
use crate::leads::{Lead, NewLead};
use crate::store::migrations;
use crate::store::traits::{Account, Database};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn query_account(
        &self,
        op: &str,
        where_clause: &str,
        value: String,
    ) -> Result<Option<Account>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE {where_clause} = ?1"),
                params![value],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let account = row_to_account(&row)
                    .map_err(|e| DatabaseError::Query(format!("{op} row parse: {e}")))?;
                Ok(Some(account))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("{op}: {e}"))),
        }
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Map a failed write to `Constraint` when SQLite reports a uniqueness clash.
/// Fixed-width UTC timestamp so `processed_at` compares correctly as text.
fn processed_stamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn write_error(op: &str, e: libsql::Error) -> DatabaseError {
    let msg = e.to_string();
    if msg.contains("UNIQUE constraint failed") {
        DatabaseError::Constraint(format!("{op}: {msg}"))
    } else {
        DatabaseError::Query(format!("{op}: {msg}"))
    }
}

fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(v) => libsql::Value::Text(v.to_string()),
        None => libsql::Value::Null,
    }
}

/// Public id handed out in lead-form and webhook URLs.
fn new_unique_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    hex[..16].to_string()
}

const ACCOUNT_COLUMNS: &str =
    "id, email, unique_id, api_key, auto_reply_enabled, created_at, assistant_instructions";

const CAMPAIGN_COLUMNS: &str = "campaign_id, campaign_name, from_number, message, leads, media_url, time_zone, schedule_time, completed";

fn row_to_account(row: &libsql::Row) -> Result<Account, libsql::Error> {
    let id: String = row.get(0)?;
    let created_at: String = row.get(5)?;
    Ok(Account {
        id: Uuid::parse_str(&id).unwrap_or_default(),
        email: row.get(1)?,
        unique_id: row.get(2)?,
        api_key: row.get(3)?,
        auto_reply_enabled: row.get::<i64>(4)? != 0,
        assistant_instructions: row.get(6)?,
        created_at: parse_datetime(&created_at),
    })
}

fn row_to_campaign(row: &libsql::Row) -> Result<Campaign, DatabaseError> {
    let parse = |e: libsql::Error| DatabaseError::Query(format!("campaign row parse: {e}"));
    let leads_json: String = row.get(4).map_err(parse)?;
    let leads: Vec<CampaignRecipient> = serde_json::from_str(&leads_json)
        .map_err(|e| DatabaseError::Serialization(format!("campaign leads: {e}")))?;
    let schedule_time: String = row.get(7).map_err(parse)?;

    Ok(Campaign {
        campaign_id: row.get(0).map_err(parse)?,
        campaign_name: row.get(1).map_err(parse)?,
        from_number: row.get(2).map_err(parse)?,
        message: row.get(3).map_err(parse)?,
        leads,
        media_url: row.get::<String>(5).ok(),
        time_zone: row.get(6).map_err(parse)?,
        schedule_time: parse_datetime(&schedule_time),
        completed: row.get::<i64>(8).map_err(parse)? != 0,
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Accounts ────────────────────────────────────────────────────

    async fn create_account(&self, email: &str, api_key: &str) -> Result<Account, DatabaseError> {
        let now = Utc::now();
        let account = Account {
            id: Uuid::new_v4(),
            email: email.to_string(),
            unique_id: new_unique_id(),
            api_key: api_key.to_string(),
            auto_reply_enabled: false,
            assistant_instructions: String::new(),
            created_at: now,
        };

        self.conn()
            .execute(
                "INSERT INTO accounts (id, email, unique_id, api_key, auto_reply_enabled, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, 0, ?5, ?5)",
                params![
                    account.id.to_string(),
                    account.email.clone(),
                    account.unique_id.clone(),
                    account.api_key.clone(),
                    now.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| write_error("create_account", e))?;

        debug!(account_id = %account.id, email = %account.email, "Account created");
        Ok(account)
    }

    async fn get_account(&self, id: Uuid) -> Result<Option<Account>, DatabaseError> {
        self.query_account("get_account", "id", id.to_string()).await
    }

    async fn get_account_by_email(&self, email: &str) -> Result<Option<Account>, DatabaseError> {
        self.query_account("get_account_by_email", "email", email.to_string())
            .await
    }

    async fn get_account_by_api_key(
        &self,
        api_key: &str,
    ) -> Result<Option<Account>, DatabaseError> {
        self.query_account("get_account_by_api_key", "api_key", api_key.to_string())
            .await
    }

    async fn get_account_by_unique_id(
        &self,
        unique_id: &str,
    ) -> Result<Option<Account>, DatabaseError> {
        self.query_account("get_account_by_unique_id", "unique_id", unique_id.to_string())
            .await
    }

    async fn list_accounts(&self) -> Result<Vec<Account>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts ORDER BY created_at ASC"),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_accounts: {e}")))?;

        let mut accounts = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_account(&row) {
                Ok(account) => accounts.push(account),
                Err(e) => tracing::warn!("Skipping account row: {e}"),
            }
        }
        Ok(accounts)
    }

    async fn set_auto_reply_enabled(&self, id: Uuid, enabled: bool) -> Result<(), DatabaseError> {
        let count = self
            .conn()
            .execute(
                "UPDATE accounts SET auto_reply_enabled = ?1, updated_at = ?2 WHERE id = ?3",
                params![enabled as i64, Utc::now().to_rfc3339(), id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("set_auto_reply_enabled: {e}")))?;

        if count == 0 {
            return Err(DatabaseError::NotFound {
                entity: "account".into(),
                id: id.to_string(),
            });
        }
        debug!(account_id = %id, enabled, "Auto-reply toggled");
        Ok(())
    }

    async fn set_assistant_instructions(
        &self,
        id: Uuid,
        instructions: &str,
    ) -> Result<(), DatabaseError> {
        let count = self
            .conn()
            .execute(
                "UPDATE accounts SET assistant_instructions = ?1, updated_at = ?2 WHERE id = ?3",
                params![instructions, Utc::now().to_rfc3339(), id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("set_assistant_instructions: {e}")))?;

        if count == 0 {
            return Err(DatabaseError::NotFound {
                entity: "account".into(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    // ── Rules ───────────────────────────────────────────────────────

    async fn load_rule_book(&self, account_id: Uuid) -> Result<RuleBook, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT document FROM rule_books WHERE account_id = ?1",
                params![account_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("load_rule_book: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let document: String = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("load_rule_book row parse: {e}")))?;
                serde_json::from_str(&document)
                    .map_err(|e| DatabaseError::Serialization(format!("rule book: {e}")))
            }
            Ok(None) => Ok(RuleBook::default()),
            Err(e) => Err(DatabaseError::Query(format!("load_rule_book: {e}"))),
        }
    }

    async fn save_rule_book(
        &self,
        account_id: Uuid,
        book: &RuleBook,
    ) -> Result<(), DatabaseError> {
        let document =
            serde_json::to_string(book).map_err(|e| DatabaseError::Serialization(e.to_string()))?;

        self.conn()
            .execute(
                "INSERT INTO rule_books (account_id, document, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT (account_id) DO UPDATE SET document = ?2, updated_at = ?3",
                params![account_id.to_string(), document, Utc::now().to_rfc3339()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("save_rule_book: {e}")))?;

        debug!(
            account_id = %account_id,
            tactics = book.tactics.len(),
            "Rule book saved"
        );
        Ok(())
    }

    async fn mark_message_processed(
        &self,
        account_id: Uuid,
        message_id: &str,
    ) -> Result<bool, DatabaseError> {
        let count = self
            .conn()
            .execute(
                "INSERT OR IGNORE INTO processed_messages (account_id, message_id, processed_at) VALUES (?1, ?2, ?3)",
                params![account_id.to_string(), message_id, processed_stamp(Utc::now())],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("mark_message_processed: {e}")))?;
        Ok(count > 0)
    }

    async fn purge_processed_messages(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<u64, DatabaseError> {
        let count = self
            .conn()
            .execute(
                "DELETE FROM processed_messages WHERE processed_at < ?1",
                params![processed_stamp(older_than)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("purge_processed_messages: {e}")))?;
        if count > 0 {
            debug!(removed = count, "Purged processed message ids");
        }
        Ok(count)
    }

    // ── Leads ───────────────────────────────────────────────────────

    async fn add_lead(&self, account_id: Uuid, lead: &NewLead) -> Result<bool, DatabaseError> {
        let count = self
            .conn()
            .execute(
                "INSERT OR IGNORE INTO leads (id, account_id, name, phone_number, source, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    Uuid::new_v4().to_string(),
                    account_id.to_string(),
                    lead.name.clone(),
                    lead.phone_number.clone(),
                    lead.source.clone(),
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("add_lead: {e}")))?;

        debug!(account_id = %account_id, source = %lead.source, new = count > 0, "Lead stored");
        Ok(count > 0)
    }

    async fn list_leads(&self, account_id: Uuid) -> Result<Vec<Lead>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT name, phone_number, source, created_at FROM leads WHERE account_id = ?1 ORDER BY rowid ASC",
                params![account_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_leads: {e}")))?;

        let mut leads = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_leads: {e}")))?
        {
            let created_at: String = row
                .get(3)
                .map_err(|e| DatabaseError::Query(format!("list_leads row parse: {e}")))?;
            leads.push(Lead {
                name: row.get(0).unwrap_or_default(),
                phone_number: row
                    .get(1)
                    .map_err(|e| DatabaseError::Query(format!("list_leads row parse: {e}")))?,
                source: row.get(2).unwrap_or_default(),
                created_at: parse_datetime(&created_at),
            });
        }
        Ok(leads)
    }

    // ── Campaigns ───────────────────────────────────────────────────

    async fn insert_campaign(
        &self,
        account_id: Uuid,
        campaign: &Campaign,
    ) -> Result<(), DatabaseError> {
        let leads = serde_json::to_string(&campaign.leads)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;

        self.conn()
            .execute(
                "INSERT INTO campaigns (id, account_id, campaign_id, campaign_name, from_number, message, leads, media_url, time_zone, schedule_time, completed, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    Uuid::new_v4().to_string(),
                    account_id.to_string(),
                    campaign.campaign_id.clone(),
                    campaign.campaign_name.clone(),
                    campaign.from_number.clone(),
                    campaign.message.clone(),
                    leads,
                    opt_text(campaign.media_url.as_deref()),
                    campaign.time_zone.clone(),
                    campaign.schedule_time.to_rfc3339(),
                    campaign.completed as i64,
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| write_error("insert_campaign", e))?;

        debug!(
            account_id = %account_id,
            campaign_id = %campaign.campaign_id,
            recipients = campaign.leads.len(),
            "Campaign stored"
        );
        Ok(())
    }

    async fn list_campaigns(&self, account_id: Uuid) -> Result<Vec<Campaign>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE account_id = ?1 ORDER BY rowid ASC"
                ),
                params![account_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_campaigns: {e}")))?;

        let mut campaigns = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_campaign(&row) {
                Ok(campaign) => campaigns.push(campaign),
                Err(e) => tracing::warn!("Skipping campaign row: {e}"),
            }
        }
        Ok(campaigns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autoreply::rules::{MatchType, Rule};
    use crate::autoreply::types::Tactic;

    async fn test_db() -> LibSqlBackend {
        LibSqlBackend::new_memory().await.unwrap()
    }

    fn sample_campaign(id: &str) -> Campaign {
        Campaign {
            campaign_id: id.into(),
            campaign_name: "Spring Sale".into(),
            from_number: "15550001111".into(),
            message: "20% off".into(),
            leads: vec![CampaignRecipient {
                name: "Ari".into(),
                phone_number: "15550002222".into(),
                source: Some("wpforms".into()),
            }],
            media_url: None,
            time_zone: crate::campaigns::CAMPAIGN_TIME_ZONE.into(),
            schedule_time: Utc::now(),
            completed: false,
        }
    }

    // ── Account tests ───────────────────────────────────────────────

    #[tokio::test]
    async fn create_and_lookup_account() {
        let db = test_db().await;
        let account = db.create_account("owner@example.com", "key-1").await.unwrap();
        assert!(!account.auto_reply_enabled);

        let by_id = db.get_account(account.id).await.unwrap().unwrap();
        assert_eq!(by_id.email, "owner@example.com");

        let by_key = db.get_account_by_api_key("key-1").await.unwrap().unwrap();
        assert_eq!(by_key.id, account.id);

        let by_unique = db
            .get_account_by_unique_id(&account.unique_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_unique.id, account.id);

        let by_email = db
            .get_account_by_email("owner@example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_email.id, account.id);

        assert!(db.get_account(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_email_is_a_constraint_error() {
        let db = test_db().await;
        db.create_account("a@example.com", "k1").await.unwrap();
        let err = db.create_account("a@example.com", "k2").await.unwrap_err();
        assert!(matches!(err, DatabaseError::Constraint(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn toggle_auto_reply() {
        let db = test_db().await;
        let account = db.create_account("a@example.com", "k1").await.unwrap();

        db.set_auto_reply_enabled(account.id, true).await.unwrap();
        assert!(db.get_account(account.id).await.unwrap().unwrap().auto_reply_enabled);

        db.set_auto_reply_enabled(account.id, false).await.unwrap();
        assert!(!db.get_account(account.id).await.unwrap().unwrap().auto_reply_enabled);
    }

    #[tokio::test]
    async fn toggle_unknown_account_is_not_found() {
        let db = test_db().await;
        let err = db
            .set_auto_reply_enabled(Uuid::new_v4(), true)
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { .. }));
    }

    #[tokio::test]
    async fn list_accounts_in_creation_order() {
        let db = test_db().await;
        db.create_account("a@example.com", "k1").await.unwrap();
        db.create_account("b@example.com", "k2").await.unwrap();
        let emails: Vec<String> = db
            .list_accounts()
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.email)
            .collect();
        assert_eq!(emails, vec!["a@example.com", "b@example.com"]);
    }

    #[tokio::test]
    async fn assistant_instructions_are_stored_with_the_account() {
        let db = test_db().await;
        let account = db.create_account("a@example.com", "k1").await.unwrap();
        assert_eq!(account.assistant_instructions, "");

        db.set_assistant_instructions(account.id, "Answer in Spanish")
            .await
            .unwrap();
        let loaded = db.get_account_by_api_key("k1").await.unwrap().unwrap();
        assert_eq!(loaded.assistant_instructions, "Answer in Spanish");

        let err = db
            .set_assistant_instructions(Uuid::new_v4(), "x")
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { .. }));
    }

    // ── Rule book tests ─────────────────────────────────────────────

    #[tokio::test]
    async fn rule_book_defaults_to_empty() {
        let db = test_db().await;
        let account = db.create_account("a@example.com", "k1").await.unwrap();
        let book = db.load_rule_book(account.id).await.unwrap();
        assert!(book.tactics.is_empty());
        assert!(book.effective_rule_set().is_empty());
    }

    #[tokio::test]
    async fn rule_book_save_replaces_previous() {
        let db = test_db().await;
        let account = db.create_account("a@example.com", "k1").await.unwrap();

        let first = RuleBook {
            tactics: vec![Tactic {
                name: "one".into(),
                rows: vec![Rule::includes("price", "From $10")],
            }],
            active_tactic: None,
        };
        db.save_rule_book(account.id, &first).await.unwrap();

        let second = RuleBook {
            tactics: vec![Tactic {
                name: "two".into(),
                rows: vec![Rule::starts_with("Hi", "Hello").with_platforms(["wpforms"])],
            }],
            active_tactic: Some("two".into()),
        };
        db.save_rule_book(account.id, &second).await.unwrap();

        let loaded = db.load_rule_book(account.id).await.unwrap();
        assert_eq!(loaded, second);
    }

    #[tokio::test]
    async fn rule_book_round_trip_preserves_rows_in_order() {
        let db = test_db().await;
        let account = db.create_account("a@example.com", "k1").await.unwrap();

        let rows = vec![
            Rule::starts_with("Hi", "Hello!").with_delay(45),
            Rule {
                match_type: MatchType::Unknown("regex".into()),
                ..Rule::includes("^pri[cz]e", "Plans from $10")
            },
            Rule::includes("hours", "We open at 9")
                .with_delay(120)
                .with_platforms(["whatsapp", "wpforms", "elementor"]),
            Rule::includes("", "empty term is kept").with_delay(3),
            Rule::starts_with("Thanks", "Any time").with_platforms(["webchat"]),
        ];
        let book = RuleBook {
            tactics: vec![
                Tactic {
                    name: "support".into(),
                    rows: rows.clone(),
                },
                Tactic {
                    name: "sales".into(),
                    rows: vec![Rule::includes("demo", "Book a demo")],
                },
            ],
            active_tactic: Some("support".into()),
        };
        db.save_rule_book(account.id, &book).await.unwrap();

        let loaded = db.load_rule_book(account.id).await.unwrap();
        assert_eq!(loaded.tactics[0].rows.len(), rows.len());
        for (i, (got, want)) in loaded.tactics[0].rows.iter().zip(&rows).enumerate() {
            assert_eq!(got, want, "row {i} changed");
        }
        assert_eq!(loaded, book);
        assert_eq!(loaded.effective_rule_set().rules(), rows.as_slice());
    }

    #[tokio::test]
    async fn processed_messages_are_recorded_once() {
        let db = test_db().await;
        let account = db.create_account("a@example.com", "k1").await.unwrap();

        assert!(db.mark_message_processed(account.id, "wamid.1").await.unwrap());
        assert!(!db.mark_message_processed(account.id, "wamid.1").await.unwrap());
        assert!(db.mark_message_processed(account.id, "wamid.2").await.unwrap());
    }

    #[tokio::test]
    async fn purge_forgets_old_processed_messages() {
        let db = test_db().await;
        let account = db.create_account("a@example.com", "k1").await.unwrap();
        db.mark_message_processed(account.id, "wamid.1").await.unwrap();
        db.mark_message_processed(account.id, "wamid.2").await.unwrap();

        let past = Utc::now() - chrono::Duration::hours(1);
        assert_eq!(db.purge_processed_messages(past).await.unwrap(), 0);
        assert!(!db.mark_message_processed(account.id, "wamid.1").await.unwrap());

        let future = Utc::now() + chrono::Duration::seconds(1);
        assert_eq!(db.purge_processed_messages(future).await.unwrap(), 2);
        assert!(db.mark_message_processed(account.id, "wamid.1").await.unwrap());
    }

    // ── Lead tests ──────────────────────────────────────────────────

    #[tokio::test]
    async fn leads_have_set_semantics() {
        let db = test_db().await;
        let account = db.create_account("a@example.com", "k1").await.unwrap();
        let lead = NewLead {
            name: "Dana".into(),
            phone_number: "15550109999".into(),
            source: "wpforms".into(),
        };

        assert!(db.add_lead(account.id, &lead).await.unwrap());
        assert!(!db.add_lead(account.id, &lead).await.unwrap());

        let other_source = NewLead {
            source: "elementor".into(),
            ..lead.clone()
        };
        assert!(db.add_lead(account.id, &other_source).await.unwrap());

        let leads = db.list_leads(account.id).await.unwrap();
        assert_eq!(leads.len(), 2);
        assert_eq!(leads[0].source, "wpforms");
        assert_eq!(leads[1].source, "elementor");
    }

    #[tokio::test]
    async fn leads_are_scoped_per_account() {
        let db = test_db().await;
        let a = db.create_account("a@example.com", "k1").await.unwrap();
        let b = db.create_account("b@example.com", "k2").await.unwrap();
        let lead = NewLead {
            name: "Dana".into(),
            phone_number: "1555".into(),
            source: "other".into(),
        };
        assert!(db.add_lead(a.id, &lead).await.unwrap());
        assert!(db.add_lead(b.id, &lead).await.unwrap());
        assert_eq!(db.list_leads(a.id).await.unwrap().len(), 1);
    }

    // ── Campaign tests ──────────────────────────────────────────────

    #[tokio::test]
    async fn insert_and_list_campaigns() {
        let db = test_db().await;
        let account = db.create_account("a@example.com", "k1").await.unwrap();

        let mut with_media = sample_campaign("launch-0001");
        with_media.media_url = Some("https://cdn.example.com/a.png".into());
        db.insert_campaign(account.id, &sample_campaign("spring-sale-a1b2"))
            .await
            .unwrap();
        db.insert_campaign(account.id, &with_media).await.unwrap();

        let campaigns = db.list_campaigns(account.id).await.unwrap();
        assert_eq!(campaigns.len(), 2);
        assert_eq!(campaigns[0].campaign_id, "spring-sale-a1b2");
        assert_eq!(campaigns[0].leads.len(), 1);
        assert!(campaigns[0].media_url.is_none());
        assert_eq!(
            campaigns[1].media_url.as_deref(),
            Some("https://cdn.example.com/a.png")
        );
    }

    #[tokio::test]
    async fn duplicate_campaign_id_is_a_constraint_error() {
        let db = test_db().await;
        let account = db.create_account("a@example.com", "k1").await.unwrap();
        db.insert_campaign(account.id, &sample_campaign("dup"))
            .await
            .unwrap();
        let err = db
            .insert_campaign(account.id, &sample_campaign("dup"))
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Constraint(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn new_local_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("bumby.db");
        let db = LibSqlBackend::new_local(&path).await.unwrap();
        db.create_account("a@example.com", "k1").await.unwrap();
        assert!(path.exists());
    }
}
