//! Auto-reply dispatcher: turns a match into a delayed outbound send.
//!
//! Pending sends are tracked per reply id so an account's queue can be
//! cancelled when auto-reply is switched off.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::autoreply::rules::RuleEvaluator;
use crate::autoreply::types::{InboundMessage, MatchReason, RuleWarning};
use crate::error::AutoReplyError;
use crate::store::Database;
use crate::whatsapp::MessageSender;

/// How long a processed message id blocks redelivery. Covers Meta's
/// webhook retry window.
pub const DEDUP_RETENTION_DAYS: i64 = 7;

/// How often old processed message ids are purged.
const DEDUP_SWEEP_INTERVAL_SECS: u64 = 3600;

/// What happened to one inbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// Auto-reply is switched off for the account.
    Disabled,
    /// The message id was already handled.
    Duplicate,
    NoMatch {
        reason: MatchReason,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        warnings: Vec<RuleWarning>,
    },
    Scheduled {
        reply_id: Uuid,
        rule_index: usize,
        delay_seconds: u64,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        warnings: Vec<RuleWarning>,
    },
}

/// A reply waiting out its delay.
#[derive(Debug)]
struct PendingSend {
    account_id: Uuid,
    handle: JoinHandle<()>,
}

/// Evaluates inbound messages and schedules the matching replies.
pub struct AutoReplyDispatcher {
    store: Arc<dyn Database>,
    sender: Arc<dyn MessageSender>,
    evaluator: RuleEvaluator,
    pending: Arc<RwLock<HashMap<Uuid, PendingSend>>>,
}

impl AutoReplyDispatcher {
    pub fn new(
        store: Arc<dyn Database>,
        sender: Arc<dyn MessageSender>,
        evaluator: RuleEvaluator,
    ) -> Self {
        Self {
            store,
            sender,
            evaluator,
            pending: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Run one inbound message through the auto-reply pipeline.
    pub async fn handle_inbound(
        &self,
        account_id: Uuid,
        message: &InboundMessage,
    ) -> Result<DispatchOutcome, AutoReplyError> {
        let account = self
            .store
            .get_account(account_id)
            .await?
            .ok_or(AutoReplyError::AccountNotFound(account_id))?;

        if !account.auto_reply_enabled {
            debug!(account_id = %account_id, message_id = %message.id, "Auto-reply disabled");
            return Ok(DispatchOutcome::Disabled);
        }

        // Only messages that were actually evaluated are recorded, so a
        // provider retry after a failed load is processed again.
        let rule_set = self.store.load_rule_book(account_id).await?.effective_rule_set();
        let result = self.evaluator.evaluate(&rule_set, message);

        if !self
            .store
            .mark_message_processed(account_id, &message.id)
            .await?
        {
            debug!(account_id = %account_id, message_id = %message.id, "Duplicate inbound message");
            return Ok(DispatchOutcome::Duplicate);
        }

        for warning in &result.warnings {
            warn!(
                account_id = %account_id,
                message_id = %message.id,
                "Auto-reply rule problem: {warning}"
            );
        }

        let Some(matched) = result.rule else {
            debug!(
                account_id = %account_id,
                message_id = %message.id,
                reason = ?result.reason,
                "No auto-reply rule matched"
            );
            return Ok(DispatchOutcome::NoMatch {
                reason: result.reason,
                warnings: result.warnings,
            });
        };

        let reply_id = Uuid::new_v4();
        let delay = matched.delay();
        let to = message.sender_phone.clone();
        let body = matched.reply_text().to_string();

        // Holding the write lock across spawn keeps the task from removing
        // itself before it is registered.
        let mut pending = self.pending.write().await;
        let handle = tokio::spawn(deliver_after(
            Arc::clone(&self.store),
            Arc::clone(&self.sender),
            Arc::clone(&self.pending),
            reply_id,
            account_id,
            to,
            body,
            delay,
        ));
        pending.insert(reply_id, PendingSend { account_id, handle });
        drop(pending);

        info!(
            account_id = %account_id,
            message_id = %message.id,
            reply_id = %reply_id,
            rule_index = matched.index,
            delay_secs = matched.delay_seconds,
            "Auto-reply scheduled"
        );

        Ok(DispatchOutcome::Scheduled {
            reply_id,
            rule_index: matched.index,
            delay_seconds: matched.delay_seconds,
            warnings: result.warnings,
        })
    }

    /// Abort every pending send for `account_id`. Returns how many were cancelled.
    pub async fn cancel_account(&self, account_id: Uuid) -> usize {
        let mut pending = self.pending.write().await;
        let ids: Vec<Uuid> = pending
            .iter()
            .filter(|(_, p)| p.account_id == account_id)
            .map(|(id, _)| *id)
            .collect();

        for id in &ids {
            if let Some(send) = pending.remove(id) {
                send.handle.abort();
            }
        }

        if !ids.is_empty() {
            info!(account_id = %account_id, cancelled = ids.len(), "Pending auto-replies cancelled");
        }
        ids.len()
    }

    /// Number of replies still waiting to be sent.
    pub async fn pending_count(&self) -> usize {
        self.pending.read().await.len()
    }
}

/// Spawn the background loop that purges expired processed message ids.
/// The first sweep runs immediately, then hourly.
pub fn spawn_dedup_sweep_loop(store: Arc<dyn Database>) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            "Dedup sweep loop started (interval: {}s, retention: {}d)",
            DEDUP_SWEEP_INTERVAL_SECS, DEDUP_RETENTION_DAYS
        );

        let mut tick = tokio::time::interval(Duration::from_secs(DEDUP_SWEEP_INTERVAL_SECS));
        loop {
            tick.tick().await;
            run_dedup_sweep(&store, Utc::now()).await;
        }
    })
}

/// Purge processed message ids older than the retention window. Returns how many were removed.
pub async fn run_dedup_sweep(store: &Arc<dyn Database>, now: DateTime<Utc>) -> u64 {
    let cutoff = now - chrono::Duration::days(DEDUP_RETENTION_DAYS);
    match store.purge_processed_messages(cutoff).await {
        Ok(removed) => {
            if removed > 0 {
                info!(removed, "Expired processed message ids purged");
            }
            removed
        }
        Err(e) => {
            warn!(error = %e, "Dedup sweep failed");
            0
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn deliver_after(
    store: Arc<dyn Database>,
    sender: Arc<dyn MessageSender>,
    pending: Arc<RwLock<HashMap<Uuid, PendingSend>>>,
    reply_id: Uuid,
    account_id: Uuid,
    to: String,
    body: String,
    delay: Duration,
) {
    tokio::time::sleep(delay).await;

    match store.get_account(account_id).await {
        Ok(Some(account)) if account.auto_reply_enabled => {
            match sender.send(&to, &body, None).await {
                Ok(receipt) => info!(
                    account_id = %account_id,
                    reply_id = %reply_id,
                    provider_id = ?receipt.message_id,
                    "Auto-reply sent"
                ),
                Err(e) => warn!(
                    account_id = %account_id,
                    reply_id = %reply_id,
                    error = %e,
                    "Auto-reply send failed"
                ),
            }
        }
        Ok(_) => debug!(
            account_id = %account_id,
            reply_id = %reply_id,
            "Auto-reply switched off before send; dropped"
        ),
        Err(e) => warn!(
            account_id = %account_id,
            reply_id = %reply_id,
            error = %e,
            "Could not re-check account before send"
        ),
    }

    pending.write().await.remove(&reply_id);
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::autoreply::rules::{EvaluatorConfig, Rule};
    use crate::autoreply::types::{RuleBook, Tactic};
    use crate::error::{DatabaseError, SenderError};
    use crate::store::LibSqlBackend;
    use crate::store::traits::Account;
    use crate::whatsapp::SendReceipt;

    #[derive(Default)]
    struct RecordingSender {
        sent: Mutex<Vec<(String, String)>>,
        fail: bool,
    }

    #[async_trait]
    impl MessageSender for RecordingSender {
        async fn send(
            &self,
            to: &str,
            body: &str,
            _media_url: Option<&str>,
        ) -> Result<SendReceipt, SenderError> {
            self.sent.lock().unwrap().push((to.to_string(), body.to_string()));
            if self.fail {
                return Err(SenderError::Provider("boom".into()));
            }
            Ok(SendReceipt {
                to: to.to_string(),
                message_id: Some("wamid.out".into()),
            })
        }
    }

    struct Harness {
        store: Arc<LibSqlBackend>,
        sender: Arc<RecordingSender>,
        dispatcher: AutoReplyDispatcher,
        account: Account,
    }

    async fn harness_with(sender: RecordingSender, rows: Vec<Rule>) -> Harness {
        let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let account = store.create_account("owner@example.com", "k1").await.unwrap();
        store.set_auto_reply_enabled(account.id, true).await.unwrap();
        store
            .save_rule_book(
                account.id,
                &RuleBook {
                    tactics: vec![Tactic {
                        name: "default".into(),
                        rows,
                    }],
                    active_tactic: None,
                },
            )
            .await
            .unwrap();

        let sender = Arc::new(sender);
        let dispatcher = AutoReplyDispatcher::new(
            store.clone(),
            sender.clone(),
            RuleEvaluator::new(EvaluatorConfig::default()),
        );
        Harness {
            store,
            sender,
            dispatcher,
            account,
        }
    }

    async fn harness() -> Harness {
        harness_with(
            RecordingSender::default(),
            vec![Rule::includes("Hi", "Hello, how can I help?").with_delay(10)],
        )
        .await
    }

    /// Let the paused clock run until every scheduled send has finished.
    async fn settle(dispatcher: &AutoReplyDispatcher) {
        tokio::time::sleep(Duration::from_secs(11)).await;
        for _ in 0..100 {
            if dispatcher.pending_count().await == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        panic!("pending sends never finished");
    }

    fn hi(id: &str) -> InboundMessage {
        InboundMessage::new("wpforms", "15550001111", "Hi").with_id(id)
    }

    #[tokio::test]
    async fn unknown_account_is_an_error() {
        let h = harness().await;
        let err = h
            .dispatcher
            .handle_inbound(Uuid::new_v4(), &hi("m1"))
            .await
            .unwrap_err();
        assert!(matches!(err, AutoReplyError::AccountNotFound(_)));
    }

    #[tokio::test]
    async fn disabled_account_skips_evaluation() {
        let h = harness().await;
        h.store.set_auto_reply_enabled(h.account.id, false).await.unwrap();

        let outcome = h.dispatcher.handle_inbound(h.account.id, &hi("m1")).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Disabled);
        assert_eq!(h.dispatcher.pending_count().await, 0);

        // Not recorded as processed, so it can still be handled later.
        assert!(h.store.mark_message_processed(h.account.id, "m1").await.unwrap());
    }

    #[tokio::test]
    async fn no_match_is_silent() {
        let h = harness().await;
        let msg = InboundMessage::new("wpforms", "1555", "H i").with_id("m1");
        let outcome = h.dispatcher.handle_inbound(h.account.id, &msg).await.unwrap();
        assert_eq!(
            outcome,
            DispatchOutcome::NoMatch {
                reason: MatchReason::NoRuleMatched,
                warnings: vec![],
            }
        );
        assert_eq!(h.dispatcher.pending_count().await, 0);
    }

    #[tokio::test]
    async fn empty_rule_book_reports_empty_rule_set() {
        let h = harness_with(RecordingSender::default(), vec![]).await;
        let outcome = h.dispatcher.handle_inbound(h.account.id, &hi("m1")).await.unwrap();
        assert!(matches!(
            outcome,
            DispatchOutcome::NoMatch {
                reason: MatchReason::EmptyRuleSet,
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn match_is_sent_after_delay() {
        let h = harness().await;

        let outcome = h.dispatcher.handle_inbound(h.account.id, &hi("m1")).await.unwrap();
        match outcome {
            DispatchOutcome::Scheduled {
                rule_index,
                delay_seconds,
                ..
            } => {
                assert_eq!(rule_index, 0);
                assert_eq!(delay_seconds, 10);
            }
            other => panic!("Expected Scheduled, got {:?}", other),
        }
        assert_eq!(h.dispatcher.pending_count().await, 1);
        assert!(h.sender.sent.lock().unwrap().is_empty());

        settle(&h.dispatcher).await;

        let sent = h.sender.sent.lock().unwrap().clone();
        assert_eq!(
            sent,
            vec![("15550001111".to_string(), "Hello, how can I help?".to_string())]
        );
        assert_eq!(h.dispatcher.pending_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn short_delay_is_clamped_and_reported() {
        let h = harness_with(
            RecordingSender::default(),
            vec![Rule::includes("Hi", "Hello").with_delay(5)],
        )
        .await;

        let outcome = h.dispatcher.handle_inbound(h.account.id, &hi("m1")).await.unwrap();
        match outcome {
            DispatchOutcome::Scheduled {
                delay_seconds,
                warnings,
                ..
            } => {
                assert_eq!(delay_seconds, 10);
                assert_eq!(warnings.len(), 1);
            }
            other => panic!("Expected Scheduled, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_message_is_sent_once() {
        let h = harness().await;

        let first = h.dispatcher.handle_inbound(h.account.id, &hi("wamid.1")).await.unwrap();
        assert!(matches!(first, DispatchOutcome::Scheduled { .. }));
        let second = h.dispatcher.handle_inbound(h.account.id, &hi("wamid.1")).await.unwrap();
        assert_eq!(second, DispatchOutcome::Duplicate);

        settle(&h.dispatcher).await;
        assert_eq!(h.sender.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_account_aborts_pending_sends() {
        let h = harness().await;

        h.dispatcher.handle_inbound(h.account.id, &hi("m1")).await.unwrap();
        h.dispatcher.handle_inbound(h.account.id, &hi("m2")).await.unwrap();
        assert_eq!(h.dispatcher.pending_count().await, 2);

        assert_eq!(h.dispatcher.cancel_account(h.account.id).await, 2);
        assert_eq!(h.dispatcher.pending_count().await, 0);
        assert_eq!(h.dispatcher.cancel_account(h.account.id).await, 0);

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(h.sender.sent.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn switching_off_before_delay_drops_the_send() {
        let h = harness().await;

        h.dispatcher.handle_inbound(h.account.id, &hi("m1")).await.unwrap();
        h.store.set_auto_reply_enabled(h.account.id, false).await.unwrap();

        settle(&h.dispatcher).await;
        assert!(h.sender.sent.lock().unwrap().is_empty());
        assert_eq!(h.dispatcher.pending_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn send_failure_is_not_retried() {
        let h = harness_with(
            RecordingSender {
                fail: true,
                ..Default::default()
            },
            vec![Rule::includes("Hi", "Hello").with_delay(10)],
        )
        .await;

        h.dispatcher.handle_inbound(h.account.id, &hi("m1")).await.unwrap();
        settle(&h.dispatcher).await;
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(h.sender.sent.lock().unwrap().len(), 1);
        assert_eq!(h.dispatcher.pending_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_rule_load_leaves_message_retryable() {
        let h = harness().await;
        h.store
            .conn()
            .execute(
                "UPDATE rule_books SET document = 'not json' WHERE account_id = ?1",
                libsql::params![h.account.id.to_string()],
            )
            .await
            .unwrap();

        let err = h
            .dispatcher
            .handle_inbound(h.account.id, &hi("wamid.X"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AutoReplyError::Database(DatabaseError::Serialization(_))
        ));
        assert_eq!(h.dispatcher.pending_count().await, 0);

        h.store
            .save_rule_book(
                h.account.id,
                &RuleBook {
                    tactics: vec![Tactic {
                        name: "default".into(),
                        rows: vec![Rule::includes("Hi", "Hello again").with_delay(10)],
                    }],
                    active_tactic: None,
                },
            )
            .await
            .unwrap();

        let retry = h
            .dispatcher
            .handle_inbound(h.account.id, &hi("wamid.X"))
            .await
            .unwrap();
        assert!(matches!(retry, DispatchOutcome::Scheduled { .. }), "got {retry:?}");

        settle(&h.dispatcher).await;
        let sent = h.sender.sent.lock().unwrap().clone();
        assert_eq!(sent, vec![("15550001111".to_string(), "Hello again".to_string())]);
    }

    #[tokio::test]
    async fn dedup_sweep_honours_retention_window() {
        let h = harness().await;
        h.dispatcher.handle_inbound(h.account.id, &hi("wamid.old")).await.unwrap();
        h.dispatcher.cancel_account(h.account.id).await;
        let store: Arc<dyn Database> = h.store.clone();

        assert_eq!(run_dedup_sweep(&store, Utc::now()).await, 0);
        let outcome = h.dispatcher.handle_inbound(h.account.id, &hi("wamid.old")).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Duplicate);

        let later = Utc::now() + chrono::Duration::days(DEDUP_RETENTION_DAYS + 1);
        assert_eq!(run_dedup_sweep(&store, later).await, 1);
        let outcome = h.dispatcher.handle_inbound(h.account.id, &hi("wamid.old")).await.unwrap();
        assert!(matches!(outcome, DispatchOutcome::Scheduled { .. }));
        h.dispatcher.cancel_account(h.account.id).await;
    }

    #[test]
    fn outcome_serializes_with_tag() {
        let json = serde_json::to_value(DispatchOutcome::Duplicate).unwrap();
        assert_eq!(json["outcome"], "duplicate");
    }
}
