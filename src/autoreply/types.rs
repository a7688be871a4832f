//! Shared types for the auto-reply pipeline.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::autoreply::rules::{MIN_DELAY_SECONDS, MatchType, Rule, RuleSet};
use crate::error::ValidationError;

// ── Inbound message ─────────────────────────────────────────────────

/// Normalized inbound message from any platform.
///
/// Webhook and widget adapters convert their native payloads into this
/// struct before anything is evaluated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Stable provider message id (used for duplicate suppression).
    pub id: String,
    /// Message text. May be empty.
    pub body: String,
    /// Source channel tag: "whatsapp", "wpforms", "webchat", ...
    pub platform: String,
    /// Phone number the reply goes to.
    pub sender_phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    /// Build a message with a generated id, received now.
    pub fn new(
        platform: impl Into<String>,
        sender_phone: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            body: body.into(),
            platform: platform.into(),
            sender_phone: sender_phone.into(),
            sender_name: None,
            received_at: Utc::now(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_sender_name(mut self, name: impl Into<String>) -> Self {
        self.sender_name = Some(name.into());
        self
    }

    pub fn with_received_at(mut self, received_at: DateTime<Utc>) -> Self {
        self.received_at = received_at;
        self
    }
}

// ── Tactics ─────────────────────────────────────────────────────────

/// A named group of rules, edited as one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tactic {
    pub name: String,
    #[serde(default)]
    pub rows: Vec<Rule>,
}

/// Every tactic an account owns, plus which one is live.
///
/// Persisted wholesale: saving replaces the previous document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleBook {
    #[serde(default)]
    pub tactics: Vec<Tactic>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_tactic: Option<String>,
}

impl RuleBook {
    /// Resolve the single ordered rule list that inbound messages are checked against.
    ///
    /// The named active tactic wins; otherwise the first tactic; otherwise nothing.
    pub fn effective_rule_set(&self) -> RuleSet {
        let tactic = match &self.active_tactic {
            Some(name) => self.tactics.iter().find(|t| &t.name == name),
            None => self.tactics.first(),
        };
        tactic
            .map(|t| RuleSet::new(t.rows.clone()))
            .unwrap_or_default()
    }

    /// Input-time checks applied before a rule book is saved.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut seen = std::collections::HashSet::new();
        for tactic in &self.tactics {
            if !seen.insert(tactic.name.as_str()) {
                return Err(ValidationError::DuplicateTactic(tactic.name.clone()));
            }
            for (row, rule) in tactic.rows.iter().enumerate() {
                let reason = if let MatchType::Unknown(raw) = &rule.match_type {
                    Some(format!("unknown match type '{raw}'"))
                } else if rule.search_term.is_empty() {
                    Some("search term is empty".to_string())
                } else if rule.delay_seconds < MIN_DELAY_SECONDS {
                    Some(format!(
                        "delay must be at least {MIN_DELAY_SECONDS} seconds (got {})",
                        rule.delay_seconds
                    ))
                } else {
                    None
                };
                if let Some(reason) = reason {
                    return Err(ValidationError::InvalidRule {
                        tactic: tactic.name.clone(),
                        row,
                        reason,
                    });
                }
            }
        }
        if let Some(active) = &self.active_tactic
            && !seen.contains(active.as_str())
        {
            return Err(ValidationError::UnknownTactic(active.clone()));
        }
        Ok(())
    }
}

// ── Match result ────────────────────────────────────────────────────

/// Why evaluation ended the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchReason {
    /// Body contains the search term.
    Includes,
    /// Body begins with the search term.
    StartsWith,
    /// There were no rules to check.
    EmptyRuleSet,
    /// Rules were checked and none fired.
    NoRuleMatched,
}

/// The rule that fired and the reply it produces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchedRule {
    /// Position of the rule in the evaluated list.
    pub index: usize,
    pub rule: Rule,
    /// Delay to apply before sending, after any clamping.
    pub delay_seconds: u64,
}

impl MatchedRule {
    pub fn reply_text(&self) -> &str {
        &self.rule.reply_text
    }

    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_seconds)
    }
}

/// Why a rule was passed over during evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    UnknownMatchType { match_type: String },
    EmptySearchTerm,
    DelayBelowMinimum { delay_seconds: i64 },
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownMatchType { match_type } => {
                write!(f, "unknown match type '{match_type}'")
            }
            Self::EmptySearchTerm => write!(f, "empty search term"),
            Self::DelayBelowMinimum { delay_seconds } => write!(
                f,
                "delay {delay_seconds}s is below the {MIN_DELAY_SECONDS}s minimum"
            ),
        }
    }
}

/// Data-quality problem found while evaluating. Never aborts evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "warning", rename_all = "snake_case")]
pub enum RuleWarning {
    #[error("rule {index} skipped: {reason}")]
    InvalidRuleSkipped { index: usize, reason: SkipReason },

    #[error("rule {index} delay raised from {configured}s to {applied}s")]
    DelayClamped {
        index: usize,
        configured: i64,
        applied: u64,
    },
}

/// Outcome of evaluating one message against one rule set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchResult {
    pub matched: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule: Option<MatchedRule>,
    pub reason: MatchReason,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<RuleWarning>,
}

impl MatchResult {
    pub(crate) fn matched(rule: MatchedRule, reason: MatchReason, warnings: Vec<RuleWarning>) -> Self {
        Self {
            matched: true,
            rule: Some(rule),
            reason,
            warnings,
        }
    }

    pub(crate) fn no_match(reason: MatchReason, warnings: Vec<RuleWarning>) -> Self {
        Self {
            matched: false,
            rule: None,
            reason,
            warnings,
        }
    }
}
