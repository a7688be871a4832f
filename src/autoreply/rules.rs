//! Keyword auto-reply rules and their evaluator.
//!
//! A rule fires when an inbound message comes from one of its platforms and
//! its body contains (or starts with) the rule's search term. Rules are
//! checked in list order and the first one that fires wins.
//!
//! Evaluation is pure: no I/O, no mutation, no errors. Malformed rules are
//! skipped and reported as [`RuleWarning`]s next to the result.

use std::borrow::Cow;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

use crate::autoreply::types::{
    InboundMessage, MatchReason, MatchResult, MatchedRule, RuleWarning, SkipReason,
};

/// Smallest delay (seconds) a reply may be scheduled with.
pub const MIN_DELAY_SECONDS: i64 = 10;

/// How a rule's search term is compared with the message body.
///
/// Stored as plain text. Unrecognized values are kept verbatim so a
/// save/load round trip never loses them; the evaluator skips such rules.
/// Non-text values (null, numbers) load as their JSON text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "serde_json::Value", into = "String")]
pub enum MatchType {
    Includes,
    StartsWith,
    Unknown(String),
}

impl Default for MatchType {
    fn default() -> Self {
        Self::Unknown(String::new())
    }
}

impl From<String> for MatchType {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "includes" => Self::Includes,
            // "starts with" is the spelling older editors saved.
            "starts_with" | "starts with" => Self::StartsWith,
            _ => Self::Unknown(raw),
        }
    }
}

impl From<serde_json::Value> for MatchType {
    fn from(raw: serde_json::Value) -> Self {
        match raw {
            serde_json::Value::String(text) => Self::from(text),
            other => Self::Unknown(other.to_string()),
        }
    }
}

impl From<MatchType> for String {
    fn from(match_type: MatchType) -> Self {
        match match_type {
            MatchType::Includes => "includes".to_string(),
            MatchType::StartsWith => "starts_with".to_string(),
            MatchType::Unknown(raw) => raw,
        }
    }
}

/// One row of an auto-reply table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    #[serde(default, alias = "type")]
    pub match_type: MatchType,
    #[serde(default)]
    pub search_term: String,
    #[serde(default, alias = "message_to_send")]
    pub reply_text: String,
    #[serde(
        default = "default_delay",
        alias = "delay",
        deserialize_with = "deserialize_delay"
    )]
    pub delay_seconds: i64,
    /// Platforms this rule answers on. Empty means every platform.
    #[serde(default)]
    pub platforms: Vec<String>,
}

fn default_delay() -> i64 {
    MIN_DELAY_SECONDS
}

/// Delays arrive as numbers or, from form inputs, numeric strings.
fn deserialize_delay<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawDelay {
        Int(i64),
        Float(f64),
        Text(String),
    }

    Ok(match RawDelay::deserialize(deserializer)? {
        RawDelay::Int(n) => n,
        RawDelay::Float(f) => f as i64,
        // Unparseable text becomes 0 so the evaluator reports it as too short.
        RawDelay::Text(s) => s.trim().parse().unwrap_or(0),
    })
}

impl Rule {
    /// Rule that fires when the body contains `search_term`.
    pub fn includes(search_term: impl Into<String>, reply_text: impl Into<String>) -> Self {
        Self::with_type(MatchType::Includes, search_term, reply_text)
    }

    /// Rule that fires when the body begins with `search_term`.
    pub fn starts_with(search_term: impl Into<String>, reply_text: impl Into<String>) -> Self {
        Self::with_type(MatchType::StartsWith, search_term, reply_text)
    }

    fn with_type(
        match_type: MatchType,
        search_term: impl Into<String>,
        reply_text: impl Into<String>,
    ) -> Self {
        Self {
            match_type,
            search_term: search_term.into(),
            reply_text: reply_text.into(),
            delay_seconds: MIN_DELAY_SECONDS,
            platforms: Vec::new(),
        }
    }

    pub fn with_delay(mut self, delay_seconds: i64) -> Self {
        self.delay_seconds = delay_seconds;
        self
    }

    pub fn with_platforms<I, S>(mut self, platforms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.platforms = platforms.into_iter().map(Into::into).collect();
        self
    }

    /// Whether this rule is scoped to the given platform.
    pub fn applies_to(&self, platform: &str) -> bool {
        self.platforms.is_empty() || self.platforms.iter().any(|p| p == platform)
    }
}

/// Ordered list of rules. Order is the only priority.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl From<Vec<Rule>> for RuleSet {
    fn from(rules: Vec<Rule>) -> Self {
        Self::new(rules)
    }
}

/// Whether text comparison respects letter case.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseSensitivity {
    #[default]
    Sensitive,
    Insensitive,
}

/// What to do with a rule whose delay is under [`MIN_DELAY_SECONDS`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelayPolicy {
    /// Fire anyway, with the delay raised to the minimum.
    #[default]
    Clamp,
    /// Treat the rule as invalid and skip it.
    Reject,
}

/// Evaluator settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvaluatorConfig {
    pub case_sensitivity: CaseSensitivity,
    pub delay_policy: DelayPolicy,
}

/// Stateless first-match-wins rule evaluator.
#[derive(Debug, Clone, Default)]
pub struct RuleEvaluator {
    config: EvaluatorConfig,
}

impl RuleEvaluator {
    pub fn new(config: EvaluatorConfig) -> Self {
        Self { config }
    }

    /// Check `message` against `rule_set` in order and report the first rule that fires.
    pub fn evaluate(&self, rule_set: &RuleSet, message: &InboundMessage) -> MatchResult {
        if rule_set.is_empty() {
            return MatchResult::no_match(MatchReason::EmptyRuleSet, Vec::new());
        }

        let body = self.fold_case(&message.body);
        let mut warnings = Vec::new();

        for (index, rule) in rule_set.rules().iter().enumerate() {
            if !rule.applies_to(&message.platform) {
                continue;
            }

            let reason = match &rule.match_type {
                MatchType::Includes => MatchReason::Includes,
                MatchType::StartsWith => MatchReason::StartsWith,
                MatchType::Unknown(raw) => {
                    warnings.push(RuleWarning::InvalidRuleSkipped {
                        index,
                        reason: SkipReason::UnknownMatchType {
                            match_type: raw.clone(),
                        },
                    });
                    continue;
                }
            };

            if rule.search_term.is_empty() {
                warnings.push(RuleWarning::InvalidRuleSkipped {
                    index,
                    reason: SkipReason::EmptySearchTerm,
                });
                continue;
            }

            let delay_seconds = if rule.delay_seconds >= MIN_DELAY_SECONDS {
                rule.delay_seconds as u64
            } else {
                match self.config.delay_policy {
                    DelayPolicy::Clamp => {
                        warnings.push(RuleWarning::DelayClamped {
                            index,
                            configured: rule.delay_seconds,
                            applied: MIN_DELAY_SECONDS as u64,
                        });
                        MIN_DELAY_SECONDS as u64
                    }
                    DelayPolicy::Reject => {
                        warnings.push(RuleWarning::InvalidRuleSkipped {
                            index,
                            reason: SkipReason::DelayBelowMinimum {
                                delay_seconds: rule.delay_seconds,
                            },
                        });
                        continue;
                    }
                }
            };

            let term = self.fold_case(&rule.search_term);
            let fired = match reason {
                MatchReason::StartsWith => body.starts_with(term.as_ref()),
                _ => body.contains(term.as_ref()),
            };

            if fired {
                debug!(
                    message_id = %message.id,
                    platform = %message.platform,
                    rule_index = index,
                    search_term = %rule.search_term,
                    "Message matched auto-reply rule"
                );
                let matched = MatchedRule {
                    index,
                    rule: rule.clone(),
                    delay_seconds,
                };
                return MatchResult::matched(matched, reason, warnings);
            }

            // A clamp warning only matters for the rule that actually fires.
            if let Some(RuleWarning::DelayClamped { index: i, .. }) = warnings.last()
                && *i == index
            {
                warnings.pop();
            }
        }

        MatchResult::no_match(MatchReason::NoRuleMatched, warnings)
    }

    fn fold_case<'a>(&self, text: &'a str) -> Cow<'a, str> {
        match self.config.case_sensitivity {
            CaseSensitivity::Sensitive => Cow::Borrowed(text),
            CaseSensitivity::Insensitive => Cow::Owned(text.to_lowercase()),
        }
    }
}
