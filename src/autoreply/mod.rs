//! Keyword auto-reply pipeline.
//!
//! Inbound messages from any platform flow through:
//! 1. Adapter (webhook, widget): normalizes into `InboundMessage`
//! 2. `RuleEvaluator::evaluate()`: pure first-match keyword matching
//! 3. `AutoReplyDispatcher`: toggle check and delayed send

pub mod dispatcher;
pub mod rules;
pub mod types;

pub use dispatcher::{AutoReplyDispatcher, DispatchOutcome};
pub use rules::{Rule, RuleEvaluator, RuleSet};
pub use types::{InboundMessage, MatchResult, RuleBook, Tactic};
