//! Lead capture: form plugins post contact details for an account.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Source tag used when the webhook URL does not name one.
pub const DEFAULT_LEAD_SOURCE: &str = "other";

/// Raw body posted by a lead form.
///
/// Different form plugins name the contact field differently, so both
/// `name` and `your_name` are accepted.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LeadSubmission {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub your_name: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
}

impl LeadSubmission {
    /// Normalize into a lead tagged with `source`.
    pub fn into_lead(self, source: Option<&str>) -> Result<NewLead, ValidationError> {
        let phone_number = self
            .phone_number
            .as_deref()
            .map(normalize_phone)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| ValidationError::MissingFields("phone_number".into()))?;

        let name = self
            .name
            .filter(|n| !n.trim().is_empty())
            .or(self.your_name)
            .map(|n| n.trim().to_string())
            .unwrap_or_default();

        let source = source
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_LEAD_SOURCE)
            .to_string();

        Ok(NewLead {
            name,
            phone_number,
            source,
        })
    }
}

/// A lead ready to be stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLead {
    pub name: String,
    pub phone_number: String,
    pub source: String,
}

/// A stored lead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lead {
    pub name: String,
    pub phone_number: String,
    pub source: String,
    pub created_at: DateTime<Utc>,
}

/// Strip formatting characters so the same number always dedupes to one lead.
pub fn normalize_phone(raw: &str) -> String {
    let trimmed = raw.trim();
    let mut out = String::with_capacity(trimmed.len());
    for (i, c) in trimmed.chars().enumerate() {
        if c.is_ascii_digit() || (i == 0 && c == '+') {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_either_name_field() {
        let lead = LeadSubmission {
            name: None,
            your_name: Some("Dana".into()),
            phone_number: Some("+1 555 010 9999".into()),
        }
        .into_lead(Some("wpforms"))
        .unwrap();
        assert_eq!(lead.name, "Dana");
        assert_eq!(lead.phone_number, "+15550109999");
        assert_eq!(lead.source, "wpforms");
    }

    #[test]
    fn name_wins_over_your_name() {
        let lead = LeadSubmission {
            name: Some("Ari".into()),
            your_name: Some("Dana".into()),
            phone_number: Some("5550100".into()),
        }
        .into_lead(None)
        .unwrap();
        assert_eq!(lead.name, "Ari");
    }

    #[test]
    fn source_defaults_to_other() {
        let lead = LeadSubmission {
            phone_number: Some("5550100".into()),
            ..Default::default()
        }
        .into_lead(Some("  "))
        .unwrap();
        assert_eq!(lead.source, DEFAULT_LEAD_SOURCE);
        assert_eq!(lead.name, "");
    }

    #[test]
    fn phone_is_required() {
        let err = LeadSubmission {
            name: Some("Ari".into()),
            phone_number: Some(" - ".into()),
            ..Default::default()
        }
        .into_lead(None)
        .unwrap_err();
        assert_eq!(err, ValidationError::MissingFields("phone_number".into()));
    }

    #[test]
    fn normalize_phone_keeps_leading_plus_only() {
        assert_eq!(normalize_phone("(555) 010-2000"), "5550102000");
        assert_eq!(normalize_phone("+44 20 7946 0000"), "+442079460000");
        assert_eq!(normalize_phone("1+2"), "12");
    }
}
