//! Broadcast campaigns: a message queued for a list of leads.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

/// Campaigns are always scheduled in UTC.
pub const CAMPAIGN_TIME_ZONE: &str = "GMT+00:00";

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// One recipient of a campaign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignRecipient {
    #[serde(default)]
    pub name: String,
    pub phone_number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Body of a create-campaign request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewCampaignRequest {
    #[serde(default, alias = "campaignName")]
    pub campaign_name: Option<String>,
    #[serde(default, alias = "fromNumber")]
    pub from_number: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub leads: Vec<CampaignRecipient>,
    #[serde(default, alias = "mediaURL")]
    pub media_url: Option<String>,
    #[serde(default, alias = "campaignId")]
    pub campaign_id: Option<String>,
}

/// A stored campaign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Campaign {
    pub campaign_id: String,
    pub campaign_name: String,
    pub from_number: String,
    pub message: String,
    pub leads: Vec<CampaignRecipient>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    pub time_zone: String,
    pub schedule_time: DateTime<Utc>,
    pub completed: bool,
}

impl NewCampaignRequest {
    /// Validate and turn the request into a campaign scheduled for `now`.
    pub fn into_campaign(self, now: DateTime<Utc>) -> Result<Campaign, ValidationError> {
        let required = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
        let campaign_name = required(self.campaign_name);
        let from_number = required(self.from_number);
        let message = required(self.message);

        let (Some(campaign_name), Some(from_number), Some(message)) =
            (campaign_name, from_number, message)
        else {
            return Err(ValidationError::MissingFields(
                "campaign_name, from_number, message".into(),
            ));
        };

        let campaign_id = self
            .campaign_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| derive_campaign_id(&campaign_name, Uuid::new_v4()));

        Ok(Campaign {
            campaign_id,
            campaign_name,
            from_number,
            message,
            leads: self.leads,
            media_url: self.media_url.filter(|u| !u.is_empty()),
            time_zone: CAMPAIGN_TIME_ZONE.to_string(),
            schedule_time: now,
            completed: false,
        })
    }
}

/// `"Spring Sale"` + uuid ending in `…a1b2` → `"spring-sale-a1b2"`.
pub fn derive_campaign_id(campaign_name: &str, suffix_source: Uuid) -> String {
    let slug = WHITESPACE.replace_all(&campaign_name.to_lowercase(), "-").into_owned();
    let hex = suffix_source.simple().to_string();
    format!("{slug}-{}", &hex[hex.len() - 4..])
}
