/// Party model - normalized counterparties
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A normalized counterparty, unique per `(user_id, normalized_name)`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Party {
    pub id: String,
    pub user_id: String,
    /// Lowercase, punctuation-stripped, whitespace-collapsed
    pub normalized_name: String,
    pub display_name: String,
    pub party_type: PartyType,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartyType {
    Vendor,
    Customer,
    Person,
    Other,
}

impl PartyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vendor => "vendor",
            Self::Customer => "customer",
            Self::Person => "person",
            Self::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "vendor" => Some(Self::Vendor),
            "customer" => Some(Self::Customer),
            "person" => Some(Self::Person),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}
