/// Transaction model - atomic financial facts extracted from documents
use crate::models::document::LineItem;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An atomic financial fact owned by a Document. Keyed by
/// `(document_id, row_index)`; re-extraction replaces a document's rows
/// atomically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub user_id: String,
    pub document_id: String,
    /// Weak reference; the party may be merged later
    pub party_id: Option<String>,
    pub row_index: i64,
    pub amount: Decimal,
    /// ISO-4217 code; USD when the document does not specify one
    pub currency: String,
    pub transaction_date: Option<NaiveDate>,
    pub kind: TransactionKind,
    #[serde(default)]
    pub line_items: Vec<LineItem>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Invoice,
    Receipt,
    Payment,
    Charge,
    Refund,
    Other,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Invoice => "invoice",
            Self::Receipt => "receipt",
            Self::Payment => "payment",
            Self::Charge => "charge",
            Self::Refund => "refund",
            Self::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "invoice" => Some(Self::Invoice),
            "receipt" => Some(Self::Receipt),
            "payment" => Some(Self::Payment),
            "charge" => Some(Self::Charge),
            "refund" => Some(Self::Refund),
            "other" => Some(Self::Other),
            _ => None,
        }
    }

    /// Document types map onto transaction kinds where the mapping is direct
    pub fn from_document_type(doc_type: crate::models::DocumentType) -> Self {
        use crate::models::DocumentType;
        match doc_type {
            DocumentType::Invoice => Self::Invoice,
            DocumentType::Receipt => Self::Receipt,
            DocumentType::BankStatement => Self::Charge,
            _ => Self::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DocumentType;
    use std::str::FromStr;

    #[test]
    fn test_kind_round_trip() {
        for kind in [
            TransactionKind::Invoice,
            TransactionKind::Receipt,
            TransactionKind::Payment,
            TransactionKind::Charge,
            TransactionKind::Refund,
            TransactionKind::Other,
        ] {
            assert_eq!(TransactionKind::parse(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn test_kind_from_document_type() {
        assert_eq!(
            TransactionKind::from_document_type(DocumentType::Invoice),
            TransactionKind::Invoice
        );
        assert_eq!(
            TransactionKind::from_document_type(DocumentType::Contract),
            TransactionKind::Other
        );
    }

    #[test]
    fn test_amount_scale_preserved_in_serde() {
        let tx = Transaction {
            id: "tx-1".to_string(),
            user_id: "user-1".to_string(),
            document_id: "doc-1".to_string(),
            party_id: None,
            row_index: 0,
            amount: Decimal::from_str("1234.50").unwrap(),
            currency: "USD".to_string(),
            transaction_date: None,
            kind: TransactionKind::Invoice,
            line_items: vec![],
            metadata: BTreeMap::new(),
            created_at: Utc::now(),
        };
        let json = serde_json::to_string(&tx).unwrap();
        assert!(json.contains("1234.50"));
    }
}
