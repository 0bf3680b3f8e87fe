//! Keyword pre-filter for document classification.
//!
//! A high-confidence keyword hit skips the LLM entirely; anything uncertain
//! falls through to the model.

use crate::models::DocumentType;
use lazy_static::lazy_static;
use regex::Regex;

/// Confidence at or above which the keyword decision is final
pub const KEYWORD_CLASSIFY_THRESHOLD: f64 = 0.8;

struct ClassRule {
    pattern: &'static str,
    document_type: DocumentType,
    confidence: f64,
}

// Ordered by specificity; the first hit wins
const RULES: &[ClassRule] = &[
    ClassRule {
        pattern: r"(?i)\bpurchase\s+order\b|\bP\.?O\.?\s*(number|no\.?|#)",
        document_type: DocumentType::PurchaseOrder,
        confidence: 0.85,
    },
    ClassRule {
        pattern: r"(?i)\bsales\s+order\b",
        document_type: DocumentType::SalesOrder,
        confidence: 0.85,
    },
    ClassRule {
        pattern: r"(?i)\bdelivery\s+note\b|\bpacking\s+(slip|list)\b",
        document_type: DocumentType::DeliveryNote,
        confidence: 0.85,
    },
    ClassRule {
        pattern: r"(?i)\bbank\s+statement\b|\baccount\s+statement\b|\bstatement\s+period\b",
        document_type: DocumentType::BankStatement,
        confidence: 0.85,
    },
    ClassRule {
        pattern: r"(?i)\btax\s+(invoice|document|return)\b|\bform\s+(w-2|1099|1040)\b|\bvat\s+return\b",
        document_type: DocumentType::TaxDocument,
        confidence: 0.82,
    },
    ClassRule {
        pattern: r"(?i)\bquotation\b|\bquote\s*(number|no\.?|#)",
        document_type: DocumentType::Quote,
        confidence: 0.82,
    },
    ClassRule {
        pattern: r"(?i)\binvoice\s*(number|no\.?|#|date)|\binvoice\b",
        document_type: DocumentType::Invoice,
        confidence: 0.85,
    },
    ClassRule {
        pattern: r"(?i)\breceipt\b|\bthank you for your (purchase|payment|order)\b",
        document_type: DocumentType::Receipt,
        confidence: 0.82,
    },
    ClassRule {
        pattern: r"(?i)\bagreement\b|\bcontract\b|\bterms\s+and\s+conditions\b",
        document_type: DocumentType::Contract,
        confidence: 0.8,
    },
];

lazy_static! {
    static ref COMPILED: Vec<(Regex, DocumentType, f64)> = RULES
        .iter()
        .map(|rule| {
            (
                Regex::new(rule.pattern).expect("classifier rule"),
                rule.document_type,
                rule.confidence,
            )
        })
        .collect();
}

/// Classifies by keyword over the first chunk of extracted text.
/// Returns None when no rule clears the confidence threshold.
pub fn keyword_classify(text: &str) -> Option<(DocumentType, f64)> {
    let scan: String = text.chars().take(4000).collect();
    for (regex, document_type, confidence) in COMPILED.iter() {
        if *confidence >= KEYWORD_CLASSIFY_THRESHOLD && regex.is_match(&scan) {
            return Some((*document_type, *confidence));
        }
    }
    None
}
