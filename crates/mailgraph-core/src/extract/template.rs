//! Template cache - reusable extraction recipes per
//! (user, sender domain, document type, layout fingerprint).
//!
//! A recipe is a set of anchored regex rules synthesized from a successful
//! LLM extraction. Applying a recipe is free; the LLM only runs again when
//! a vendor changes their layout enough to break the rules.

use crate::constants::{TEMPLATE_MAX_CONSECUTIVE_FAILURES, TEMPLATE_MIN_CONFIDENCE};
use crate::error::MailgraphError;
use crate::extract::fields::{parse_amount, parse_currency, parse_date};
use crate::models::{DocumentType, ExtractedFields};
use crate::store::GraphStore;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::Row;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TemplateKey {
    pub user_id: String,
    pub sender_domain: String,
    pub document_type: DocumentType,
    pub layout_fingerprint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateRecipe {
    pub rules: Vec<FieldRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldRule {
    /// One of the named extraction fields
    pub field: String,
    /// Regex with exactly one capture group for the value
    pub pattern: String,
}

/// Stable hash of the token shapes on the first page. Literal digits are
/// folded so two invoices from the same vendor fingerprint identically even
/// though every number differs.
pub fn layout_fingerprint(text: &str) -> String {
    let mut shape = String::new();
    for (line_index, line) in text.lines().take(40).enumerate() {
        shape.push_str(&line_index.to_string());
        shape.push(':');
        for token in line.split_whitespace().take(12) {
            for c in token.chars().take(12) {
                shape.push(if c.is_ascii_digit() {
                    '9'
                } else if c.is_alphabetic() {
                    'a'
                } else {
                    c
                });
            }
            shape.push(' ');
        }
        shape.push('\n');
    }

    let mut hasher = Sha256::new();
    hasher.update(shape.as_bytes());
    hex::encode(hasher.finalize())[..16].to_string()
}

/// Applies a recipe to extracted text. Confidence is the fraction of rules
/// that produced a usable value.
pub fn apply_template(recipe: &TemplateRecipe, text: &str) -> (ExtractedFields, f64) {
    let mut fields = ExtractedFields::default();
    if recipe.rules.is_empty() {
        return (fields, 0.0);
    }

    let mut matched = 0usize;
    for rule in &recipe.rules {
        let Ok(re) = regex::Regex::new(&rule.pattern) else {
            continue;
        };
        let Some(captures) = re.captures(text) else {
            continue;
        };
        let Some(value) = captures.get(1).map(|m| m.as_str().trim().to_string()) else {
            continue;
        };
        if value.is_empty() {
            continue;
        }

        let accepted = match rule.field.as_str() {
            "total_amount" => {
                fields.total_amount = parse_amount(&value);
                fields.total_amount.is_some()
            }
            "invoice_number" => {
                fields.invoice_number = Some(value);
                true
            }
            "issue_date" => {
                fields.issue_date = parse_date(&value);
                fields.issue_date.is_some()
            }
            "due_date" => {
                fields.due_date = parse_date(&value);
                fields.due_date.is_some()
            }
            "vendor_name" => {
                fields.vendor_name = Some(value);
                true
            }
            "currency" => {
                fields.currency = parse_currency(&value);
                fields.currency.is_some()
            }
            _ => false,
        };
        if accepted {
            matched += 1;
        }
    }

    let confidence = matched as f64 / recipe.rules.len() as f64;
    (fields, confidence)
}

/// Best-effort synthesis of a recipe from an LLM extraction and the text it
/// came from. Returns None when too few fields can be anchored to stable
/// line prefixes.
pub fn synthesize_template(fields: &ExtractedFields, text: &str) -> Option<TemplateRecipe> {
    let mut rules = Vec::new();

    if let Some(amount) = &fields.total_amount {
        for spelled in amount_spellings(amount) {
            if let Some(pattern) = anchor_pattern(text, &spelled, r"\$?([0-9][0-9,]*\.?[0-9]*)") {
                rules.push(FieldRule {
                    field: "total_amount".to_string(),
                    pattern,
                });
                break;
            }
        }
    }

    if let Some(number) = &fields.invoice_number {
        if let Some(pattern) = anchor_pattern(text, number, r"#?\s*([A-Za-z0-9][A-Za-z0-9/-]*)") {
            rules.push(FieldRule {
                field: "invoice_number".to_string(),
                pattern,
            });
        }
    }

    if let Some(vendor) = &fields.vendor_name {
        if text.contains(vendor.as_str()) {
            rules.push(FieldRule {
                field: "vendor_name".to_string(),
                pattern: format!("({})", regex::escape(vendor)),
            });
        }
    }

    if let Some(date) = &fields.issue_date {
        for spelled in date_spellings(date) {
            if let Some(pattern) = anchor_pattern(
                text,
                &spelled,
                r"([0-9]{1,4}[-/. ][A-Za-z0-9]{1,9}[-/. ][0-9]{1,4})",
            ) {
                rules.push(FieldRule {
                    field: "issue_date".to_string(),
                    pattern,
                });
                break;
            }
        }
    }

    // A one-rule template is all risk and no savings
    if rules.len() < 2 {
        debug!(rules = rules.len(), "Too few anchors, not synthesizing template");
        return None;
    }
    Some(TemplateRecipe { rules })
}

/// Finds the line holding `value` and anchors a capture pattern to the text
/// preceding it on that line
fn anchor_pattern(text: &str, value: &str, capture: &str) -> Option<String> {
    for line in text.lines() {
        if let Some(position) = line.find(value) {
            let prefix = line[..position].trim_end();
            if prefix.is_empty() {
                continue;
            }
            // The prefix without trailing digits is the stable anchor
            let anchor: String = prefix
                .trim_end_matches(|c: char| c.is_ascii_digit() || c == '#')
                .to_string();
            if anchor.trim().len() < 3 {
                continue;
            }
            return Some(format!(r"{}\s*{}", regex::escape(anchor.trim()), capture));
        }
    }
    None
}

/// Documents print amounts with thousands separators; the typed value does
/// not carry them
fn amount_spellings(amount: &rust_decimal::Decimal) -> Vec<String> {
    let plain = amount.to_string();
    let mut spellings = vec![plain.clone()];

    let (int_part, frac_part) = match plain.split_once('.') {
        Some((i, f)) => (i.to_string(), Some(f.to_string())),
        None => (plain, None),
    };
    if int_part.len() > 3 && !int_part.starts_with('-') {
        let chars: Vec<char> = int_part.chars().collect();
        let mut grouped = String::new();
        for (i, c) in chars.iter().enumerate() {
            if i > 0 && (chars.len() - i) % 3 == 0 {
                grouped.push(',');
            }
            grouped.push(*c);
        }
        spellings.push(match &frac_part {
            Some(f) => format!("{}.{}", grouped, f),
            None => grouped,
        });
    }
    spellings
}

fn date_spellings(date: &chrono::NaiveDate) -> Vec<String> {
    vec![
        date.format("%Y-%m-%d").to_string(),
        date.format("%m/%d/%Y").to_string(),
        date.format("%d %b %Y").to_string(),
        date.format("%B %-d, %Y").to_string(),
    ]
}

/// sqlx-backed cache with idle-expiry and failure-driven invalidation
pub struct TemplateCache {
    store: GraphStore,
    ttl_days: u32,
}

impl TemplateCache {
    pub fn new(store: GraphStore, ttl_days: u32) -> Self {
        Self { store, ttl_days }
    }

    pub async fn lookup(&self, key: &TemplateKey) -> Result<Option<TemplateRecipe>, MailgraphError> {
        let cutoff = Utc::now() - Duration::days(self.ttl_days as i64);
        let row = sqlx::query(
            "SELECT recipe, last_used_at FROM templates
             WHERE user_id = ? AND sender_domain = ? AND document_type = ?
               AND layout_fingerprint = ?",
        )
        .bind(&key.user_id)
        .bind(&key.sender_domain)
        .bind(key.document_type.as_str())
        .bind(&key.layout_fingerprint)
        .fetch_optional(self.store.pool())
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let last_used_at: chrono::DateTime<Utc> = row.try_get("last_used_at")?;
        if last_used_at < cutoff {
            debug!(fingerprint = %key.layout_fingerprint, "Template expired, dropping");
            self.invalidate(key).await?;
            return Ok(None);
        }

        let recipe: TemplateRecipe = serde_json::from_str(&row.try_get::<String, _>("recipe")?)?;
        Ok(Some(recipe))
    }

    pub async fn store(
        &self,
        key: &TemplateKey,
        recipe: &TemplateRecipe,
    ) -> Result<(), MailgraphError> {
        sqlx::query(
            "INSERT INTO templates (user_id, sender_domain, document_type, layout_fingerprint,
                                    recipe, consecutive_failures, last_used_at, created_at)
             VALUES (?, ?, ?, ?, ?, 0, ?, ?)
             ON CONFLICT (user_id, sender_domain, document_type, layout_fingerprint)
             DO UPDATE SET recipe = excluded.recipe, consecutive_failures = 0,
                           last_used_at = excluded.last_used_at",
        )
        .bind(&key.user_id)
        .bind(&key.sender_domain)
        .bind(key.document_type.as_str())
        .bind(&key.layout_fingerprint)
        .bind(serde_json::to_string(recipe)?)
        .bind(Utc::now())
        .bind(Utc::now())
        .execute(self.store.pool())
        .await?;

        info!(
            domain = %key.sender_domain,
            document_type = %key.document_type.as_str(),
            fingerprint = %key.layout_fingerprint,
            "Stored extraction template"
        );
        Ok(())
    }

    pub async fn invalidate(&self, key: &TemplateKey) -> Result<(), MailgraphError> {
        sqlx::query(
            "DELETE FROM templates
             WHERE user_id = ? AND sender_domain = ? AND document_type = ?
               AND layout_fingerprint = ?",
        )
        .bind(&key.user_id)
        .bind(&key.sender_domain)
        .bind(key.document_type.as_str())
        .bind(&key.layout_fingerprint)
        .execute(self.store.pool())
        .await?;
        Ok(())
    }

    /// Marks a verification success, refreshing the idle clock
    pub async fn record_success(&self, key: &TemplateKey) -> Result<(), MailgraphError> {
        sqlx::query(
            "UPDATE templates SET consecutive_failures = 0, last_used_at = ?
             WHERE user_id = ? AND sender_domain = ? AND document_type = ?
               AND layout_fingerprint = ?",
        )
        .bind(Utc::now())
        .bind(&key.user_id)
        .bind(&key.sender_domain)
        .bind(key.document_type.as_str())
        .bind(&key.layout_fingerprint)
        .execute(self.store.pool())
        .await?;
        Ok(())
    }

    /// Marks a verification failure; three in a row invalidates
    pub async fn record_failure(&self, key: &TemplateKey) -> Result<(), MailgraphError> {
        sqlx::query(
            "UPDATE templates SET consecutive_failures = consecutive_failures + 1
             WHERE user_id = ? AND sender_domain = ? AND document_type = ?
               AND layout_fingerprint = ?",
        )
        .bind(&key.user_id)
        .bind(&key.sender_domain)
        .bind(key.document_type.as_str())
        .bind(&key.layout_fingerprint)
        .execute(self.store.pool())
        .await?;

        sqlx::query(
            "DELETE FROM templates
             WHERE user_id = ? AND sender_domain = ? AND document_type = ?
               AND layout_fingerprint = ? AND consecutive_failures >= ?",
        )
        .bind(&key.user_id)
        .bind(&key.sender_domain)
        .bind(key.document_type.as_str())
        .bind(&key.layout_fingerprint)
        .bind(TEMPLATE_MAX_CONSECUTIVE_FAILURES)
        .execute(self.store.pool())
        .await?;
        Ok(())
    }

    /// Maintenance sweep run from the `default` lane
    pub async fn sweep_expired(&self) -> Result<u64, MailgraphError> {
        let cutoff = Utc::now() - Duration::days(self.ttl_days as i64);
        let result = sqlx::query("DELETE FROM templates WHERE last_used_at < ?")
            .bind(cutoff)
            .execute(self.store.pool())
            .await?;
        Ok(result.rows_affected())
    }
}

/// Whether a template application is trustworthy enough to skip the LLM
pub fn verify_application(fields: &ExtractedFields, confidence: f64) -> bool {
    confidence >= TEMPLATE_MIN_CONFIDENCE && fields.has_required_fields()
}
