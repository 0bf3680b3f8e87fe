//! Field coercion helpers shared by the template cache and the LLM field
//! extractor. LLM output is treated as hostile: every value is re-parsed
//! into the typed shape before it can reach the store.

use crate::models::{ExtractedFields, LineItem};
use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;
use rust_decimal::Decimal;
use std::str::FromStr;

lazy_static! {
    static ref AMOUNT_CLEAN_RE: Regex = Regex::new(r"[^0-9.\-]").unwrap();
    static ref CURRENCY_CODE_RE: Regex = Regex::new(r"^[A-Z]{3}$").unwrap();
}

/// Parses a money string: `$1,234.56`, `1.234,56 €`, `USD 99.00`
pub fn parse_amount(raw: &str) -> Option<Decimal> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    // European decimal comma: exactly one comma, no dot after it
    let normalized = if trimmed.matches(',').count() == 1
        && !trimmed[trimmed.find(',').unwrap()..].contains('.')
        && trimmed[trimmed.find(',').unwrap() + 1..]
            .chars()
            .filter(|c| c.is_ascii_digit())
            .count()
            == 2
    {
        trimmed.replace('.', "").replace(',', ".")
    } else {
        trimmed.replace(',', "")
    };

    let cleaned = AMOUNT_CLEAN_RE.replace_all(&normalized, "");
    if cleaned.is_empty() {
        return None;
    }
    Decimal::from_str(&cleaned).ok()
}

/// Parses the date spellings that actually show up on business documents
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    for format in [
        "%Y-%m-%d", "%m/%d/%Y", "%d/%m/%Y", "%m/%d/%y", "%d %b %Y", "%d %B %Y", "%b %d, %Y",
        "%B %d, %Y", "%Y/%m/%d", "%d.%m.%Y",
    ] {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            return Some(date);
        }
    }
    None
}

/// Detects an ISO-4217 code; anything else falls back to the caller default
pub fn parse_currency(raw: &str) -> Option<String> {
    let upper = raw.trim().to_uppercase();
    if CURRENCY_CODE_RE.is_match(&upper) {
        return Some(upper);
    }
    match upper.as_str() {
        "$" | "US$" => Some("USD".to_string()),
        "€" => Some("EUR".to_string()),
        "£" => Some("GBP".to_string()),
        _ => None,
    }
}

fn value_to_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn value_to_amount(value: &serde_json::Value) -> Option<Decimal> {
    match value {
        serde_json::Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        serde_json::Value::String(s) => parse_amount(s),
        _ => None,
    }
}

/// Maps the LLM field-extraction response into the typed shape.
///
/// Unknown keys land in `extra` so an unusual document loses nothing, but
/// no control flow ever reads them.
pub fn fields_from_llm_json(value: &serde_json::Value) -> ExtractedFields {
    let mut fields = ExtractedFields::default();
    let Some(object) = value.as_object() else {
        return fields;
    };

    for (key, field_value) in object {
        match key.as_str() {
            "vendor_name" => fields.vendor_name = value_to_string(field_value),
            "invoice_number" => fields.invoice_number = value_to_string(field_value),
            "issue_date" => {
                fields.issue_date = value_to_string(field_value).and_then(|s| parse_date(&s))
            }
            "due_date" => {
                fields.due_date = value_to_string(field_value).and_then(|s| parse_date(&s))
            }
            "total_amount" => fields.total_amount = value_to_amount(field_value),
            "currency" => {
                fields.currency = value_to_string(field_value).and_then(|s| parse_currency(&s))
            }
            "line_items" => {
                if let Some(items) = field_value.as_array() {
                    fields.line_items = items.iter().filter_map(line_item_from_json).collect();
                }
            }
            _ => {
                if !field_value.is_null() {
                    fields.extra.insert(key.clone(), field_value.clone());
                }
            }
        }
    }

    fields
}

fn line_item_from_json(value: &serde_json::Value) -> Option<LineItem> {
    let object = value.as_object()?;
    let description = object.get("description").and_then(value_to_string)?;
    Some(LineItem {
        description,
        quantity: object.get("quantity").and_then(value_to_amount),
        unit_price: object.get("unit_price").and_then(value_to_amount),
        amount: object.get("amount").and_then(value_to_amount),
    })
}
