//! Stage 1 deterministic keyword gate.
//!
//! Two disjoint token sets over (subject ∥ first 2 KB of body). Alphabetic
//! tokens match whole words, case-insensitive; glyph and phrase tokens match
//! as substrings. When both sets hit, the gate is inconclusive and the
//! message goes to the LLM adjudicator - a message is never silently
//! dropped.

use lazy_static::lazy_static;
use regex::Regex;

const POSITIVE_WORDS: &[&str] = &[
    "invoice",
    "receipt",
    "payment",
    "bill",
    "statement",
    "transaction",
    "paid",
    "due",
    "amount",
    "total",
    "purchase",
    "order",
    "quote",
    "contract",
    "refund",
    "charge",
    "subscription",
    "renewal",
    "expense",
    "USD",
    "EUR",
    "GBP",
    "price",
    "cost",
];

const POSITIVE_GLYPHS: &[&str] = &["$", "€", "£"];

const NEGATIVE_WORDS: &[&str] = &["unsubscribe", "congratulations"];

const NEGATIVE_PHRASES: &[&str] = &[
    "click here",
    "limited time offer",
    "act now",
    "you won",
    "free gift",
    "claim now",
];

lazy_static! {
    static ref POSITIVE_RES: Vec<(String, Regex)> = compile_word_set(POSITIVE_WORDS);
    static ref NEGATIVE_RES: Vec<(String, Regex)> = {
        let mut set = compile_word_set(NEGATIVE_WORDS);
        set.extend(compile_word_set(NEGATIVE_PHRASES));
        set
    };
}

fn compile_word_set(tokens: &[&str]) -> Vec<(String, Regex)> {
    tokens
        .iter()
        .map(|token| {
            let pattern = format!(r"(?i)\b{}\b", regex::escape(token));
            (token.to_string(), Regex::new(&pattern).expect("keyword regex"))
        })
        .collect()
}

/// First matching token from a set, glyphs checked as plain substrings
fn find_token(text: &str, words: &[(String, Regex)], glyphs: &[&str]) -> Option<String> {
    for (token, regex) in words {
        if regex.is_match(text) {
            return Some(token.clone());
        }
    }
    for glyph in glyphs {
        if text.contains(glyph) {
            return Some((*glyph).to_string());
        }
    }
    None
}

#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    /// Positive token present, negative set silent
    Qualified { token: String, in_subject: bool },
    /// Negative token present, positive set silent
    Rejected { token: String, in_subject: bool },
    /// Neither set fired, or both did
    Inconclusive,
}

pub fn keyword_gate(subject: &str, body_prefix: &str) -> GateDecision {
    let positive_subject = find_token(subject, &POSITIVE_RES, POSITIVE_GLYPHS);
    let positive_body = find_token(body_prefix, &POSITIVE_RES, POSITIVE_GLYPHS);
    let negative_subject = find_token(subject, &NEGATIVE_RES, &[]);
    let negative_body = find_token(body_prefix, &NEGATIVE_RES, &[]);

    let any_positive = positive_subject.is_some() || positive_body.is_some();
    let any_negative = negative_subject.is_some() || negative_body.is_some();

    match (any_positive, any_negative) {
        (true, false) => match positive_subject {
            Some(token) => GateDecision::Qualified {
                token,
                in_subject: true,
            },
            None => GateDecision::Qualified {
                token: positive_body.expect("positive body token"),
                in_subject: false,
            },
        },
        (false, true) => match negative_subject {
            Some(token) => GateDecision::Rejected {
                token,
                in_subject: true,
            },
            None => GateDecision::Rejected {
                token: negative_body.expect("negative body token"),
                in_subject: false,
            },
        },
        _ => GateDecision::Inconclusive,
    }
}
