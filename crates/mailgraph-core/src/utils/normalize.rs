/// Normalization utilities for party names, sender domains, and document
/// file names
use crate::constants::SUPPORTED_DOCUMENT_EXTENSIONS;

/// Normalizes a counterparty name for uniqueness matching
///
/// Lowercase, punctuation stripped, whitespace collapsed. The result is the
/// identity of a Party within a user.
///
/// # Examples
/// ```
/// use mailgraph_core::utils::normalize::normalize_party_name;
///
/// assert_eq!(normalize_party_name("Acme Corp."), "acme corp");
/// assert_eq!(normalize_party_name("  ACME,   Corp  "), "acme corp");
/// ```
pub fn normalize_party_name(name: &str) -> String {
    let lowered = name.to_lowercase();
    let stripped: String = lowered
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect();

    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Extracts the registrable-ish domain of a sender address
///
/// `billing@mail.acme.com` → `acme.com`. Used as a template-cache key axis;
/// a best-effort two-label fold is enough because the key only has to be
/// stable, not exact.
pub fn sender_domain(address: &str) -> Option<String> {
    let domain = address.rsplit('@').next()?.trim().to_lowercase();
    if domain.is_empty() || !domain.contains('.') {
        return None;
    }

    let labels: Vec<&str> = domain.split('.').filter(|l| !l.is_empty()).collect();
    if labels.len() < 2 {
        return None;
    }
    Some(labels[labels.len() - 2..].join("."))
}

/// Lowercased extension, only when it names a document type we process
pub fn document_extension(filename: &str) -> Option<String> {
    let ext = filename.rsplit('.').next()?.to_ascii_lowercase();
    SUPPORTED_DOCUMENT_EXTENSIONS
        .contains(&ext.as_str())
        .then_some(ext)
}

/// File name a document is stored and displayed under, derived from its
/// content identity
///
/// Provider filenames are attacker-controlled, so they contribute nothing
/// but the extension, and only when it is on the supported list. The hash
/// prefix keeps the name stable across re-downloads of the same bytes; the
/// original name stays on the attachment descriptor.
pub fn document_file_name(content_hash: &str, original_filename: &str) -> String {
    let prefix: String = content_hash.chars().take(12).collect();
    match document_extension(original_filename) {
        Some(ext) => format!("{}.{}", prefix, ext),
        None => prefix,
    }
}

/// Whether a filename or declared content type is on the blocklist
pub fn is_blocked_attachment(filename: &str, content_type: &str) -> bool {
    let ct = content_type.to_ascii_lowercase();
    if crate::constants::BLOCKED_CONTENT_TYPES.contains(&ct.as_str()) {
        return true;
    }
    if let Some(ext) = filename.rsplit('.').next() {
        if crate::constants::BLOCKED_FILE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()) {
            return true;
        }
    }
    false
}

/// Ratio of printable (non-control, non-replacement) characters in text
pub fn printable_ratio(text: &str) -> f64 {
    if text.is_empty() {
        return 0.0;
    }
    let total = text.chars().count();
    let printable = text
        .chars()
        .filter(|c| !c.is_control() && *c != '\u{FFFD}')
        .count();
    printable as f64 / total as f64
}
