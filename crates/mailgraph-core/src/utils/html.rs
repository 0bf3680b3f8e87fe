/// HTML-to-text conversion for message bodies
///
/// Providers sometimes deliver only a text/html part. The qualification gate
/// and the LLM adjudicator both operate on plain text, so tags are stripped
/// and entities decoded before the body is persisted.
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref TAG_RE: Regex = Regex::new(r"(?s)<[^>]*>").unwrap();
    static ref BLOCK_BREAK_RE: Regex =
        Regex::new(r"(?i)</(p|div|tr|li|h[1-6]|table)>|<br\s*/?>").unwrap();
    static ref SCRIPT_STYLE_RE: Regex =
        Regex::new(r"(?is)<(script|style|head)\b.*?</(script|style|head)>").unwrap();
    static ref WHITESPACE_RE: Regex = Regex::new(r"[ \t\x0b\f\r]+").unwrap();
    static ref BLANK_LINES_RE: Regex = Regex::new(r"\n{3,}").unwrap();
}

/// Strips an HTML body down to readable plain text
///
/// Runs ammonia first so malformed or hostile markup is normalized before
/// the tag stripper sees it, then drops tags, decodes common entities, and
/// collapses whitespace.
pub fn html_to_text(html: &str) -> String {
    let cleaned = ammonia::clean(html);
    let without_hidden = SCRIPT_STYLE_RE.replace_all(&cleaned, " ");
    let with_breaks = BLOCK_BREAK_RE.replace_all(&without_hidden, "\n");
    let without_tags = TAG_RE.replace_all(&with_breaks, " ");
    let decoded = decode_entities(&without_tags);
    let collapsed = WHITESPACE_RE.replace_all(&decoded, " ");

    let trimmed_lines: Vec<&str> = collapsed.lines().map(str::trim).collect();
    let joined = trimmed_lines.join("\n");
    BLANK_LINES_RE.replace_all(&joined, "\n\n").trim().to_string()
}

/// Decodes the entities that actually occur in commercial email bodies
fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&#36;", "$")
        .replace("&euro;", "€")
        .replace("&pound;", "£")
        .replace("&dollar;", "$")
}

/// First N characters of a body, used for snippets
pub fn snippet(text: &str, max_chars: usize) -> String {
    let mut out: String = text.chars().take(max_chars).collect();
    if text.chars().count() > max_chars {
        out.push('…');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_tags_and_decodes_entities() {
        let html = "<p>Total due: &#36;42.00</p><p>Thanks &amp; regards</p>";
        let text = html_to_text(html);
        assert!(text.contains("Total due: $42.00"));
        assert!(text.contains("Thanks & regards"));
        assert!(!text.contains('<'));
    }

    #[test]
    fn test_block_elements_become_line_breaks() {
        let html = "<div>Invoice #42</div><div>Amount: $10</div>";
        let text = html_to_text(html);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "Invoice #42");
    }

    #[test]
    fn test_script_content_removed() {
        let html = "<script>alert('x')</script><p>Receipt</p>";
        let text = html_to_text(html);
        assert!(!text.contains("alert"));
        assert!(text.contains("Receipt"));
    }

    #[test]
    fn test_snippet_truncation() {
        assert_eq!(snippet("short", 10), "short");
        let long = "a".repeat(20);
        let s = snippet(&long, 10);
        assert!(s.starts_with("aaaaaaaaaa"));
        assert!(s.ends_with('…'));
    }
}
