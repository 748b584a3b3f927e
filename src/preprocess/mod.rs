//! Preprocessor & Token Budgeting (C8).
//!
//! A pure transformation from `(subject, body)` to `(cleaned_text, stats)`: strip
//! markup, remove signatures and quoted reply chains, mask PII, estimate tokens,
//! and truncate when over budget. No I/O happens in this module — it is a
//! deliberately dependency-free pipeline so it stays directly unit-testable.

pub mod tokens;

use regex::Regex;
use std::sync::LazyLock;

/// Configuration the pipeline is parameterized over, sourced from [`crate::config::AppConfig`].
#[derive(Debug, Clone, Copy)]
pub struct PreprocessConfig {
    pub strip_reply_chains: bool,
}

/// Counts of redactions/removals performed by the pipeline, returned alongside
/// the cleaned text so callers (and tests) can assert on what happened.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreprocessStats {
    pub emails_masked: usize,
    pub phones_masked: usize,
    pub urls_masked: usize,
    pub signature_removed: bool,
    pub reply_chain_removed: bool,
    pub original_len: usize,
    pub cleaned_len: usize,
}

/// Run the full pipeline over one email's subject and body.
pub fn preprocess(subject: &str, body: &str, is_html: bool, cfg: PreprocessConfig) -> (String, PreprocessStats) {
    let original_len = body.chars().count();
    let mut stats = PreprocessStats {
        original_len,
        ..Default::default()
    };

    let mut text = if is_html {
        strip_markup(body)
    } else {
        body.to_string()
    };

    let (after_sig, sig_removed) = remove_signature(&text);
    text = after_sig;
    stats.signature_removed = sig_removed;

    if cfg.strip_reply_chains {
        let (after_reply, reply_removed) = remove_reply_chain(&text);
        text = after_reply;
        stats.reply_chain_removed = reply_removed;
    }

    text = normalize_whitespace(&text);

    let (masked, mask_counts) = mask_pii(&text);
    text = masked;
    stats.emails_masked = mask_counts.0;
    stats.phones_masked = mask_counts.1;
    stats.urls_masked = mask_counts.2;

    let _ = subject; // subject is consulted by callers for the prompt, not transformed here
    stats.cleaned_len = text.chars().count();

    (text, stats)
}

/// Reduce an HTML body to plain text with whitespace collapsed, per step 1.
fn strip_markup(body: &str) -> String {
    html2text::from_read(body.as_bytes(), usize::MAX).unwrap_or_else(|_| body.to_string())
}

static SIGNATURE_DELIMITER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^-- \s*$").unwrap());

static SIGNATURE_CLOSING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^(best( regards)?|regards|thanks( a lot)?|sincerely|cheers|kind regards),?\s*$")
        .unwrap()
});

/// Heuristic trailing-signature removal (step 2): a conventional `-- ` delimiter
/// line wins outright; otherwise a closing pleasantry on its own line followed
/// by little else is treated as the start of a signature block.
fn remove_signature(text: &str) -> (String, bool) {
    if let Some(m) = SIGNATURE_DELIMITER.find(text) {
        return (text[..m.start()].trim_end().to_string(), true);
    }

    let lines: Vec<&str> = text.lines().collect();
    for (idx, line) in lines.iter().enumerate() {
        if SIGNATURE_CLOSING.is_match(line) {
            let remainder_lines = lines.len() - idx - 1;
            // Only treat this as a signature boundary if what follows is short —
            // a long remainder is more likely a false-positive mid-body match.
            if remainder_lines > 0 && remainder_lines <= 4 {
                let kept = lines[..idx].join("\n");
                return (kept.trim_end().to_string(), true);
            }
        }
    }

    (text.to_string(), false)
}

static QUOTE_PREAMBLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^on .+ wrote:\s*$").unwrap()
});

/// Heuristic quoted-reply removal (step 3): find the first line matching an
/// "On ... wrote:" preamble, or the first run of `>`-quoted lines, and drop
/// everything from there onward.
fn remove_reply_chain(text: &str) -> (String, bool) {
    if let Some(m) = QUOTE_PREAMBLE.find(text) {
        return (text[..m.start()].trim_end().to_string(), true);
    }

    let lines: Vec<&str> = text.lines().collect();
    if let Some(first_quote) = lines.iter().position(|l| l.trim_start().starts_with('>')) {
        // Require at least two consecutive quoted lines to avoid stripping a
        // single inline `>` used for e.g. a shell prompt or math inequality.
        if lines
            .get(first_quote + 1)
            .is_some_and(|next| next.trim_start().starts_with('>'))
        {
            let kept = lines[..first_quote].join("\n");
            return (kept.trim_end().to_string(), true);
        }
    }

    (text.to_string(), false)
}

static BLANK_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());

/// Collapse runs of blank lines and trim, per step 4.
fn normalize_whitespace(text: &str) -> String {
    let collapsed = BLANK_RUN.replace_all(text, "\n\n");
    collapsed.trim().to_string()
}

static EMAIL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\w.+-]+@[\w-]+\.[A-Za-z]{2,}").unwrap());

static PHONE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\+?\d[\d\-. ()]{7,}\d").unwrap());

static URL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://[^\s]+").unwrap());

/// Replace email addresses, phone-number-shaped patterns, and URLs with stable
/// redaction tokens, per step 5. Order matters: URLs before phone numbers,
/// since a URL segment can otherwise look like a digit run.
fn mask_pii(text: &str) -> (String, (usize, usize, usize)) {
    let mut urls = 0;
    let after_urls = URL_PATTERN.replace_all(text, |_: &regex::Captures| {
        urls += 1;
        "[URL]"
    });

    let mut emails = 0;
    let after_emails = EMAIL_PATTERN.replace_all(&after_urls, |_: &regex::Captures| {
        emails += 1;
        "[EMAIL]"
    });

    let mut phones = 0;
    let after_phones = PHONE_PATTERN.replace_all(&after_emails, |_: &regex::Captures| {
        phones += 1;
        "[PHONE]"
    });

    (after_phones.into_owned(), (emails, phones, urls))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> PreprocessConfig {
        PreprocessConfig {
            strip_reply_chains: true,
        }
    }

    #[test]
    fn strips_html_markup() {
        let (text, _) = preprocess("hi", "<p>Hello <b>world</b></p>", true, cfg());
        assert!(text.contains("Hello"));
        assert!(!text.contains("<p>"));
    }

    #[test]
    fn removes_signature_delimiter() {
        let body = "Let's meet tomorrow.\n\n-- \nJane Doe\nSenior Engineer";
        let (text, stats) = preprocess("meeting", body, false, cfg());
        assert!(!text.contains("Senior Engineer"));
        assert!(stats.signature_removed);
    }

    #[test]
    fn removes_quoted_reply_chain() {
        let body = "Sounds good to me.\n\nOn Mon, Jan 1, 2024, Alice wrote:\n> original message\n> more quoted text";
        let (text, stats) = preprocess("re: plan", body, false, cfg());
        assert!(!text.contains("original message"));
        assert!(stats.reply_chain_removed);
    }

    #[test]
    fn reply_chain_removal_is_gated_by_config() {
        let body = "Sounds good.\n\nOn Mon, Alice wrote:\n> quoted";
        let cfg_off = PreprocessConfig {
            strip_reply_chains: false,
        };
        let (text, stats) = preprocess("re: plan", body, false, cfg_off);
        assert!(text.contains("quoted"));
        assert!(!stats.reply_chain_removed);
    }

    #[test]
    fn masks_pii() {
        let body = "Reach me at jane@example.com or +1 (555) 123-4567, see https://example.com/x";
        let (text, stats) = preprocess("contact", body, false, cfg());
        assert!(!text.contains("jane@example.com"));
        assert!(!text.contains("555"));
        assert!(!text.contains("https://"));
        assert_eq!(stats.emails_masked, 1);
        assert_eq!(stats.urls_masked, 1);
        assert_eq!(stats.phones_masked, 1);
    }

    #[test]
    fn collapses_blank_line_runs() {
        let body = "first\n\n\n\n\nsecond";
        let (text, _) = preprocess("x", body, false, cfg());
        assert_eq!(text, "first\n\nsecond");
    }

    #[test]
    fn idempotent_reapplication() {
        let body = "Hi there,\n\nPlease call +1 555 123 9876 or visit https://x.test\n\n-- \nSig";
        let (once, _) = preprocess("s", body, false, cfg());
        let (twice, _) = preprocess("s", &once, false, cfg());
        assert_eq!(once, twice);
    }
}
