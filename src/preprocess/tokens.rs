//! Token budgeting: estimate, truncate, and fingerprint preprocessed text.

use sha2::{Digest, Sha256};

pub const MAX_INPUT_TOKENS: usize = 4000;
pub const MAX_OUTPUT_TOKENS: usize = 300;
pub const PROMPT_OVERHEAD: usize = 150;
pub const SAFE_INPUT_BUDGET: usize = MAX_INPUT_TOKENS - PROMPT_OVERHEAD;

/// Below this many estimated tokens, an email is flagged as a skip-summarization
/// candidate. The core still processes it; the worker decides whether to call
/// the LLM at all.
pub const BYPASS_TOKEN_THRESHOLD: usize = 8;

/// Characters-per-token ratio for scripts without a 1:1 byte/grapheme relationship
/// to tokens (CJK, Arabic). Latin-script text uses roughly 4 characters/token;
/// these scripts compress far less per token.
const WIDE_SCRIPT_CHARS_PER_TOKEN: f64 = 1.5;
const NARROW_SCRIPT_CHARS_PER_TOKEN: f64 = 4.0;

/// Outcome of token estimation and truncation for one cleaned text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBudgetResult {
    pub text: String,
    pub estimated_tokens: usize,
    pub truncated: bool,
    pub skip_candidate: bool,
}

fn is_wide_script_char(c: char) -> bool {
    matches!(c as u32,
        0x4E00..=0x9FFF    // CJK Unified Ideographs
        | 0x3040..=0x30FF  // Hiragana / Katakana
        | 0xAC00..=0xD7A3  // Hangul syllables
        | 0x0600..=0x06FF  // Arabic
    )
}

/// Estimate tokens by a character-to-token ratio, applying a higher ratio for
/// CJK/Arabic scripts than for Latin-script text.
pub fn estimate_tokens(text: &str) -> usize {
    let mut wide = 0usize;
    let mut narrow = 0usize;
    for c in text.chars() {
        if is_wide_script_char(c) {
            wide += 1;
        } else {
            narrow += 1;
        }
    }

    let wide_tokens = wide as f64 / WIDE_SCRIPT_CHARS_PER_TOKEN;
    let narrow_tokens = narrow as f64 / NARROW_SCRIPT_CHARS_PER_TOKEN;
    (wide_tokens + narrow_tokens).ceil() as usize
}

/// Smart truncation (§4.3): keep the leading 20% and trailing 40% of the text,
/// discard the middle. This preserves greeting/context and conclusion/action
/// areas while dropping the part most likely to be filler.
fn smart_truncate(text: &str, target_chars: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= target_chars {
        return text.to_string();
    }

    let lead_len = (target_chars as f64 * 0.2).round() as usize;
    let tail_len = (target_chars as f64 * 0.4).round() as usize;

    let lead: String = chars[..lead_len.min(chars.len())].iter().collect();
    let tail_start = chars.len().saturating_sub(tail_len);
    let tail: String = chars[tail_start..].iter().collect();

    format!("{lead}\n\n[...]\n\n{tail}")
}

/// Apply the token budget to a cleaned text, truncating if necessary and
/// flagging short inputs as skip-summarization candidates.
pub fn apply_budget(cleaned_text: &str) -> TokenBudgetResult {
    let estimated = estimate_tokens(cleaned_text);

    if estimated <= SAFE_INPUT_BUDGET {
        return TokenBudgetResult {
            skip_candidate: estimated < BYPASS_TOKEN_THRESHOLD,
            text: cleaned_text.to_string(),
            estimated_tokens: estimated,
            truncated: false,
        };
    }

    // Convert the token budget back into an approximate character budget using
    // the narrow-script ratio; smart_truncate operates on characters.
    let target_chars = (SAFE_INPUT_BUDGET as f64 * NARROW_SCRIPT_CHARS_PER_TOKEN) as usize;
    let truncated_text = smart_truncate(cleaned_text, target_chars);
    let final_estimate = estimate_tokens(&truncated_text);

    TokenBudgetResult {
        skip_candidate: false,
        text: truncated_text,
        estimated_tokens: final_estimate,
        truncated: true,
    }
}

/// Deterministic input fingerprint over `(prompt_version, model, cleaned_text)`,
/// used by the worker to dedup against existing summaries (§4.3, L2).
pub fn input_hash(prompt_version: &str, model: &str, cleaned_text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prompt_version.as_bytes());
    hasher.update(b"\0");
    hasher.update(model.as_bytes());
    hasher.update(b"\0");
    hasher.update(cleaned_text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimates_latin_text_at_roughly_four_chars_per_token() {
        let text = "a".repeat(400);
        assert_eq!(estimate_tokens(&text), 100);
    }

    #[test]
    fn estimates_wide_script_text_more_expensively() {
        let cjk = "日".repeat(30);
        let latin = "a".repeat(30);
        assert!(estimate_tokens(&cjk) > estimate_tokens(&latin));
    }

    #[test]
    fn short_text_is_flagged_skip_candidate() {
        let result = apply_budget("ok");
        assert!(result.skip_candidate);
        assert!(!result.truncated);
    }

    #[test]
    fn over_budget_text_is_truncated_and_preserves_head_and_tail() {
        let long_text = format!("{}{}", "head ".repeat(2000), "tail-marker");
        let result = apply_budget(&long_text);
        assert!(result.truncated);
        assert!(result.text.contains("tail-marker"));
        assert!(result.estimated_tokens <= SAFE_INPUT_BUDGET);
    }

    #[test]
    fn fingerprint_is_deterministic_and_sensitive_to_each_input() {
        let a = input_hash("v1", "gpt", "hello");
        let b = input_hash("v1", "gpt", "hello");
        let c = input_hash("v2", "gpt", "hello");
        let d = input_hash("v1", "other-model", "hello");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }
}
