//! Normalization of a raw provider message into the `Email` schema (§4.1 step 4).
//!
//! The provider adapter already hands back structured fields (no MIME decoding
//! happens here); this module's job is strictly the timestamp policy from §3:
//! prefer the provider's epoch timestamp, fall back to parsing a textual header
//! as a zoned instant and converting to UTC, and reject anything that would
//! silently persist a naive or future-skewed instant.

use crate::provider::RawMessage;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

/// Maximum tolerated clock skew for a message whose date was parsed from text.
const MAX_FUTURE_SKEW: Duration = Duration::hours(24);

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("message {0} has neither a provider epoch timestamp nor a date header")]
    MissingDate(String),
    #[error("message {message_id} has an unparseable date header `{raw}`: {source}")]
    InvalidDate {
        message_id: String,
        raw: String,
        source: String,
    },
    #[error("message {message_id} has a future date header `{raw}` ({skew_hours}h ahead)")]
    FutureDate {
        message_id: String,
        raw: String,
        skew_hours: i64,
    },
}

/// A raw provider message after normalization, ready for insertion into `emails`.
#[derive(Debug, Clone)]
pub struct NormalizedEmail {
    pub provider_message_id: String,
    pub thread_id: Option<String>,
    pub subject: String,
    pub sender: String,
    pub received_at: DateTime<Utc>,
    pub body: String,
    pub is_html: bool,
}

/// Sanitize text by removing NUL bytes, which PostgreSQL cannot store.
fn sanitize_text(text: &str) -> String {
    text.replace('\0', "").trim().to_string()
}

/// Derive `received_at` per §4.1 step 4: the provider's authoritative epoch
/// timestamp is preferred (timezone-free, no ambiguity). Only when the
/// provider omits it do we fall back to parsing `date_header` as a zoned
/// instant. A missing zone is treated as UTC with a logged warning, matching
/// the policy that the storage layer re-verifies and corrects naive inputs.
fn resolve_received_at(raw: &RawMessage) -> Result<DateTime<Utc>, NormalizeError> {
    if let Some(epoch) = raw.received_epoch {
        return Ok(epoch);
    }

    let header = raw.date_header.as_deref().unwrap_or("").trim();
    if header.is_empty() {
        return Err(NormalizeError::MissingDate(raw.provider_message_id.clone()));
    }

    match dateparser::parse(header) {
        Ok(dt) => {
            let utc = dt.with_timezone(&Utc);
            let now = Utc::now();
            if utc > now + MAX_FUTURE_SKEW {
                log::warn!(
                    "message {} has future date `{}` (> {}h ahead), rejecting",
                    raw.provider_message_id,
                    header,
                    MAX_FUTURE_SKEW.num_hours()
                );
                return Err(NormalizeError::FutureDate {
                    message_id: raw.provider_message_id.clone(),
                    raw: header.to_string(),
                    skew_hours: MAX_FUTURE_SKEW.num_hours(),
                });
            }
            log::warn!(
                "message {} had no provider epoch timestamp; parsed `{}` as UTC",
                raw.provider_message_id,
                header
            );
            Ok(utc)
        }
        Err(source) => Err(NormalizeError::InvalidDate {
            message_id: raw.provider_message_id.clone(),
            raw: header.to_string(),
            source: source.to_string(),
        }),
    }
}

/// Normalize a raw provider message into the Email schema.
pub fn normalize(raw: RawMessage) -> Result<NormalizedEmail, NormalizeError> {
    let received_at = resolve_received_at(&raw)?;

    Ok(NormalizedEmail {
        provider_message_id: sanitize_text(&raw.provider_message_id),
        thread_id: raw.thread_id.map(|t| sanitize_text(&t)),
        subject: sanitize_text(&raw.subject),
        sender: sanitize_text(&raw.sender).to_lowercase(),
        received_at,
        body: sanitize_text(&raw.body),
        is_html: raw.is_html,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_message() -> RawMessage {
        RawMessage {
            provider_message_id: "abc123".to_string(),
            thread_id: None,
            subject: "Q4 budget review".to_string(),
            sender: "Finance@Example.com".to_string(),
            received_epoch: None,
            date_header: None,
            body: "please review by friday".to_string(),
            is_html: false,
        }
    }

    #[test]
    fn prefers_provider_epoch_over_date_header() {
        let epoch = Utc::now() - Duration::days(1);
        let mut raw = base_message();
        raw.received_epoch = Some(epoch);
        raw.date_header = Some("not even a real date".to_string());

        let normalized = normalize(raw).expect("normalizes");
        assert_eq!(normalized.received_at, epoch);
    }

    #[test]
    fn lowercases_sender() {
        let mut raw = base_message();
        raw.received_epoch = Some(Utc::now());
        let normalized = normalize(raw).expect("normalizes");
        assert_eq!(normalized.sender, "finance@example.com");
    }

    #[test]
    fn rejects_missing_date() {
        let raw = base_message();
        let err = normalize(raw).unwrap_err();
        assert!(matches!(err, NormalizeError::MissingDate(_)));
    }

    #[test]
    fn parses_textual_date_header_as_utc() {
        let mut raw = base_message();
        raw.date_header = Some("2024-03-01T10:00:00Z".to_string());
        let normalized = normalize(raw).expect("parses");
        assert_eq!(normalized.received_at.timezone(), Utc);
    }

    #[test]
    fn rejects_future_date_header() {
        let mut raw = base_message();
        let future = Utc::now() + Duration::days(10);
        raw.date_header = Some(future.to_rfc3339());
        let err = normalize(raw).unwrap_err();
        assert!(matches!(err, NormalizeError::FutureDate { .. }));
    }

    #[test]
    fn rejects_unparseable_date_header() {
        let mut raw = base_message();
        raw.date_header = Some("definitely not a date".to_string());
        let err = normalize(raw).unwrap_err();
        assert!(matches!(err, NormalizeError::InvalidDate { .. }));
    }
}
