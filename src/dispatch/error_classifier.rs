//! # Provider Error Classification
//!
//! Reduces every provider failure shape to one of five categories at the
//! dispatch boundary. The categories are the *only* failure vocabulary the
//! retry/DLQ logic reasons about; provider-specific status codes and error
//! codes never leak past this module.
//!
//! Classification is a pure function over `(http_status, provider_code)`
//! and is unit-tested against the fixed table of codes the provider is
//! known to emit for the five outbound action types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse failure classes. The category alone fully determines retry
/// policy (see [`RetryPolicy`](crate::dispatch::RetryPolicy)).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Credential invalid/expired/revoked. No retry; disconnects the
    /// account.
    AuthFailure,
    /// Structurally invalid request: bad payload, policy violation,
    /// missing resource. Retrying cannot help.
    Permanent,
    /// Provider quota exceeded. Retry honoring the provider's backoff hint
    /// when present.
    RateLimit,
    /// Network/timeout/5xx. Retry with exponential backoff.
    Transient,
    /// Unrecognized failure shape. Retry under a stricter ceiling, then
    /// dead-letter with the raw error preserved for triage.
    Unknown,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AuthFailure => write!(f, "auth_failure"),
            Self::Permanent => write!(f, "permanent"),
            Self::RateLimit => write!(f, "rate_limit"),
            Self::Transient => write!(f, "transient"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

impl std::str::FromStr for ErrorCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auth_failure" => Ok(Self::AuthFailure),
            "permanent" => Ok(Self::Permanent),
            "rate_limit" => Ok(Self::RateLimit),
            "transient" => Ok(Self::Transient),
            "unknown" => Ok(Self::Unknown),
            _ => Err(format!("invalid error category: {s}")),
        }
    }
}

/// Provider codes signalling a dead credential. 190 is the canonical
/// invalid/expired token code; 102 is a session error; 463/467 are
/// expired and invalidated token subcodes surfaced as top-level codes.
const AUTH_CODES: &[&str] = &["190", "102", "463", "467"];

/// Provider codes for application- and user-level throttling.
const RATE_CODES: &[&str] = &["4", "17", "32", "613"];

/// Provider codes for requests that can never succeed as sent.
/// 100: invalid parameter; 803: target object does not exist;
/// 10/200: permission denied for the action; 506: duplicate post.
const PERMANENT_CODES: &[&str] = &["100", "803", "10", "200", "506"];

/// Permanent codes that specifically mean the content was rejected on
/// policy grounds. 368: blocked for policy violation; 2207026: media
/// rejected by content checks.
const POLICY_CODES: &[&str] = &["368", "2207026"];

/// Provider codes for conditions the provider itself labels temporary.
const TRANSIENT_CODES: &[&str] = &["1", "2"];

/// Classify a provider failure. `provider_code` is the provider's own
/// error code when the response body carried one.
pub fn classify(http_status: u16, provider_code: Option<&str>) -> ErrorCategory {
    if let Some(code) = provider_code {
        if AUTH_CODES.contains(&code) {
            return ErrorCategory::AuthFailure;
        }
        if RATE_CODES.contains(&code) {
            return ErrorCategory::RateLimit;
        }
        if POLICY_CODES.contains(&code) || PERMANENT_CODES.contains(&code) {
            return ErrorCategory::Permanent;
        }
        if TRANSIENT_CODES.contains(&code) {
            return ErrorCategory::Transient;
        }
    }

    match http_status {
        401 => ErrorCategory::AuthFailure,
        429 => ErrorCategory::RateLimit,
        400 | 403 | 404 | 410 | 422 => ErrorCategory::Permanent,
        408 => ErrorCategory::Transient,
        s if s >= 500 => ErrorCategory::Transient,
        _ => ErrorCategory::Unknown,
    }
}

/// Whether a permanent failure stems from a content policy rejection.
/// Drives alert typing: policy rejections raise `content_violation`, other
/// permanent failures raise `sync_failure`.
pub fn is_policy_violation(provider_code: Option<&str>) -> bool {
    provider_code.is_some_and(|code| POLICY_CODES.contains(&code))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_table() {
        // (http_status, provider_code, expected)
        let table: &[(u16, Option<&str>, ErrorCategory)] = &[
            // Credential failures, with and without a code
            (400, Some("190"), ErrorCategory::AuthFailure),
            (401, Some("102"), ErrorCategory::AuthFailure),
            (401, Some("463"), ErrorCategory::AuthFailure),
            (401, Some("467"), ErrorCategory::AuthFailure),
            (401, None, ErrorCategory::AuthFailure),
            // Throttling
            (429, Some("4"), ErrorCategory::RateLimit),
            (403, Some("17"), ErrorCategory::RateLimit),
            (403, Some("32"), ErrorCategory::RateLimit),
            (400, Some("613"), ErrorCategory::RateLimit),
            (429, None, ErrorCategory::RateLimit),
            // Structural failures
            (400, Some("100"), ErrorCategory::Permanent),
            (404, Some("803"), ErrorCategory::Permanent),
            (403, Some("10"), ErrorCategory::Permanent),
            (403, Some("200"), ErrorCategory::Permanent),
            (400, Some("506"), ErrorCategory::Permanent),
            (400, Some("368"), ErrorCategory::Permanent),
            (400, Some("2207026"), ErrorCategory::Permanent),
            (404, None, ErrorCategory::Permanent),
            (422, None, ErrorCategory::Permanent),
            // Temporary conditions
            (500, Some("1"), ErrorCategory::Transient),
            (503, Some("2"), ErrorCategory::Transient),
            (500, None, ErrorCategory::Transient),
            (502, None, ErrorCategory::Transient),
            (504, None, ErrorCategory::Transient),
            (408, None, ErrorCategory::Transient),
            // Unrecognized shapes
            (418, None, ErrorCategory::Unknown),
            (302, None, ErrorCategory::Unknown),
            (200, Some("99999"), ErrorCategory::Unknown),
        ];

        for (status, code, expected) in table {
            assert_eq!(
                classify(*status, *code),
                *expected,
                "status={status} code={code:?}"
            );
        }
    }

    #[test]
    fn code_wins_over_status() {
        // A dead token reported under a 400 umbrella status is still an
        // auth failure, not a permanent payload error.
        assert_eq!(classify(400, Some("190")), ErrorCategory::AuthFailure);
        // Throttle code under 403 is a rate limit, not permanent.
        assert_eq!(classify(403, Some("4")), ErrorCategory::RateLimit);
    }

    #[test]
    fn policy_violation_predicate() {
        assert!(is_policy_violation(Some("368")));
        assert!(is_policy_violation(Some("2207026")));
        assert!(!is_policy_violation(Some("100")));
        assert!(!is_policy_violation(None));
    }

    #[test]
    fn category_round_trip() {
        for category in [
            ErrorCategory::AuthFailure,
            ErrorCategory::Permanent,
            ErrorCategory::RateLimit,
            ErrorCategory::Transient,
            ErrorCategory::Unknown,
        ] {
            let parsed: ErrorCategory = category.to_string().parse().unwrap();
            assert_eq!(parsed, category);
        }
    }
}
