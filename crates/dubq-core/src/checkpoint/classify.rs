//! Classify segment failures from their error code and message text.

use serde::Serialize;

/// What kind of failure a segment hit, as far as recovery is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Likely to succeed if tried again (timeouts, throttling, unknown causes).
    Retryable,
    /// Needs a settings change first (bad voice, out-of-range value, ...).
    ConfigInvalid,
    /// Needs operator action on credentials or permissions.
    NonRetryable,
}

impl FailureClass {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureClass::Retryable => "retryable",
            FailureClass::ConfigInvalid => "config_invalid",
            FailureClass::NonRetryable => "non_retryable",
        }
    }
}

const NON_RETRYABLE_MARKERS: &[&str] = &["401", "403", "permission", "forbidden"];
const CONFIG_INVALID_MARKERS: &[&str] = &["config", "invalid", "range", "voice"];
const RETRYABLE_MARKERS: &[&str] = &["timeout", "network", "429", "rate"];

/// Classify by case-insensitive substring match over `code` and `message`.
///
/// Non-retryable markers win over config markers, which win over retryable
/// ones. Text that matches nothing (including empty text) is retryable.
pub fn classify_error(code: &str, message: &str) -> FailureClass {
    let text = format!("{} {}", code, message).to_lowercase();
    let has = |markers: &[&str]| markers.iter().any(|m| text.contains(m));

    if has(NON_RETRYABLE_MARKERS) {
        FailureClass::NonRetryable
    } else if has(CONFIG_INVALID_MARKERS) {
        FailureClass::ConfigInvalid
    } else {
        if !has(RETRYABLE_MARKERS) {
            tracing::trace!(code, "unclassified failure text, assuming retryable");
        }
        FailureClass::Retryable
    }
}
