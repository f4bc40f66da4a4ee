//! Validate and dedupe a submitted list of video URLs.

use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use url::Url;

/// Hard cap on URLs per batch.
pub const MAX_BATCH_URLS: usize = 200;

/// Hosts accepted as video sources.
pub const ALLOWED_HOSTS: &[&str] = &[
    "youtube.com",
    "www.youtube.com",
    "m.youtube.com",
    "music.youtube.com",
    "youtu.be",
    "youtube-nocookie.com",
    "www.youtube-nocookie.com",
];

pub const REASON_NOT_STRING: &str = "URL must be a string";
pub const REASON_EMPTY: &str = "URL cannot be empty";
pub const REASON_INVALID: &str = "Invalid YouTube URL";
pub const REASON_DUPLICATE: &str = "Duplicate URL";

/// Input that cannot be validated at all. Per-URL problems are not errors;
/// they come back as [`RejectedUrl`]s.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BatchInputError {
    #[error("batch input must be an array of URLs")]
    NotAnArray,
    #[error("batch input is empty")]
    Empty,
    #[error("batch has {count} URLs, the limit is {limit}")]
    TooMany { count: usize, limit: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AcceptedUrl {
    /// Position in the submitted list.
    pub index: usize,
    /// Trimmed URL.
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedUrl {
    pub index: usize,
    /// The entry as submitted (non-strings rendered as JSON).
    pub url: String,
    pub reason: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub total_count: usize,
    pub accepted: Vec<AcceptedUrl>,
    pub rejected: Vec<RejectedUrl>,
}

impl ValidationResult {
    pub fn accepted_urls(&self) -> Vec<&str> {
        self.accepted.iter().map(|a| a.url.as_str()).collect()
    }
}

/// True for http(s) URLs whose host is on [`ALLOWED_HOSTS`].
pub fn is_allowed_video_url(s: &str) -> bool {
    let Ok(url) = Url::parse(s) else {
        return false;
    };
    if !matches!(url.scheme(), "http" | "https") {
        return false;
    }
    match url.host_str() {
        Some(host) => ALLOWED_HOSTS.contains(&host.to_ascii_lowercase().as_str()),
        None => false,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BatchValidator {
    max_urls: usize,
}

impl Default for BatchValidator {
    fn default() -> Self {
        Self::new(MAX_BATCH_URLS)
    }
}

impl BatchValidator {
    /// `max_urls` is capped at [`MAX_BATCH_URLS`].
    pub fn new(max_urls: usize) -> Self {
        Self {
            max_urls: max_urls.clamp(1, MAX_BATCH_URLS),
        }
    }

    pub fn max_urls(&self) -> usize {
        self.max_urls
    }

    /// Validate a JSON value that should be an array of URL strings.
    pub fn validate_value(&self, input: &Value) -> Result<ValidationResult, BatchInputError> {
        match input {
            Value::Array(entries) => self.validate(entries),
            _ => Err(BatchInputError::NotAnArray),
        }
    }

    /// Validate a list of entries. Accepted and rejected lists keep input order.
    pub fn validate(&self, entries: &[Value]) -> Result<ValidationResult, BatchInputError> {
        if entries.is_empty() {
            return Err(BatchInputError::Empty);
        }
        if entries.len() > self.max_urls {
            return Err(BatchInputError::TooMany {
                count: entries.len(),
                limit: self.max_urls,
            });
        }

        let mut seen: HashSet<String> = HashSet::new();
        let mut accepted = Vec::new();
        let mut rejected = Vec::new();

        for (index, entry) in entries.iter().enumerate() {
            let raw = match entry {
                Value::String(s) => s,
                other => {
                    rejected.push(RejectedUrl {
                        index,
                        url: other.to_string(),
                        reason: REASON_NOT_STRING,
                    });
                    continue;
                }
            };
            let trimmed = raw.trim();
            let reason = if trimmed.is_empty() {
                Some(REASON_EMPTY)
            } else if !is_allowed_video_url(trimmed) {
                Some(REASON_INVALID)
            } else if !seen.insert(trimmed.to_lowercase()) {
                Some(REASON_DUPLICATE)
            } else {
                None
            };
            match reason {
                Some(reason) => rejected.push(RejectedUrl {
                    index,
                    url: raw.clone(),
                    reason,
                }),
                None => accepted.push(AcceptedUrl {
                    index,
                    url: trimmed.to_string(),
                }),
            }
        }

        Ok(ValidationResult {
            total_count: entries.len(),
            accepted,
            rejected,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn mixed_batch_keeps_first_duplicate_and_order() {
        let input = json!([
            "https://www.youtube.com/watch?v=a",
            "https://youtu.be/b",
            "HTTPS://WWW.YOUTUBE.COM/watch?v=a",
            "not a url",
            "https://youtu.be/b",
        ]);
        let result = BatchValidator::default().validate_value(&input).unwrap();
        assert_eq!(result.total_count, 5);
        assert_eq!(
            result.accepted_urls(),
            vec!["https://www.youtube.com/watch?v=a", "https://youtu.be/b"]
        );
        let reasons: Vec<(usize, &str)> =
            result.rejected.iter().map(|r| (r.index, r.reason)).collect();
        assert_eq!(
            reasons,
            vec![
                (2, REASON_DUPLICATE),
                (3, REASON_INVALID),
                (4, REASON_DUPLICATE)
            ]
        );
    }

    #[test]
    fn per_entry_reasons() {
        let input = json!([42, "   ", "ftp://youtube.com/x", "https://vimeo.com/1", " https://m.youtube.com/watch?v=z "]);
        let result = BatchValidator::default().validate_value(&input).unwrap();
        let reasons: Vec<&str> = result.rejected.iter().map(|r| r.reason).collect();
        assert_eq!(
            reasons,
            vec![REASON_NOT_STRING, REASON_EMPTY, REASON_INVALID, REASON_INVALID]
        );
        assert_eq!(result.rejected[0].url, "42");
        assert_eq!(result.accepted_urls(), vec!["https://m.youtube.com/watch?v=z"]);
        assert_eq!(result.accepted[0].index, 4);
    }

    #[test]
    fn invalid_entries_do_not_count_as_seen() {
        let input = json!(["youtube.com/watch?v=a", "https://youtube.com/watch?v=a"]);
        let result = BatchValidator::default().validate_value(&input).unwrap();
        assert_eq!(result.accepted.len(), 1);
        assert_eq!(result.rejected[0].reason, REASON_INVALID);
    }

    #[test]
    fn malformed_input_is_an_error() {
        let v = BatchValidator::default();
        assert_eq!(
            v.validate_value(&json!("https://youtu.be/a")),
            Err(BatchInputError::NotAnArray)
        );
        assert_eq!(v.validate_value(&json!([])), Err(BatchInputError::Empty));

        let many: Vec<Value> = (0..=MAX_BATCH_URLS)
            .map(|i| Value::String(format!("https://youtu.be/{}", i)))
            .collect();
        assert_eq!(
            v.validate(&many),
            Err(BatchInputError::TooMany {
                count: MAX_BATCH_URLS + 1,
                limit: MAX_BATCH_URLS
            })
        );
        assert!(v.validate(&many[..MAX_BATCH_URLS]).is_ok());
    }

    #[test]
    fn configured_limit_is_capped() {
        assert_eq!(BatchValidator::new(10_000).max_urls(), MAX_BATCH_URLS);
        let v = BatchValidator::new(2);
        let three = vec![Value::String("https://youtu.be/a".into()); 3];
        assert!(matches!(
            v.validate(&three),
            Err(BatchInputError::TooMany { count: 3, limit: 2 })
        ));
    }

    #[test]
    fn allow_list_checks_scheme_and_host() {
        assert!(is_allowed_video_url("http://youtube.com/watch?v=1"));
        assert!(is_allowed_video_url("https://music.youtube.com/watch?v=1"));
        assert!(is_allowed_video_url("https://www.youtube-nocookie.com/embed/1"));
        assert!(!is_allowed_video_url("https://evil-youtube.com/watch?v=1"));
        assert!(!is_allowed_video_url("https://youtube.com.evil.org/watch?v=1"));
        assert!(!is_allowed_video_url("javascript:alert(1)"));
    }
}
