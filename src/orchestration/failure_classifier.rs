//! # Failure Classification
//!
//! Maps an arbitrary work-function error into a failure category with a
//! recommended recovery action. Classification is keyword- and status-code-
//! based over the error message; it is a best-effort heuristic layer that is
//! explicitly allowed to be wrong, with a recorded confidence score.

use std::time::Duration;
use tracing::debug;

use crate::orchestration::types::{
    FailureCategory, FailureClassification, RecoveryAction, WorkError,
};

/// Trait seam for classification strategies
pub trait FailureClassifier: Send + Sync {
    /// Classify an error from the given attempt (1-based)
    fn classify(&self, error: &WorkError, attempt_number: u32) -> FailureClassification;

    /// Classifier name for identification
    fn classifier_name(&self) -> &'static str;
}

/// Standard keyword-based classifier
#[derive(Debug, Default)]
pub struct KeywordClassifier;

impl KeywordClassifier {
    pub fn new() -> Self {
        Self
    }

    fn classify_network(attempt: u32) -> FailureClassification {
        FailureClassification {
            category: FailureCategory::Network,
            is_retryable: true,
            max_retries: 3,
            suggested_delay: Duration::from_secs((5 * attempt as u64).min(30)),
            recovery_action: RecoveryAction::RetryAfterDelay,
            confidence: 0.85,
        }
    }

    fn classify_rate_limit(attempt: u32) -> FailureClassification {
        FailureClassification {
            category: FailureCategory::RateLimit,
            is_retryable: true,
            max_retries: 5,
            suggested_delay: Duration::from_secs(60 + 30 * attempt as u64),
            recovery_action: RecoveryAction::RetryAfterDelay,
            confidence: 0.9,
        }
    }

    fn classify_auth() -> FailureClassification {
        FailureClassification {
            category: FailureCategory::Auth,
            is_retryable: false,
            max_retries: 0,
            suggested_delay: Duration::ZERO,
            // Typically transient-fixable (rotate a credential) without
            // losing progress, so the job pauses rather than fails
            recovery_action: RecoveryAction::PauseJob,
            confidence: 0.9,
        }
    }

    fn classify_validation() -> FailureClassification {
        FailureClassification {
            category: FailureCategory::Validation,
            is_retryable: false,
            max_retries: 0,
            suggested_delay: Duration::ZERO,
            recovery_action: RecoveryAction::SkipItem,
            confidence: 0.85,
        }
    }

    fn classify_timeout(attempt: u32) -> FailureClassification {
        FailureClassification {
            category: FailureCategory::Timeout,
            is_retryable: true,
            max_retries: 2,
            suggested_delay: Duration::from_secs(10 * attempt as u64),
            recovery_action: RecoveryAction::RetryAfterDelay,
            confidence: 0.8,
        }
    }

    fn classify_unknown() -> FailureClassification {
        FailureClassification {
            category: FailureCategory::Unknown,
            is_retryable: true,
            max_retries: 1,
            suggested_delay: Duration::from_secs(15),
            // Conservative single retry with delay for anything unmatched
            recovery_action: RecoveryAction::RetryAfterDelay,
            confidence: 0.5,
        }
    }
}

impl FailureClassifier for KeywordClassifier {
    fn classify(&self, error: &WorkError, attempt_number: u32) -> FailureClassification {
        let message = error.message.to_lowercase();

        let classification = match error.status_code {
            Some(429) => Self::classify_rate_limit(attempt_number),
            Some(401) | Some(403) => Self::classify_auth(),
            _ => {
                if message.contains("rate limit")
                    || message.contains("too many requests")
                    || message.contains("429")
                {
                    Self::classify_rate_limit(attempt_number)
                } else if message.contains("auth")
                    || message.contains("401")
                    || message.contains("403")
                    || message.contains("unauthorized")
                    || message.contains("forbidden")
                {
                    Self::classify_auth()
                } else if message.contains("validation")
                    || message.contains("invalid")
                    || message.contains("malformed")
                {
                    Self::classify_validation()
                } else if message.contains("connection")
                    || message.contains("dns")
                    || message.contains("network")
                    || message.contains("connect timeout")
                {
                    Self::classify_network(attempt_number)
                } else if message.contains("timeout") || message.contains("timed out") {
                    Self::classify_timeout(attempt_number)
                } else {
                    Self::classify_unknown()
                }
            }
        };

        debug!(
            category = %classification.category,
            retryable = classification.is_retryable,
            attempt = attempt_number,
            delay_secs = classification.suggested_delay.as_secs(),
            confidence = classification.confidence,
            error = %error.message,
            "CLASSIFIER: Failure classified"
        );

        classification
    }

    fn classifier_name(&self) -> &'static str {
        "KeywordClassifier"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(message: &str, attempt: u32) -> FailureClassification {
        KeywordClassifier::new().classify(&WorkError::new(message), attempt)
    }

    #[test]
    fn test_rate_limit_by_message() {
        let c = classify("429 Too Many Requests", 1);
        assert_eq!(c.category, FailureCategory::RateLimit);
        assert_eq!(c.recovery_action, RecoveryAction::RetryAfterDelay);
        assert!(c.suggested_delay >= Duration::from_secs(60));
        assert_eq!(c.max_retries, 5);
    }

    #[test]
    fn test_rate_limit_delay_grows_with_attempts() {
        assert_eq!(classify("rate limit hit", 1).suggested_delay, Duration::from_secs(90));
        assert_eq!(classify("rate limit hit", 3).suggested_delay, Duration::from_secs(150));
    }

    #[test]
    fn test_rate_limit_by_status_code() {
        let c = KeywordClassifier::new()
            .classify(&WorkError::with_status("slow down", 429), 1);
        assert_eq!(c.category, FailureCategory::RateLimit);
    }

    #[test]
    fn test_auth_pauses_and_never_retries() {
        for message in ["401 Unauthorized", "forbidden resource", "auth token expired"] {
            let c = classify(message, 1);
            assert_eq!(c.category, FailureCategory::Auth, "message: {message}");
            assert!(!c.is_retryable);
            assert_eq!(c.recovery_action, RecoveryAction::PauseJob);
        }
    }

    #[test]
    fn test_validation_skips_item() {
        let c = classify("invalid company name: empty string", 1);
        assert_eq!(c.category, FailureCategory::Validation);
        assert!(!c.is_retryable);
        assert_eq!(c.recovery_action, RecoveryAction::SkipItem);
    }

    #[test]
    fn test_network_delay_is_capped() {
        let c = classify("connection refused by upstream", 10);
        assert_eq!(c.category, FailureCategory::Network);
        assert_eq!(c.suggested_delay, Duration::from_secs(30));
        assert_eq!(c.max_retries, 3);
    }

    #[test]
    fn test_generic_timeout() {
        let c = classify("operation timed out after 120s", 2);
        assert_eq!(c.category, FailureCategory::Timeout);
        assert_eq!(c.suggested_delay, Duration::from_secs(20));
        assert_eq!(c.max_retries, 2);
    }

    #[test]
    fn test_network_keyword_wins_over_generic_timeout() {
        let c = classify("network timeout while resolving dns", 1);
        assert_eq!(c.category, FailureCategory::Network);
    }

    #[test]
    fn test_unmatched_is_conservative_unknown() {
        let c = classify("something odd happened", 1);
        assert_eq!(c.category, FailureCategory::Unknown);
        assert!(c.is_retryable);
        assert_eq!(c.max_retries, 1);
        assert_eq!(c.suggested_delay, Duration::from_secs(15));
        assert!(c.confidence <= 0.5);
    }
}
