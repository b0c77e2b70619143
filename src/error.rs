use thiserror::Error;

/// Classified failure from one provider attempt or from the extraction as a
/// whole. The message text is what the caller renders, so each variant spells
/// out whether the fix is configuration or patience.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Access denied: {0}. Check that the API key is valid and unrestricted.")]
    Auth(String),

    #[error("Bad request: {0}. The API key may be invalid or missing required permissions.")]
    BadRequest(String),

    #[error("Rate limit exceeded: {0}. Wait a moment or check your quota and billing.")]
    RateLimit(String),

    #[error("Provider unavailable: {0}. Try again in a moment.")]
    Unavailable(String),

    #[error("Provider returned data that could not be parsed: {0}")]
    Parse(String),

    #[error("Provider error: {0}")]
    Other(String),
}

impl ExtractError {
    /// Whether the next provider in the registry is worth trying. Bad
    /// credentials or a malformed request will fail identically everywhere,
    /// so those abort the fallback loop.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ExtractError::Auth(_) | ExtractError::BadRequest(_))
    }

    /// Short classification label used in logs and the activity trail.
    pub fn class(&self) -> &'static str {
        match self {
            ExtractError::Auth(_) => "auth",
            ExtractError::BadRequest(_) => "bad-request",
            ExtractError::RateLimit(_) => "rate-limit",
            ExtractError::Unavailable(_) => "unavailable",
            ExtractError::Parse(_) => "parse",
            ExtractError::Other(_) => "unknown",
        }
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_and_bad_request_are_fatal() {
        assert!(!ExtractError::Auth("key rejected".into()).is_retryable());
        assert!(!ExtractError::BadRequest("bad field".into()).is_retryable());
    }

    #[test]
    fn transient_classes_are_retryable() {
        assert!(ExtractError::RateLimit("quota".into()).is_retryable());
        assert!(ExtractError::Unavailable("503".into()).is_retryable());
        assert!(ExtractError::Parse("garbage".into()).is_retryable());
        assert!(ExtractError::Other("???".into()).is_retryable());
    }

    #[test]
    fn class_labels_are_stable() {
        assert_eq!(ExtractError::Auth(String::new()).class(), "auth");
        assert_eq!(ExtractError::RateLimit(String::new()).class(), "rate-limit");
        assert_eq!(ExtractError::Parse(String::new()).class(), "parse");
    }
}
