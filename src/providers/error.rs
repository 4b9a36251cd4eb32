use thiserror::Error;

pub type ProviderResult<T> = Result<T, ProviderError>;

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("Validation error: {message}")]
    ValidationError {
        message: String,
        field: Option<String>,
    },

    #[error("Network error: {message}")]
    NetworkError { message: String },

    #[error("Rate limit exceeded: {message}")]
    RateLimitError {
        message: String,
        retry_after_seconds: Option<u64>,
    },

    #[error("Provider error: provider={provider}, message={message}")]
    ApiError {
        provider: String,
        message: String,
        provider_code: Option<String>,
        retryable: bool,
    },
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::ValidationError { .. } => false,
            ProviderError::NetworkError { .. } => true,
            ProviderError::RateLimitError { .. } => true,
            ProviderError::ApiError { retryable, .. } => *retryable,
        }
    }

    pub fn http_status_code(&self) -> u16 {
        match self {
            ProviderError::ValidationError { .. } => 400,
            ProviderError::NetworkError { .. } => 503,
            ProviderError::RateLimitError { .. } => 429,
            ProviderError::ApiError { .. } => 502,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_flags_are_set() {
        assert!(ProviderError::NetworkError {
            message: "timeout".to_string()
        }
        .is_retryable());
        assert!(!ProviderError::ValidationError {
            message: "bad".to_string(),
            field: None
        }
        .is_retryable());
    }
}
