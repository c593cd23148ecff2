use thiserror::Error;

/// Failure of an orchestrator operation.
///
/// `Http`, `Network` and `Command` form the transport family. A provider that
/// answers with `success: false` is not an error at all; it comes back as an
/// `ImageGenerationResult`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("API Error: {status} - {body}")]
    Http { status: u16, body: String },

    #[error("API Error: Network Error - {0}")]
    Network(String),

    #[error("Command `{command}` failed: {message}")]
    Command { command: String, message: String },

    #[error("Connection test for {provider} failed: {reason}")]
    ConnectionTest { provider: String, reason: String },

    #[error("Malformed payload: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::Validation(message.into())
    }

    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ApiError::Http { .. } | ApiError::Network(_) | ApiError::Command { .. }
        )
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, ApiError::Validation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_carry_diagnostics() {
        let e = ApiError::Http { status: 502, body: "{\"error\":\"upstream\"}".to_string() };
        assert_eq!(e.to_string(), "API Error: 502 - {\"error\":\"upstream\"}");
        assert!(e.is_transport());

        let e = ApiError::Network("connection refused".to_string());
        assert!(e.to_string().contains("connection refused"));
        assert!(e.is_transport());

        let e = ApiError::validation("Prompt cannot be empty");
        assert!(e.is_validation());
        assert!(!e.is_transport());
    }
}
