use std::{fmt, path::PathBuf};

use thiserror::Error;

/// External collaborator that produced a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    Chat,
    WebSearch,
    Encyclopedia,
}

impl Service {
    pub fn as_str(&self) -> &'static str {
        match self {
            Service::Chat => "chat",
            Service::WebSearch => "web_search",
            Service::Encyclopedia => "encyclopedia",
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const MAX_ERROR_BODY_CHARS: usize = 500;

/// Core error type for SAGE.
#[derive(Debug, Error)]
pub enum SageError {
    #[error("configuration error: {0}")]
    InvalidConfiguration(String),
    #[error("missing environment variable: {0}")]
    MissingSecret(String),
    #[error("I/O error while reading {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("research topic must not be empty")]
    EmptyTopic,
    #[error("invalid session id `{0}`: use 1-128 ASCII letters, digits, `-` or `_`")]
    InvalidSessionId(String),
    #[error("{service} request failed: {message}")]
    Upstream { service: Service, message: String },
    #[error("{service} returned a malformed response: {message}")]
    MalformedResponse { service: Service, message: String },
    #[error("invalid report state: {0}")]
    InvalidState(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SageError {
    pub fn config_io(path: PathBuf, source: std::io::Error) -> Self {
        Self::ConfigIo { path, source }
    }

    pub fn upstream(service: Service, message: impl Into<String>) -> Self {
        Self::Upstream {
            service,
            message: message.into(),
        }
    }

    /// A non-success HTTP status. Long response bodies are cut to keep logs readable.
    pub(crate) fn http_status(service: Service, status: u16, body: &str) -> Self {
        let body: String = body.trim().chars().take(MAX_ERROR_BODY_CHARS).collect();
        let message = if body.is_empty() {
            format!("status {status}")
        } else {
            format!("status {status}: {body}")
        };
        Self::upstream(service, message)
    }

    pub fn malformed(service: Service, message: impl Into<String>) -> Self {
        Self::MalformedResponse {
            service,
            message: message.into(),
        }
    }

    /// Whether the failure came from one of the external collaborators.
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            SageError::Upstream { .. } | SageError::MalformedResponse { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_body_is_truncated() {
        let body = "x".repeat(2_000);
        let err = SageError::http_status(Service::WebSearch, 429, &body);
        match err {
            SageError::Upstream { service, message } => {
                assert_eq!(service, Service::WebSearch);
                assert_eq!(message, format!("status 429: {}", "x".repeat(500)));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn http_status_without_body_keeps_code_only() {
        let err = SageError::http_status(Service::Encyclopedia, 503, "  ");
        assert_eq!(err.to_string(), "encyclopedia request failed: status 503");
        assert!(err.is_upstream());
    }
}
