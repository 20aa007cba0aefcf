use serde::Serialize;

/// Shared error type used across all webforge crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("validation: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("state conflict: {0}")]
    StateConflict(String),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("internal: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// The failure-surface tag carried by every error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    ProviderUnavailable,
    Timeout,
    StateConflict,
    Internal,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::ProviderUnavailable(_) => ErrorKind::ProviderUnavailable,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::StateConflict(_) => ErrorKind::StateConflict,
            Error::Io(_) | Error::Json(_) | Error::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether a caller may reasonably retry the failed operation.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            Error::ProviderUnavailable(_) | Error::Timeout(_)
        )
    }

    /// Convert to the structured form handed to the request layer.
    pub fn to_wire(&self) -> WireError {
        WireError {
            kind: self.kind(),
            message: self.to_string(),
            retryable: self.retryable(),
        }
    }
}

/// Structured error surfaced at the component boundary.
///
/// The request layer maps `kind` to stable user-facing strings; the core
/// only ever emits this form.
#[derive(Debug, Clone, Serialize)]
pub struct WireError {
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_mapping() {
        assert_eq!(Error::Validation("x".into()).kind(), ErrorKind::Validation);
        assert_eq!(Error::NotFound("x".into()).kind(), ErrorKind::NotFound);
        assert_eq!(
            Error::StateConflict("x".into()).kind(),
            ErrorKind::StateConflict
        );
        assert_eq!(Error::Internal("x".into()).kind(), ErrorKind::Internal);
    }

    #[test]
    fn retryable_classes() {
        assert!(Error::Timeout("t".into()).retryable());
        assert!(Error::ProviderUnavailable("p".into()).retryable());
        assert!(!Error::Validation("v".into()).retryable());
        assert!(!Error::StateConflict("s".into()).retryable());
    }

    #[test]
    fn wire_form_carries_tag() {
        let wire = Error::Timeout("dev server not ready".into()).to_wire();
        assert_eq!(wire.kind, ErrorKind::Timeout);
        assert!(wire.retryable);
        assert!(wire.message.contains("dev server not ready"));
    }
}
