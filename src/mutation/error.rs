use crate::{
    mutation::state::IllegalTransition,
    remote::RemoteError,
    runtime::handle::RuntimeError,
    types::QueryKey,
    validate::FieldError,
};

/// Expected failure of a mutation, returned inside a [`super::MutationOutcome`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MutationError {
    /// Client-side rules rejected the request; nothing was sent or cached.
    #[error(
        "validation failed: {}",
        .0.iter().map(|e| format!("{} {}", e.field, e.reason)).collect::<Vec<_>>().join(", ")
    )]
    ValidationFailed(Vec<FieldError>),
    /// Transport failure; the cache was rolled back and a retry may succeed.
    #[error("network unavailable: {0}")]
    NetworkUnavailable(String),
    /// Business error reported by the server; shown verbatim.
    #[error("{0}")]
    ServerRejected(String),
    /// The session is no longer valid.
    #[error("unauthorized")]
    Unauthorized,
}

impl MutationError {
    /// True for transient failures worth a retry prompt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NetworkUnavailable(_))
    }

    /// Field errors of a validation failure; empty otherwise.
    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            Self::ValidationFailed(errors) => errors,
            _ => &[],
        }
    }

    /// Text for a transient notice.
    pub fn user_message(&self) -> String {
        match self {
            Self::ValidationFailed(_) => "Please correct the highlighted fields.".to_string(),
            Self::NetworkUnavailable(_) => {
                "Unable to reach the server. Check your connection and try again.".to_string()
            }
            Self::ServerRejected(message) => message.clone(),
            Self::Unauthorized => "Your session has expired. Please sign in again.".to_string(),
        }
    }
}

impl From<RemoteError> for MutationError {
    fn from(value: RemoteError) -> Self {
        match value {
            RemoteError::NetworkUnavailable(detail) => Self::NetworkUnavailable(detail),
            RemoteError::ServerRejected(message) => Self::ServerRejected(message),
            RemoteError::Unauthorized => Self::Unauthorized,
        }
    }
}

/// Contract violation that aborts a mutation instead of classifying it.
#[derive(Debug, thiserror::Error)]
pub enum ControllerFault {
    /// The cache runtime refused the operation or is gone.
    #[error("cache runtime: {0}")]
    Runtime(#[from] RuntimeError),
    /// A cached value does not decode as the requested type.
    #[error("cached value under {key} has an unexpected shape: {source}")]
    Decode {
        /// Offending key.
        key: QueryKey,
        /// Decoder error.
        source: serde_json::Error,
    },
    /// A request body or transformed value could not be encoded.
    #[error("value could not be encoded: {0}")]
    Encode(#[source] serde_json::Error),
    /// The lifecycle was driven out of order.
    #[error(transparent)]
    Lifecycle(#[from] IllegalTransition),
}
