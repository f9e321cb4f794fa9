use cyanic_core::document::DocumentError;
use cyanic_core::error::CoreError;
use cyanic_sdapi::api::SdApiError;

/// Why a job could not run or did not complete.
///
/// A user cancellation is not an error; it is reported as
/// [`crate::job::JobOutcome::Cancelled`].
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("A job is already in progress")]
    JobInProgress,

    #[error("Cannot reach the generation server: {0}")]
    Connection(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("No document available: {0}")]
    DocumentUnavailable(String),

    #[error("Document error: {0}")]
    Document(DocumentError),

    #[error(transparent)]
    Build(#[from] CoreError),

    #[error("No progress for {seconds} seconds")]
    IdleTimeout { seconds: u64 },

    #[error("Background request failed: {0}")]
    Worker(String),
}

impl From<DocumentError> for OrchestratorError {
    fn from(err: DocumentError) -> Self {
        match err {
            DocumentError::NoDocument => Self::DocumentUnavailable(err.to_string()),
            other => Self::Document(other),
        }
    }
}

impl From<SdApiError> for OrchestratorError {
    fn from(err: SdApiError) -> Self {
        match err {
            SdApiError::Malformed(msg) => Self::MalformedResponse(msg),
            other => Self::Connection(other.to_string()),
        }
    }
}
