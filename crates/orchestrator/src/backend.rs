//! The seam between the executor and the remote service.

use async_trait::async_trait;
use cyanic_core::result::ResultSet;
use cyanic_core::types::{Mapping, ProgressSnapshot, RequestKind};
use cyanic_sdapi::api::SdApi;

use crate::error::OrchestratorError;

/// What the executor needs from a generation server.
///
/// `submit` runs on a spawned task while the executor keeps calling
/// `progress` from its own task, so implementations must allow both at
/// once.
#[async_trait]
pub trait GenerationBackend: Send + Sync + 'static {
    /// Send a normalised payload and wait for its Result Set.
    async fn submit(&self, kind: RequestKind, payload: Mapping) -> Result<ResultSet, OrchestratorError>;

    async fn progress(&self) -> Result<ProgressSnapshot, OrchestratorError>;

    /// Ask the server to stop the current job. Best effort.
    async fn interrupt(&self) -> Result<(), OrchestratorError>;
}

#[async_trait]
impl GenerationBackend for SdApi {
    async fn submit(&self, kind: RequestKind, payload: Mapping) -> Result<ResultSet, OrchestratorError> {
        Ok(SdApi::submit(self, kind, &payload).await?)
    }

    async fn progress(&self) -> Result<ProgressSnapshot, OrchestratorError> {
        Ok(SdApi::progress(self).await?)
    }

    async fn interrupt(&self) -> Result<(), OrchestratorError> {
        Ok(SdApi::interrupt(self).await?)
    }
}
