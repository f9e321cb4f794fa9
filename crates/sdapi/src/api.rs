//! REST API client for the `sdapi/v1` HTTP endpoints.
//!
//! Wraps generation submission, progress polling, interruption and the
//! server catalogues (models, samplers, styles, scripts) using [`reqwest`].

use std::time::Duration;

use cyanic_core::backend::BackendProfile;
use cyanic_core::result::ResultSet;
use cyanic_core::types::{Mapping, ProgressSnapshot, RequestKind};
use serde::de::DeserializeOwned;

use crate::messages::{
    self, FaceRestorer, Lora, ProgressResponse, PromptStyle, Sampler, ScriptList, SdModel, SdVae,
    Upscaler,
};

/// Path prefix of every API endpoint.
const SDAPI_PREFIX: &str = "/sdapi/v1";

/// Bound on establishing a connection to the server.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Bound on the short control calls (progress, interrupt, catalogues).
/// Generation requests run as long as the server needs.
const CONTROL_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client for a single A1111 or SD.Next server.
#[derive(Debug, Clone)]
pub struct SdApi {
    client: reqwest::Client,
    base_url: String,
}

/// Errors from the REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum SdApiError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The server returned a non-2xx status code.
    #[error("Server API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The body was JSON but not the shape the endpoint documents.
    #[error("Malformed response: {0}")]
    Malformed(String),
}

impl SdApi {
    /// Create a client for the server at `host`, e.g.
    /// `http://127.0.0.1:7860`. A trailing `/sdapi/v1` or `/docs` is ignored.
    pub fn new(host: &str) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Cannot configure HTTP client, using defaults");
                reqwest::Client::new()
            });
        Self::with_client(client, host)
    }

    /// Create a client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, host: &str) -> Self {
        Self {
            client,
            base_url: normalize_base_url(host),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Full URL of an API endpoint.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{SDAPI_PREFIX}/{}", self.base_url, path.trim_start_matches('/'))
    }

    // ---- generation ----

    /// Submit a request and wait for its Result Set.
    ///
    /// Sends `POST /sdapi/v1/<kind>`; the call returns once generation
    /// finishes (or is interrupted) on the server.
    pub async fn submit(&self, kind: RequestKind, payload: &Mapping) -> Result<ResultSet, SdApiError> {
        let url = self.endpoint(kind.endpoint());
        tracing::debug!(%url, %kind, fields = payload.len(), "Submitting request");
        let response = self.client.post(&url).json(payload).send().await?;
        let body: serde_json::Value = Self::parse_response(response).await?;
        messages::parse_result(kind, body)
            .map_err(|e| SdApiError::Malformed(format!("{kind} response: {e}")))
    }

    pub async fn txt2img(&self, payload: &Mapping) -> Result<ResultSet, SdApiError> {
        self.submit(RequestKind::TextToImage, payload).await
    }

    pub async fn img2img(&self, payload: &Mapping) -> Result<ResultSet, SdApiError> {
        self.submit(RequestKind::ImageToImage, payload).await
    }

    pub async fn extra_single_image(&self, payload: &Mapping) -> Result<ResultSet, SdApiError> {
        self.submit(RequestKind::Extra, payload).await
    }

    pub async fn interrogate(&self, payload: &Mapping) -> Result<ResultSet, SdApiError> {
        self.submit(RequestKind::Interrogate, payload).await
    }

    /// Progress of the job currently running on the server, including the
    /// live preview image.
    pub async fn progress(&self) -> Result<ProgressSnapshot, SdApiError> {
        let response = self
            .client
            .get(self.endpoint("progress"))
            .query(&[("skip_current_image", "false")])
            .timeout(CONTROL_TIMEOUT)
            .send()
            .await?;
        let progress: ProgressResponse = Self::parse_response(response).await?;
        Ok(progress.into())
    }

    /// Stop the running job. The pending generation call still returns.
    pub async fn interrupt(&self) -> Result<(), SdApiError> {
        self.post_empty("interrupt").await
    }

    /// Skip the current image of a batch.
    pub async fn skip(&self) -> Result<(), SdApiError> {
        self.post_empty("skip").await
    }

    // ---- server state ----

    /// The server's option table.
    pub async fn options(&self) -> Result<Mapping, SdApiError> {
        self.get_json("options").await
    }

    /// Fetch the options and work out which flavor the server is.
    pub async fn detect_profile(&self) -> Result<BackendProfile, SdApiError> {
        let options = self.options().await?;
        Ok(BackendProfile::detect(&options))
    }

    pub async fn samplers(&self) -> Result<Vec<Sampler>, SdApiError> {
        self.get_json("samplers").await
    }

    pub async fn sd_models(&self) -> Result<Vec<SdModel>, SdApiError> {
        self.get_json("sd-models").await
    }

    pub async fn sd_vaes(&self) -> Result<Vec<SdVae>, SdApiError> {
        self.get_json("sd-vae").await
    }

    pub async fn upscalers(&self) -> Result<Vec<Upscaler>, SdApiError> {
        self.get_json("upscalers").await
    }

    pub async fn face_restorers(&self) -> Result<Vec<FaceRestorer>, SdApiError> {
        self.get_json("face-restorers").await
    }

    pub async fn prompt_styles(&self) -> Result<Vec<PromptStyle>, SdApiError> {
        self.get_json("prompt-styles").await
    }

    pub async fn scripts(&self) -> Result<ScriptList, SdApiError> {
        self.get_json("scripts").await
    }

    pub async fn loras(&self) -> Result<Vec<Lora>, SdApiError> {
        self.get_json("loras").await
    }

    /// Whether an extension script is installed, ignoring case.
    pub async fn scripts_include(&self, name: &str) -> Result<bool, SdApiError> {
        Ok(self.scripts().await?.includes(name))
    }

    /// Combined `(prompt, negative_prompt)` of the named styles.
    pub async fn style_prompts(&self, names: &[String]) -> Result<(String, String), SdApiError> {
        if names.is_empty() {
            return Ok((String::new(), String::new()));
        }
        let styles = self.prompt_styles().await?;
        Ok(messages::style_prompts(&styles, names))
    }

    // ---- private helpers ----

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, SdApiError> {
        let response = self
            .client
            .get(self.endpoint(path))
            .timeout(CONTROL_TIMEOUT)
            .send()
            .await?;
        Self::parse_response(response).await
    }

    async fn post_empty(&self, path: &str) -> Result<(), SdApiError> {
        let response = self
            .client
            .post(self.endpoint(path))
            .json(&serde_json::json!({}))
            .timeout(CONTROL_TIMEOUT)
            .send()
            .await?;
        Self::check_status(response).await
    }

    /// Turn a non-2xx response into [`SdApiError::ApiError`].
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, SdApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(SdApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    ///
    /// A body that is JSON of the wrong shape is [`SdApiError::Malformed`],
    /// not a transport failure.
    async fn parse_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, SdApiError> {
        let response = Self::ensure_success(response).await?;
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| SdApiError::Malformed(e.to_string()))
    }

    /// Assert the response has a success status code, discarding the body.
    async fn check_status(response: reqwest::Response) -> Result<(), SdApiError> {
        Self::ensure_success(response).await?;
        Ok(())
    }
}

/// Strip whitespace, trailing slashes and any trailing `/docs`,
/// `/sdapi/v1` or `/sdapi` segments from a user-entered host.
pub fn normalize_base_url(host: &str) -> String {
    let mut normalized = host.trim().trim_end_matches('/').to_string();
    loop {
        let stripped = normalized
            .strip_suffix("/docs")
            .or_else(|| normalized.strip_suffix(SDAPI_PREFIX))
            .or_else(|| normalized.strip_suffix("/sdapi"));
        let Some(value) = stripped else {
            return normalized;
        };
        normalized = value.trim_end_matches('/').to_string();
    }
}
