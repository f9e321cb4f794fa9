//! Response types for the `sdapi/v1` endpoints and their conversion into
//! core [`ResultSet`]s and [`ProgressSnapshot`]s.
//!
//! Generation endpoints return `{"images": [...], "parameters": {...},
//! "info": "<json string>"}`; extras return a single `image`; interrogation
//! returns a `caption`. All of them end up as a [`ResultSet`].

use cyanic_core::result::{GenerationInfo, ResultSet};
use cyanic_core::types::{Mapping, ProgressSnapshot, RequestKind};
use serde::Deserialize;

// ---------------------------------------------------------------------------
// Generation results
// ---------------------------------------------------------------------------

/// `info` is a JSON document encoded as a string on both A1111 and SD.Next,
/// but some forks send the object directly.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawInfo {
    Object(GenerationInfo),
    Text(String),
}

/// Response of `txt2img` and `img2img`.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerationResponse {
    #[serde(default)]
    pub images: Option<Vec<String>>,
    /// The request parameters as the server understood them.
    #[serde(default)]
    pub parameters: Option<Mapping>,
    #[serde(default)]
    pub info: Option<RawInfo>,
}

impl GenerationResponse {
    pub fn into_result_set(self) -> ResultSet {
        ResultSet {
            images: self.images.unwrap_or_default(),
            info: self.info.and_then(decode_info),
            parameters: self.parameters,
            caption: None,
        }
    }
}

/// Response of `extra-single-image`.
#[derive(Debug, Clone, Deserialize)]
pub struct ExtraResponse {
    pub image: String,
    #[serde(default)]
    pub html_info: Option<String>,
}

/// Response of `interrogate`.
#[derive(Debug, Clone, Deserialize)]
pub struct InterrogateResponse {
    pub caption: String,
}

/// Parse the JSON body of a `kind` request into a Result Set.
///
/// Returns `Err` when required fields are missing or mistyped.
pub fn parse_result(kind: RequestKind, body: serde_json::Value) -> Result<ResultSet, serde_json::Error> {
    match kind {
        RequestKind::TextToImage | RequestKind::ImageToImage => {
            let response: GenerationResponse = serde_json::from_value(body)?;
            Ok(response.into_result_set())
        }
        RequestKind::Extra => {
            let response: ExtraResponse = serde_json::from_value(body)?;
            Ok(ResultSet {
                images: vec![response.image],
                ..Default::default()
            })
        }
        RequestKind::Interrogate => {
            let response: InterrogateResponse = serde_json::from_value(body)?;
            Ok(ResultSet {
                caption: Some(response.caption),
                ..Default::default()
            })
        }
    }
}

fn decode_info(raw: RawInfo) -> Option<GenerationInfo> {
    match raw {
        RawInfo::Object(info) => Some(info),
        RawInfo::Text(text) if text.trim().is_empty() => None,
        RawInfo::Text(text) => match serde_json::from_str::<GenerationInfo>(&text) {
            Ok(info) => Some(info),
            Err(e) => {
                // Keep the raw text so the caller can still show it.
                tracing::warn!(error = %e, "Generation info is not JSON");
                Some(GenerationInfo {
                    infotexts: vec![text],
                    ..Default::default()
                })
            }
        },
    }
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Response of `GET /sdapi/v1/progress`.
#[derive(Debug, Clone, Deserialize)]
pub struct ProgressResponse {
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub eta_relative: f64,
    #[serde(default)]
    pub state: ProgressState,
    /// Base64 preview of the image being generated.
    #[serde(default)]
    pub current_image: Option<String>,
    #[serde(default)]
    pub textinfo: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProgressState {
    #[serde(default)]
    pub skipped: bool,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub job: String,
    #[serde(default)]
    pub job_count: i64,
    #[serde(default)]
    pub sampling_step: i64,
    #[serde(default)]
    pub sampling_steps: i64,
}

impl From<ProgressResponse> for ProgressSnapshot {
    fn from(response: ProgressResponse) -> Self {
        let fraction = if response.progress.is_finite() {
            response.progress.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            fraction,
            preview_image: response.current_image.filter(|image| !image.is_empty()),
            terminal: response.state.interrupted || response.state.skipped,
        }
    }
}

// ---------------------------------------------------------------------------
// Server catalogues
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct Sampler {
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SdModel {
    pub title: String,
    pub model_name: String,
    #[serde(default)]
    pub hash: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SdVae {
    pub model_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Upscaler {
    pub name: String,
    #[serde(default)]
    pub scale: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FaceRestorer {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Lora {
    pub name: String,
    #[serde(default)]
    pub alias: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PromptStyle {
    pub name: String,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub negative_prompt: Option<String>,
}

/// Installed scripts, split by the endpoint they apply to.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScriptList {
    #[serde(default)]
    pub txt2img: Vec<String>,
    #[serde(default)]
    pub img2img: Vec<String>,
}

impl ScriptList {
    /// Whether a script called `name` is installed for either endpoint,
    /// ignoring case.
    pub fn includes(&self, name: &str) -> bool {
        let wanted = name.to_lowercase();
        self.txt2img
            .iter()
            .chain(&self.img2img)
            .any(|script| script.to_lowercase() == wanted)
    }
}

/// Positive and negative prompts of the styles named in `names`, each
/// joined with `", "` in server order. Styles without a prompt are skipped.
pub fn style_prompts(styles: &[PromptStyle], names: &[String]) -> (String, String) {
    let selected: Vec<&PromptStyle> = styles.iter().filter(|s| names.contains(&s.name)).collect();
    (
        join_non_empty(selected.iter().map(|s| s.prompt.as_deref())),
        join_non_empty(selected.iter().map(|s| s.negative_prompt.as_deref())),
    )
}

fn join_non_empty<'a>(parts: impl Iterator<Item = Option<&'a str>>) -> String {
    parts
        .flatten()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}
