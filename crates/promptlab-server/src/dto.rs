use promptlab_core::{
    ArtifactInfo, GenerationRequest, LoadStatus, SamplingLimits, SamplingParams,
};
use serde::{Deserialize, Serialize};

/// Slider values as the page posts them
#[derive(Debug, Deserialize)]
pub struct GenerateBody {
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
}

impl From<GenerateBody> for GenerationRequest {
    fn from(body: GenerateBody) -> Self {
        GenerationRequest::new(
            body.prompt,
            SamplingParams {
                temperature: body.temperature,
                top_p: body.top_p,
                max_new_tokens: body.max_tokens,
            },
        )
    }
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub profile: &'static str,
    pub title: &'static str,
    pub model: String,
    pub status: LoadStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<ArtifactInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_ms: Option<u64>,
    pub limits: SamplingLimits,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}
