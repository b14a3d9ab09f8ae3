use serde::{Deserialize, Serialize};

use super::SamplingLimits;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    pub temperature: f32,
    pub top_p: f32,
    pub max_new_tokens: u32,
}

impl Default for SamplingParams {
    fn default() -> Self {
        SamplingLimits::default().defaults()
    }
}

/// One prompt plus the sampling parameters to run it with.
///
/// Values are forwarded to the runtime untouched. Range checks belong to
/// whoever collects them from a user (see [`SamplingLimits::validate`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    #[serde(flatten)]
    pub params: SamplingParams,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>, params: SamplingParams) -> Self {
        Self {
            prompt: prompt.into(),
            params,
        }
    }
}
