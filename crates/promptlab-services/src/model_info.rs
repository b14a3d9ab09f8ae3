use std::time::Duration;

use promptlab_core::{ArtifactInfo, Credential};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::loader::ModelHandle;
use crate::{OllamaClient, OllamaShowResponse};

const HUB_API: &str = "https://huggingface.co/api/models";
const INFO_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything known about a loaded model, for display
#[derive(Debug, Clone, Default, Serialize)]
pub struct ModelInfo {
    pub runtime_name: String,
    pub device: String,
    pub artifact: ArtifactInfo,
    pub adapter_of: Option<String>,
    // Runtime metadata
    pub parameter_size: Option<String>,
    pub quantization: Option<String>,
    pub family: Option<String>,
    pub format: Option<String>,
    // Hub metadata
    pub hf_repo: Option<String>,
    pub hf_downloads: Option<u64>,
    pub hf_likes: Option<u64>,
    pub hf_license: Option<String>,
    pub hf_author: Option<String>,
    pub hf_pipeline: Option<String>,
    pub hf_gated: Option<String>,
    pub hf_last_modified: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HfModelResponse {
    id: Option<String>,
    downloads: Option<u64>,
    likes: Option<u64>,
    author: Option<String>,
    pipeline_tag: Option<String>,
    gated: Option<serde_json::Value>,
    #[serde(rename = "lastModified")]
    last_modified: Option<String>,
    #[serde(rename = "cardData")]
    card_data: Option<HfCardData>,
}

#[derive(Debug, Deserialize)]
struct HfCardData {
    license: Option<String>,
}

impl ModelInfo {
    fn apply_runtime(&mut self, resp: &OllamaShowResponse) {
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
        self.parameter_size = non_empty(&resp.details.parameter_size);
        self.quantization = non_empty(&resp.details.quantization_level);
        self.family = non_empty(&resp.details.family);
        self.format = non_empty(&resp.details.format);
    }

    fn apply_hub(&mut self, hf: HfModelResponse) {
        let gated = hf.gated.and_then(|v| match v {
            serde_json::Value::Bool(b) => b.then_some("Yes".to_string()),
            serde_json::Value::String(s) => Some(s),
            _ => None,
        });

        self.hf_repo = hf.id;
        self.hf_downloads = hf.downloads;
        self.hf_likes = hf.likes;
        self.hf_license = hf.card_data.and_then(|c| c.license);
        self.hf_author = hf.author;
        self.hf_pipeline = hf.pipeline_tag;
        self.hf_gated = gated;
        self.hf_last_modified = hf
            .last_modified
            .map(|s| s.split('T').next().unwrap_or(&s).to_string());
    }

    pub fn hf_url(&self) -> Option<String> {
        self.hf_repo
            .as_ref()
            .map(|repo| format!("https://huggingface.co/{}", repo))
    }
}

/// Collects model details from the runtime and the hub. Lookups are best
/// effort: a failed lookup leaves its fields empty.
pub struct ModelInfoService {
    ollama: OllamaClient,
    credential: Option<Credential>,
}

impl ModelInfoService {
    pub fn new(ollama: OllamaClient, credential: Option<Credential>) -> Self {
        Self { ollama, credential }
    }

    pub fn describe(&self, handle: &ModelHandle) -> ModelInfo {
        let mut info = ModelInfo {
            runtime_name: handle.name().to_string(),
            device: handle.device().label().to_string(),
            artifact: handle.artifact().clone(),
            adapter_of: handle.base().map(|b| b.name().to_string()),
            ..Default::default()
        };

        match self.ollama.show_model(handle.name()) {
            Ok(resp) => info.apply_runtime(&resp),
            Err(e) => warn!(model = %handle.name(), "Runtime details unavailable: {}", e),
        }

        let repo = match &handle.config().adapter {
            Some(adapter) => &adapter.repo_id,
            None => &handle.config().base.repo_id,
        };
        if let Some(hf) = self.fetch_hf_by_repo(repo) {
            info.apply_hub(hf);
        }

        info
    }

    fn fetch_hf_by_repo(&self, repo: &str) -> Option<HfModelResponse> {
        let url = format!("{}/{}", HUB_API, repo);
        debug!("Fetching hub metadata: {}", url);

        let mut request = ureq::get(&url).timeout(INFO_TIMEOUT);
        // private repos answer 401 without the token
        if let Some(credential) = &self.credential {
            request = request.set("Authorization", &format!("Bearer {}", credential.expose()));
        }

        let response = request
            .call()
            .map_err(|e| debug!(repo, "Hub metadata unavailable: {}", e))
            .ok()?;
        response.into_json().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hub_metadata_parsing() {
        let hf: HfModelResponse = serde_json::from_str(
            r#"{
                "id": "Jeppcode/ScalableLab2",
                "author": "Jeppcode",
                "downloads": 42,
                "likes": 3,
                "gated": false,
                "lastModified": "2025-12-01T10:11:12.000Z",
                "cardData": {"license": "apache-2.0"}
            }"#,
        )
        .unwrap();

        let mut info = ModelInfo::default();
        info.apply_hub(hf);

        assert_eq!(info.hf_repo.as_deref(), Some("Jeppcode/ScalableLab2"));
        assert_eq!(info.hf_gated, None);
        assert_eq!(info.hf_last_modified.as_deref(), Some("2025-12-01"));
        assert_eq!(info.hf_license.as_deref(), Some("apache-2.0"));
        assert_eq!(
            info.hf_url().as_deref(),
            Some("https://huggingface.co/Jeppcode/ScalableLab2")
        );
    }

    #[test]
    fn test_gated_string_is_kept() {
        let hf: HfModelResponse =
            serde_json::from_str(r#"{"id": "meta-llama/Llama-3.2-1B", "gated": "manual"}"#)
                .unwrap();
        let mut info = ModelInfo::default();
        info.apply_hub(hf);
        assert_eq!(info.hf_gated.as_deref(), Some("manual"));
    }

    #[test]
    fn test_empty_runtime_fields_stay_unset() {
        let resp: OllamaShowResponse = serde_json::from_str(
            r#"{"details": {"family": "llama", "parameter_size": "1.2B", "quantization_level": ""}}"#,
        )
        .unwrap();
        let mut info = ModelInfo::default();
        info.apply_runtime(&resp);
        assert_eq!(info.family.as_deref(), Some("llama"));
        assert_eq!(info.quantization, None);
    }
}
