use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, instrument};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum OllamaError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] Box<ureq::Error>),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Connection refused - is Ollama running?")]
    ConnectionRefused,
    #[error("Ollama returned {status}: {message}")]
    Api { status: u16, message: String },
}

impl OllamaError {
    pub fn status(&self) -> Option<u16> {
        match self {
            OllamaError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OllamaModelDetails {
    #[serde(default)]
    pub format: String,
    #[serde(default)]
    pub family: String,
    #[serde(default)]
    pub parameter_size: String,
    #[serde(default)]
    pub quantization_level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OllamaShowResponse {
    #[serde(default)]
    pub modelfile: String,
    #[serde(default)]
    pub parameters: String,
    #[serde(default)]
    pub template: String,
    pub details: OllamaModelDetails,
}

#[derive(Debug, Deserialize)]
struct VersionResponse {
    version: String,
}

#[derive(Serialize)]
struct ShowRequest<'a> {
    model: &'a str,
}

#[derive(Serialize)]
struct KeepAliveRequest<'a> {
    model: &'a str,
    keep_alive: i32,
}

/// Model-level defaults baked in at create time
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ModelParameters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_ctx: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_gpu: Option<u32>,
}

impl ModelParameters {
    fn is_empty(&self) -> bool {
        self.num_ctx.is_none() && self.num_gpu.is_none()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CreateRequest {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    /// filename -> "sha256:<hex>" of an uploaded blob
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub files: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub adapters: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantize: Option<String>,
    #[serde(skip_serializing_if = "ModelParameters::is_empty")]
    pub parameters: ModelParameters,
    pub stream: bool,
}

/// Entry of `/api/ps`: a model currently held in memory
#[derive(Debug, Clone, Deserialize)]
pub struct RunningModel {
    pub name: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub size: u64,
    /// Bytes of the model resident in accelerator memory
    #[serde(default)]
    pub size_vram: u64,
}

#[derive(Debug, Deserialize)]
struct RunningModelsResponse {
    #[serde(default)]
    models: Vec<RunningModel>,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GenerateOptions {
    pub temperature: f32,
    pub top_p: f32,
    pub num_predict: u32,
}

#[derive(Debug, Serialize)]
pub struct GenerateRequest<'a> {
    pub model: &'a str,
    pub prompt: &'a str,
    /// Skip the model's prompt template
    pub raw: bool,
    pub stream: bool,
    pub options: GenerateOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ChatRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [ChatMessage],
    pub stream: bool,
    pub options: GenerateOptions,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenerateResponse {
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub eval_count: Option<u64>,
    #[serde(default)]
    pub prompt_eval_count: Option<u64>,
    #[serde(default)]
    pub total_duration: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    pub message: ChatMessage,
    #[serde(default)]
    pub eval_count: Option<u64>,
    #[serde(default)]
    pub prompt_eval_count: Option<u64>,
    #[serde(default)]
    pub total_duration: Option<u64>,
}

/// Blocking client for the Ollama HTTP API
#[derive(Debug, Clone)]
pub struct OllamaClient {
    host: String,
}

impl OllamaClient {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn default_host() -> Self {
        Self::new(promptlab_core::DEFAULT_OLLAMA_HOST)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    #[instrument(skip(self), fields(host = %self.host))]
    pub fn version(&self) -> Result<String, OllamaError> {
        let url = format!("{}/api/version", self.host);
        let response = ureq::get(&url)
            .timeout(REQUEST_TIMEOUT)
            .call()
            .map_err(|e| map_ureq_error(e, "Connection refused - Ollama not running?"))?;

        let version: VersionResponse = response.into_json()?;
        debug!(version = %version.version, "Ollama reachable");
        Ok(version.version)
    }

    /// Get detailed model information
    #[instrument(skip(self), fields(model = %model))]
    pub fn show_model(&self, model: &str) -> Result<OllamaShowResponse, OllamaError> {
        let url = format!("{}/api/show", self.host);
        let response = ureq::post(&url)
            .timeout(REQUEST_TIMEOUT)
            .send_json(ShowRequest { model })
            .map_err(|e| map_ureq_error(e, "Connection refused"))?;

        let show: OllamaShowResponse = response.into_json()?;
        info!(model, "Fetched model details");
        Ok(show)
    }

    #[instrument(skip(self))]
    pub fn has_blob(&self, digest: &str) -> Result<bool, OllamaError> {
        let url = format!("{}/api/blobs/{}", self.host, digest);
        match ureq::head(&url).timeout(REQUEST_TIMEOUT).call() {
            Ok(_) => Ok(true),
            Err(ureq::Error::Status(404, _)) => Ok(false),
            Err(e) => Err(map_ureq_error(e, "Connection refused")),
        }
    }

    /// Upload a file as a content-addressed blob. No timeout: files are large.
    #[instrument(skip(self, path), fields(path = %path.display()))]
    pub fn push_blob(&self, digest: &str, path: &Path) -> Result<(), OllamaError> {
        let url = format!("{}/api/blobs/{}", self.host, digest);
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        info!(size, "Uploading blob to Ollama");

        ureq::post(&url)
            .set("Content-Type", "application/octet-stream")
            .set("Content-Length", &size.to_string())
            .send(file)
            .map_err(|e| map_ureq_error(e, "Connection refused"))?;

        debug!("Blob uploaded");
        Ok(())
    }

    #[instrument(skip(self, request), fields(model = %request.model))]
    pub fn create_model(&self, request: &CreateRequest) -> Result<(), OllamaError> {
        let url = format!("{}/api/create", self.host);
        info!(from = ?request.from, quantize = ?request.quantize, "Creating model");

        let response = ureq::post(&url)
            .send_json(request)
            .map_err(|e| map_ureq_error(e, "Connection refused"))?;

        let status: StatusResponse = response.into_json()?;
        if status.status != "success" {
            return Err(OllamaError::Api {
                status: 200,
                message: format!("create finished with status {}", status.status),
            });
        }

        info!("Model created");
        Ok(())
    }

    /// Load a model into memory and keep it there until unloaded
    #[instrument(skip(self), fields(model = %model))]
    pub fn preload(&self, model: &str) -> Result<(), OllamaError> {
        let url = format!("{}/api/generate", self.host);
        info!("Preloading model");

        ureq::post(&url)
            .send_json(KeepAliveRequest {
                model,
                keep_alive: -1,
            })
            .map_err(|e| map_ureq_error(e, "Connection refused"))?;

        Ok(())
    }

    /// Models in memory and how much of each is offloaded
    #[instrument(skip(self), fields(host = %self.host))]
    pub fn running_models(&self) -> Result<Vec<RunningModel>, OllamaError> {
        let url = format!("{}/api/ps", self.host);
        let response = ureq::get(&url)
            .timeout(REQUEST_TIMEOUT)
            .call()
            .map_err(|e| map_ureq_error(e, "Connection refused"))?;

        let running: RunningModelsResponse = response.into_json()?;
        debug!(count = running.models.len(), "Listed running models");
        Ok(running.models)
    }

    /// Blocks until the whole completion is available
    #[instrument(skip(self, request), fields(model = %request.model, raw = request.raw))]
    pub fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, OllamaError> {
        let url = format!("{}/api/generate", self.host);
        debug!(options = ?request.options, "Generating");

        let response = ureq::post(&url)
            .send_json(request)
            .map_err(|e| map_ureq_error(e, "Connection refused"))?;

        let generated: GenerateResponse = response.into_json()?;
        debug!(eval_count = ?generated.eval_count, "Generation finished");
        Ok(generated)
    }

    #[instrument(skip(self, request), fields(model = %request.model))]
    pub fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, OllamaError> {
        let url = format!("{}/api/chat", self.host);
        debug!(options = ?request.options, "Chatting");

        let response = ureq::post(&url)
            .send_json(request)
            .map_err(|e| map_ureq_error(e, "Connection refused"))?;

        let chat: ChatResponse = response.into_json()?;
        debug!(eval_count = ?chat.eval_count, "Chat finished");
        Ok(chat)
    }

    /// Unload a model from memory by setting keep_alive to 0
    #[instrument(skip(self), fields(model = %model))]
    pub fn unload_model(&self, model: &str) -> Result<(), OllamaError> {
        let url = format!("{}/api/generate", self.host);
        info!("Unloading model");

        ureq::post(&url)
            .timeout(REQUEST_TIMEOUT)
            .send_json(KeepAliveRequest {
                model,
                keep_alive: 0,
            })
            .map_err(|e| map_ureq_error(e, "Connection refused"))?;

        info!(model, "Model unloaded");
        Ok(())
    }
}

impl Default for OllamaClient {
    fn default() -> Self {
        Self::default_host()
    }
}

/// Map ureq errors to OllamaError, detecting connection failures
fn map_ureq_error(e: ureq::Error, context: &str) -> OllamaError {
    match e {
        ureq::Error::Status(status, response) => {
            let body = response.into_string().unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorBody>(&body)
                .map(|b| b.error)
                .unwrap_or(body);
            error!(status, %message, "Ollama API error");
            OllamaError::Api { status, message }
        }
        ureq::Error::Transport(ref t) if t.kind() == ureq::ErrorKind::ConnectionFailed => {
            error!("{}", context);
            OllamaError::ConnectionRefused
        }
        e => {
            error!("HTTP error: {}", e);
            OllamaError::Http(Box::new(e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn options() -> GenerateOptions {
        GenerateOptions {
            temperature: 1.0,
            top_p: 0.9,
            num_predict: 128,
        }
    }

    #[test]
    fn test_generate_request_shape() {
        let request = GenerateRequest {
            model: "promptlab/model:abc",
            prompt: "Once upon a time",
            raw: true,
            stream: false,
            options: options(),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["raw"], true);
        assert_eq!(value["stream"], false);
        assert_eq!(value["options"]["num_predict"], 128);
        assert_eq!(value["options"]["temperature"], 1.0);
    }

    #[test]
    fn test_chat_request_shape() {
        let messages = [ChatMessage::user("hi")];
        let request = ChatRequest {
            model: "m",
            messages: &messages,
            stream: false,
            options: options(),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["messages"], json!([{"role": "user", "content": "hi"}]));
    }

    #[test]
    fn test_create_request_omits_empty_fields() {
        let mut files = BTreeMap::new();
        files.insert("model.gguf".to_string(), "sha256:abc".to_string());
        let request = CreateRequest {
            model: "promptlab/model:abc".to_string(),
            files,
            ..Default::default()
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({
                "model": "promptlab/model:abc",
                "files": {"model.gguf": "sha256:abc"},
                "stream": false
            })
        );
    }

    #[test]
    fn test_create_request_with_adapter_and_parameters() {
        let mut adapters = BTreeMap::new();
        adapters.insert("adapter.gguf".to_string(), "sha256:def".to_string());
        let request = CreateRequest {
            model: "promptlab/model-lora:def".to_string(),
            from: Some("promptlab/model:abc".to_string()),
            adapters,
            parameters: ModelParameters {
                num_ctx: Some(4096),
                num_gpu: Some(0),
            },
            ..Default::default()
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["from"], "promptlab/model:abc");
        assert_eq!(value["adapters"]["adapter.gguf"], "sha256:def");
        assert_eq!(value["parameters"], json!({"num_ctx": 4096, "num_gpu": 0}));
        assert!(value.get("files").is_none());
    }

    #[test]
    fn test_host_trailing_slash_trimmed() {
        assert_eq!(OllamaClient::new("http://h:11434/").host(), "http://h:11434");
    }
}
