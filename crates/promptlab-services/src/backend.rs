//! Seam between PromptLab and whatever actually runs the model

use std::path::Path;

use promptlab_core::{Device, LoadOptions, SamplingParams};
use thiserror::Error;

use crate::ollama::{ChatMessage, OllamaError};

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Model not found in runtime: {0}")]
    ModelNotFound(String),
    #[error("Runtime rejected the request: {0}")]
    Rejected(String),
    #[error("Runtime unavailable: {0}")]
    Unavailable(String),
    #[error("Runtime error: {0}")]
    Failed(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<OllamaError> for BackendError {
    fn from(err: OllamaError) -> Self {
        match err {
            OllamaError::Api { status: 404, message } => BackendError::ModelNotFound(message),
            OllamaError::Api { status, message } if (400..500).contains(&status) => {
                BackendError::Rejected(message)
            }
            OllamaError::ConnectionRefused => {
                BackendError::Unavailable("connection refused - is Ollama running?".to_string())
            }
            OllamaError::Io(e) => BackendError::Io(e),
            other => BackendError::Failed(other.to_string()),
        }
    }
}

/// A model registered with the runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeModel {
    /// Name the runtime knows the model by
    pub name: String,
    /// sha256 of the artifact the model was built from
    pub digest: String,
}

/// Prompt after encoding for the model's expected input
#[derive(Debug, Clone, PartialEq)]
pub enum EncodedPrompt {
    Raw(String),
    Chat(Vec<ChatMessage>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub tokens_generated: u32,
    pub prompt_tokens: u32,
}

pub trait InferenceBackend: Send + Sync {
    /// Make a local artifact loadable under a runtime name
    fn register(
        &self,
        artifact: &Path,
        options: &LoadOptions,
        device: Device,
    ) -> Result<RuntimeModel, BackendError>;

    /// Compose an adapter on top of a registered base, leaving the base intact
    fn apply_adapter(
        &self,
        base: &RuntimeModel,
        adapter: &Path,
        options: &LoadOptions,
        device: Device,
    ) -> Result<RuntimeModel, BackendError>;

    /// Bring the model into memory. Returns where the runtime put it, when
    /// it can tell.
    fn place(&self, model: &RuntimeModel) -> Result<Option<Device>, BackendError>;

    /// Run the model; may return several candidates
    fn generate(
        &self,
        model: &RuntimeModel,
        prompt: &EncodedPrompt,
        params: &SamplingParams,
    ) -> Result<Vec<Completion>, BackendError>;

    fn unload(&self, model: &RuntimeModel) -> Result<(), BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ollama_errors_map_by_status() {
        let not_found = OllamaError::Api {
            status: 404,
            message: "model 'x' not found".into(),
        };
        assert!(matches!(
            BackendError::from(not_found),
            BackendError::ModelNotFound(_)
        ));

        let bad = OllamaError::Api {
            status: 400,
            message: "quantization is only supported for F16 and F32 models".into(),
        };
        assert!(matches!(BackendError::from(bad), BackendError::Rejected(_)));

        let server = OllamaError::Api {
            status: 500,
            message: "out of memory".into(),
        };
        assert!(matches!(BackendError::from(server), BackendError::Failed(_)));

        assert!(matches!(
            BackendError::from(OllamaError::ConnectionRefused),
            BackendError::Unavailable(_)
        ));
    }
}
