use std::sync::Arc;
use std::time::Instant;

use promptlab_core::{Comparison, GenerationRequest, GenerationResult, PromptFormat};
use thiserror::Error;
use tracing::{info, instrument};

use crate::backend::{BackendError, EncodedPrompt, InferenceBackend};
use crate::loader::ModelHandle;
use crate::ollama::ChatMessage;

#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("Model {0} is no longer loaded")]
    HandleUnloaded(String),
    #[error(transparent)]
    Runtime(BackendError),
    #[error("Runtime returned no output")]
    NoCandidates,
    #[error("{0} has no base model to compare against")]
    NoBase(String),
}

pub struct GenerationService {
    backend: Arc<dyn InferenceBackend>,
}

impl GenerationService {
    pub fn new(backend: Arc<dyn InferenceBackend>) -> Self {
        Self { backend }
    }

    /// Run one prompt through a loaded model.
    ///
    /// Sampling values go to the runtime exactly as given.
    #[instrument(skip(self, handle, request), fields(
        model = %handle.name(),
        temperature = request.params.temperature,
        top_p = request.params.top_p,
        max_new_tokens = request.params.max_new_tokens,
    ))]
    pub fn generate(
        &self,
        handle: &ModelHandle,
        request: &GenerationRequest,
    ) -> Result<GenerationResult, GenerationError> {
        if handle.is_released() {
            return Err(GenerationError::HandleUnloaded(handle.name().to_string()));
        }

        let prompt = encode(handle.prompt_format(), &request.prompt);
        let start = Instant::now();

        let completions = self
            .backend
            .generate(handle.runtime(), &prompt, &request.params)
            .map_err(|e| match e {
                BackendError::ModelNotFound(_) => {
                    GenerationError::HandleUnloaded(handle.name().to_string())
                }
                other => GenerationError::Runtime(other),
            })?;

        let first = completions
            .into_iter()
            .next()
            .ok_or(GenerationError::NoCandidates)?;

        let result = GenerationResult {
            text: first.text.trim().to_string(),
            model: handle.name().to_string(),
            tokens_generated: first.tokens_generated,
            prompt_tokens: first.prompt_tokens,
            elapsed_ms: start.elapsed().as_millis() as u64,
        };
        info!(%result, "Generation finished");
        Ok(result)
    }

    /// Same request on both models, adapted first, one after the other
    pub fn compare(
        &self,
        adapted: &ModelHandle,
        base: &ModelHandle,
        request: &GenerationRequest,
    ) -> Result<Comparison, GenerationError> {
        let adapted = self.generate(adapted, request)?;
        let base = self.generate(base, request)?;
        Ok(Comparison { adapted, base })
    }

    /// [`compare`](Self::compare) against the handle's own base model
    pub fn compare_with_base(
        &self,
        adapted: &ModelHandle,
        request: &GenerationRequest,
    ) -> Result<Comparison, GenerationError> {
        let base = adapted
            .base()
            .ok_or_else(|| GenerationError::NoBase(adapted.name().to_string()))?;
        self.compare(adapted, base, request)
    }
}

fn encode(format: PromptFormat, prompt: &str) -> EncodedPrompt {
    match format {
        PromptFormat::Raw => EncodedPrompt::Raw(prompt.to_string()),
        PromptFormat::Chat => EncodedPrompt::Chat(vec![ChatMessage::user(prompt)]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use promptlab_core::{
        ArtifactRef, Credential, Device, LoadOptions, ModelConfig, SamplingParams,
        DEFAULT_PROMPT,
    };

    use crate::device::DeviceProbe;
    use crate::loader::ModelLoader;
    use crate::testing::{FakeBackend, FakeHub, VALID_TOKEN};

    fn setup(backend: FakeBackend) -> (Arc<FakeBackend>, ModelLoader, GenerationService) {
        let backend = Arc::new(backend);
        let loader = ModelLoader::new(
            Arc::new(FakeHub::new()),
            backend.clone(),
            Some(Credential::new(VALID_TOKEN).unwrap()),
            DeviceProbe::fixed(Device::Cpu),
        );
        let service = GenerationService::new(backend.clone());
        (backend, loader, service)
    }

    fn base_config() -> ModelConfig {
        ModelConfig::new(ArtifactRef::new("org/model", "model.gguf"))
    }

    fn request(temperature: f32, max_new_tokens: u32) -> GenerationRequest {
        GenerationRequest::new(
            DEFAULT_PROMPT,
            SamplingParams {
                temperature,
                top_p: 0.9,
                max_new_tokens,
            },
        )
    }

    #[test]
    fn test_default_request_end_to_end() {
        let (backend, loader, service) = setup(FakeBackend::new());
        let handle = loader.load(&base_config()).unwrap();

        let req = GenerationRequest::new(DEFAULT_PROMPT, SamplingParams::default());
        let result = service.generate(&handle, &req).unwrap();

        assert!(!result.text.is_empty());
        assert!(result.tokens_generated <= 128);
        assert_eq!(result.model, handle.name());
        assert_eq!(
            backend.last_params(),
            Some(SamplingParams {
                temperature: 1.0,
                top_p: 0.9,
                max_new_tokens: 128,
            })
        );
    }

    #[test]
    fn test_token_budget_is_respected_and_forwarded() {
        let (backend, loader, service) = setup(FakeBackend::new());
        let handle = loader.load(&base_config()).unwrap();

        for n in [1, 5, 32] {
            let result = service.generate(&handle, &request(0.7, n)).unwrap();
            assert!(result.tokens_generated <= n);
            assert_eq!(backend.last_params().unwrap().max_new_tokens, n);
        }
    }

    #[test]
    fn test_params_are_not_clamped() {
        let (backend, loader, service) = setup(FakeBackend::new());
        let handle = loader.load(&base_config()).unwrap();

        let req = GenerationRequest::new(
            "hi",
            SamplingParams {
                temperature: 3.5,
                top_p: 0.01,
                max_new_tokens: 4096,
            },
        );
        service.generate(&handle, &req).unwrap();
        assert_eq!(backend.last_params(), Some(req.params));
    }

    #[test]
    fn test_zero_temperature_is_deterministic() {
        let (_, loader, service) = setup(FakeBackend::new());
        let handle = loader.load(&base_config()).unwrap();

        let a = service.generate(&handle, &request(0.0, 16)).unwrap();
        let b = service.generate(&handle, &request(0.0, 16)).unwrap();
        assert_eq!(a.text, b.text);

        let c = service.generate(&handle, &request(1.0, 16)).unwrap();
        let d = service.generate(&handle, &request(1.0, 16)).unwrap();
        assert_ne!(c.text, d.text);
    }

    #[test]
    fn test_first_candidate_is_selected() {
        let (_, loader, service) = setup(FakeBackend::new().with_candidates(3));
        let handle = loader.load(&base_config()).unwrap();

        let result = service.generate(&handle, &request(1.0, 8)).unwrap();
        assert_eq!(result.text.split_whitespace().next(), Some("sample0.0"));
    }

    #[test]
    fn test_no_candidates() {
        let (_, loader, service) = setup(FakeBackend::new().with_candidates(0));
        let handle = loader.load(&base_config()).unwrap();

        assert!(matches!(
            service.generate(&handle, &request(1.0, 8)),
            Err(GenerationError::NoCandidates)
        ));
    }

    #[test]
    fn test_prompt_format_selects_encoding() {
        let (backend, loader, service) = setup(FakeBackend::new());

        let raw = loader.load(&base_config()).unwrap();
        service.generate(&raw, &request(0.0, 4)).unwrap();
        assert_eq!(
            backend.last_prompt(),
            Some(EncodedPrompt::Raw(DEFAULT_PROMPT.to_string()))
        );

        let chat = loader
            .load(&base_config().with_options(LoadOptions {
                prompt_format: PromptFormat::Chat,
                ..Default::default()
            }))
            .unwrap();
        service.generate(&chat, &request(0.0, 4)).unwrap();
        assert_eq!(
            backend.last_prompt(),
            Some(EncodedPrompt::Chat(vec![ChatMessage::user(DEFAULT_PROMPT)]))
        );
    }

    #[test]
    fn test_released_handle_is_rejected() {
        let (_, loader, service) = setup(FakeBackend::new());
        let handle = loader.load(&base_config()).unwrap();
        loader.release_all();

        assert!(matches!(
            service.generate(&handle, &request(1.0, 8)),
            Err(GenerationError::HandleUnloaded(_))
        ));
    }

    #[test]
    fn test_compare_runs_adapted_then_base() {
        let (backend, loader, service) = setup(FakeBackend::new());
        let adapted = loader
            .load(&base_config().with_adapter(ArtifactRef::new("org/lora", "adapter.gguf")))
            .unwrap();

        let comparison = service
            .compare_with_base(&adapted, &request(0.0, 8))
            .unwrap();

        assert_eq!(comparison.adapted.model, adapted.name());
        assert_eq!(comparison.base.model, adapted.base().unwrap().name());
        assert_ne!(comparison.adapted.text, comparison.base.text);
        assert_eq!(backend.generate_count(), 2);
    }

    #[test]
    fn test_compare_with_base_needs_adapter() {
        let (_, loader, service) = setup(FakeBackend::new());
        let handle = loader.load(&base_config()).unwrap();

        assert!(matches!(
            service.compare_with_base(&handle, &request(0.0, 8)),
            Err(GenerationError::NoBase(_))
        ));
    }
}
