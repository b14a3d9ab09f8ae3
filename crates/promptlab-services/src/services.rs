//! Service container
//!
//! Single entry point for the binaries. Owns the model cache and the
//! generation service for one profile.

use std::sync::Arc;

use promptlab_core::{
    AppConfig, Comparison, ConfigError, Credential, GenerationRequest, GenerationResult,
    LoadStatus, ModelConfig, ProfileConfig,
};
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::{
    ArtifactHub, DeviceProbe, GenerationError, GenerationService, HfHub, InferenceBackend,
    LoadError, ModelHandle, ModelInfo, ModelInfoService, ModelLoader, OllamaClient, OllamaRuntime,
};

/// What a prompt produced: one answer, or two in compare mode
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Output {
    Result(GenerationResult),
    Comparison(Comparison),
}

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Model load failed: {0}")]
    Load(#[from] LoadError),
    #[error("Generation failed: {0}")]
    Generation(#[from] GenerationError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub struct Services {
    pub profile: ProfileConfig,
    pub loader: Arc<ModelLoader>,
    pub generation: Arc<GenerationService>,
    pub model_info: Arc<ModelInfoService>,
    pub ollama: OllamaClient,
}

impl Services {
    /// Wire the hub, the Ollama runtime and the detected device for `config`
    pub fn new(config: &AppConfig, credential: Option<Credential>) -> Self {
        let ollama = OllamaClient::new(&config.ollama.host);
        let hub: Arc<dyn ArtifactHub> = Arc::new(HfHub::new(config.hub.cache_dir.clone()));
        let backend: Arc<dyn InferenceBackend> = Arc::new(OllamaRuntime::new(ollama.clone()));

        Self::with_parts(
            config.profile.clone(),
            hub,
            backend,
            credential,
            DeviceProbe::detect(),
            ollama,
        )
    }

    pub fn with_parts(
        profile: ProfileConfig,
        hub: Arc<dyn ArtifactHub>,
        backend: Arc<dyn InferenceBackend>,
        credential: Option<Credential>,
        probe: DeviceProbe,
        ollama: OllamaClient,
    ) -> Self {
        info!(
            profile = profile.profile.label(),
            host = %ollama.host(),
            "Initializing services"
        );
        Self {
            loader: Arc::new(ModelLoader::new(
                hub,
                backend.clone(),
                credential.clone(),
                probe,
            )),
            generation: Arc::new(GenerationService::new(backend)),
            model_info: Arc::new(ModelInfoService::new(ollama.clone(), credential)),
            profile,
            ollama,
        }
    }

    pub fn model_config(&self) -> Result<ModelConfig, ConfigError> {
        self.profile.model_config()
    }

    /// Load (or fetch from cache) the profile's model. Blocks.
    pub fn load(&self) -> Result<Arc<ModelHandle>, ServiceError> {
        let config = self.model_config()?;
        Ok(self.loader.load(&config)?)
    }

    pub fn status(&self) -> Result<LoadStatus, ConfigError> {
        Ok(self.loader.status(&self.model_config()?))
    }

    /// Answer a prompt with the profile's model. Blocks.
    pub fn run(&self, request: &GenerationRequest) -> Result<Output, ServiceError> {
        let handle = self.load()?;
        if self.profile.is_compare() {
            let comparison = self.generation.compare_with_base(&handle, request)?;
            return Ok(Output::Comparison(comparison));
        }
        Ok(Output::Result(self.generation.generate(&handle, request)?))
    }

    pub fn info(&self) -> Result<ModelInfo, ServiceError> {
        let handle = self.load()?;
        Ok(self.model_info.describe(&handle))
    }

    /// Unload every model this process loaded
    pub fn shutdown(&self) {
        self.loader.release_all();
    }
}
