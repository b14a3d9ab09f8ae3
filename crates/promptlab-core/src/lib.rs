pub mod config;
pub mod error;
pub mod generation;
pub mod model;
pub mod status;

pub use config::{AppConfig, HubConfig, OllamaConfig, Profile, ProfileConfig, ServerConfig};
pub use config::{normalize_host, DEFAULT_OLLAMA_HOST, DEFAULT_PORT, DEFAULT_PROMPT, TOKEN_ENV};
pub use error::{ConfigError, CredentialError, RequestError};
pub use generation::{
    Comparison, GenerationRequest, GenerationResult, SamplingLimits, SamplingParams, SliderSpec,
};
pub use model::{
    ArtifactRef, Credential, Device, DevicePreference, LoadOptions, ModelConfig, Precision,
    PromptFormat,
};
pub use status::{ArtifactInfo, LoadPhase, LoadStatus};
