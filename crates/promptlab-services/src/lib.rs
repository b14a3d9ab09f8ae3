mod backend;
mod device;
mod generation;
mod gguf;
mod hub;
mod loader;
mod model_info;
mod ollama;
mod runtime;
mod services;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use backend::{BackendError, Completion, EncodedPrompt, InferenceBackend, RuntimeModel};
pub use device::DeviceProbe;
pub use generation::{GenerationError, GenerationService};
pub use gguf::{inspect as inspect_gguf, GgufError, GgufHeader};
pub use hub::{ArtifactHub, HfHub, HubError};
pub use loader::{LoadError, ModelHandle, ModelLoader};
pub use model_info::{ModelInfo, ModelInfoService};
pub use ollama::{
    ChatMessage, OllamaClient, OllamaError, OllamaModelDetails, OllamaShowResponse, RunningModel,
};
pub use runtime::{options_tag, sha256_file, OllamaRuntime};
pub use services::{Output, ServiceError, Services};

// Binaries import core types through here
pub use promptlab_core::{
    AppConfig, ArtifactInfo, ArtifactRef, Comparison, Credential, CredentialError, Device,
    GenerationRequest, GenerationResult, LoadPhase, LoadStatus, ModelConfig, Profile,
    ProfileConfig, SamplingLimits, SamplingParams,
};
