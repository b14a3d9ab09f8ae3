use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::model::{ArtifactRef, LoadOptions, ModelConfig, Precision, PromptFormat};

pub const DEFAULT_OLLAMA_HOST: &str = "http://localhost:11434";
pub const DEFAULT_PORT: u16 = 8501;
pub const DEFAULT_PROMPT: &str = "Write a short story about a friendly robot in Paris.";
pub const TOKEN_ENV: &str = "HF_TOKEN";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub profile: ProfileConfig,
    #[serde(default)]
    pub ollama: OllamaConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub hub: HubConfig,
}

impl AppConfig {
    /// Defaults overlaid with `PROMPTLAB_*`, `OLLAMA_HOST` and `PORT`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = AppConfig::default();

        if let Some(host) = lookup("OLLAMA_HOST") {
            config.ollama.host = normalize_host(&host);
        }

        if let Some(port) = lookup("PORT") {
            config.server.port = port.parse().map_err(|_| ConfigError::InvalidValue {
                key: "PORT",
                value: port,
            })?;
        }

        if let Some(dir) = lookup("PROMPTLAB_CACHE_DIR") {
            config.hub.cache_dir = PathBuf::from(dir);
        }

        if let Some(name) = lookup("PROMPTLAB_PROFILE") {
            config.profile = ProfileConfig::preset(Profile::parse(&name)?);
        }

        if let Some(repo) = lookup("PROMPTLAB_REPO") {
            config.profile.base.repo_id = repo;
        }
        if let Some(file) = lookup("PROMPTLAB_FILE") {
            config.profile.base.filename = file;
        }
        if let Some(repo) = lookup("PROMPTLAB_ADAPTER_REPO") {
            config.profile.adapter_mut().repo_id = repo;
        }
        if let Some(file) = lookup("PROMPTLAB_ADAPTER_FILE") {
            config.profile.adapter_mut().filename = file;
        }
        if let Some(q) = lookup("PROMPTLAB_QUANTIZE") {
            let precision = Precision::parse(&q).ok_or(ConfigError::InvalidValue {
                key: "PROMPTLAB_QUANTIZE",
                value: q,
            })?;
            config.profile.options.quantize = Some(precision);
        }
        if let Some(ctx) = lookup("PROMPTLAB_CONTEXT_LENGTH") {
            let n = ctx.parse().map_err(|_| ConfigError::InvalidValue {
                key: "PROMPTLAB_CONTEXT_LENGTH",
                value: ctx,
            })?;
            config.profile.options.context_length = Some(n);
        }

        Ok(config)
    }
}

/// Which demo the process serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Profile {
    /// One quantized GGUF model, CPU-friendly
    #[default]
    Gguf,
    /// Base model and its LoRA-adapted variant side by side
    LoraCompare,
}

impl Profile {
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        match s.trim().to_lowercase().as_str() {
            "gguf" | "cpu" => Ok(Profile::Gguf),
            "lora-compare" | "lora" | "compare" => Ok(Profile::LoraCompare),
            _ => Err(ConfigError::UnknownProfile(s.to_string())),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Profile::Gguf => "gguf",
            Profile::LoraCompare => "lora-compare",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Profile::Gguf => "CPU GGUF Demo",
            Profile::LoraCompare => "Base vs LoRA Comparison",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Profile::Gguf => {
                "This demo runs CPU-only inference using a GGUF quantized model fetched \
                 from Hugging Face. It demonstrates creative text generation beyond a simple chatbot."
            }
            Profile::LoraCompare => {
                "The same prompt is answered by the LoRA fine-tuned model and by its unmodified \
                 base model, so the effect of fine-tuning can be compared side by side."
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileConfig {
    pub profile: Profile,
    pub base: ArtifactRef,
    #[serde(default)]
    pub adapter: Option<ArtifactRef>,
    #[serde(default)]
    pub options: LoadOptions,
}

impl ProfileConfig {
    pub fn preset(profile: Profile) -> Self {
        match profile {
            Profile::Gguf => Self {
                profile,
                base: ArtifactRef::new("Jeppcode/ScalableLab2", "model-q4_k_m.gguf"),
                adapter: None,
                options: LoadOptions::default(),
            },
            Profile::LoraCompare => Self {
                profile,
                base: ArtifactRef::new(
                    "unsloth/Llama-3.2-1B-Instruct-GGUF",
                    "Llama-3.2-1B-Instruct-Q4_K_M.gguf",
                ),
                adapter: Some(
                    ArtifactRef::new("Jeppcode/ScalableLab2", "adapter.gguf")
                        .with_subfolder("lora_model"),
                ),
                options: LoadOptions {
                    prompt_format: PromptFormat::Chat,
                    ..LoadOptions::default()
                },
            },
        }
    }

    fn adapter_mut(&mut self) -> &mut ArtifactRef {
        let base_repo = self.base.repo_id.clone();
        self.adapter
            .get_or_insert_with(|| ArtifactRef::new(base_repo, "adapter.gguf"))
    }

    /// Model to answer prompts with: the adapted one in compare mode
    pub fn model_config(&self) -> Result<ModelConfig, ConfigError> {
        let base = ModelConfig::new(self.base.clone()).with_options(self.options.clone());
        match (self.profile, &self.adapter) {
            (Profile::Gguf, _) => Ok(base),
            (Profile::LoraCompare, Some(adapter)) => Ok(base.with_adapter(adapter.clone())),
            (Profile::LoraCompare, None) => Err(ConfigError::MissingAdapter("lora-compare")),
        }
    }

    pub fn is_compare(&self) -> bool {
        self.profile == Profile::LoraCompare
    }
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self::preset(Profile::Gguf)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    pub host: String,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_OLLAMA_HOST.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: DEFAULT_PORT }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    pub cache_dir: PathBuf,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
        }
    }
}

pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("promptlab")
        .join("hub")
}

/// Accept `host:port` the way the Ollama CLI does
/// `gpu:11434` -> `http://gpu:11434`; trailing slashes dropped
pub fn normalize_host(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        return host.to_string();
    }
    format!("http://{}", host)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.ollama.host, DEFAULT_OLLAMA_HOST);
        assert_eq!(config.server.port, DEFAULT_PORT);
        assert_eq!(config.profile.profile, Profile::Gguf);
        assert_eq!(config.profile.base.filename, "model-q4_k_m.gguf");
        assert!(!config.profile.model_config().unwrap().is_adapted());
    }

    #[test]
    fn test_env_overrides() {
        let config = AppConfig::from_lookup(lookup(&[
            ("OLLAMA_HOST", "gpu-box:11434"),
            ("PORT", "9000"),
            ("PROMPTLAB_PROFILE", "lora"),
            ("PROMPTLAB_ADAPTER_FILE", "my-lora.gguf"),
            ("PROMPTLAB_QUANTIZE", "q8_0"),
        ]))
        .unwrap();

        assert_eq!(config.ollama.host, "http://gpu-box:11434");
        assert_eq!(config.server.port, 9000);
        assert!(config.profile.is_compare());

        let model = config.profile.model_config().unwrap();
        assert_eq!(model.adapter.unwrap().filename, "my-lora.gguf");
        assert_eq!(model.options.quantize, Some(Precision::Q8_0));
        assert_eq!(model.options.prompt_format, PromptFormat::Chat);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(matches!(
            AppConfig::from_lookup(lookup(&[("PORT", "eighty")])),
            Err(ConfigError::InvalidValue { key: "PORT", .. })
        ));
        assert!(matches!(
            AppConfig::from_lookup(lookup(&[("PROMPTLAB_PROFILE", "diffusion")])),
            Err(ConfigError::UnknownProfile(_))
        ));
    }

    #[test]
    fn test_compare_without_adapter_is_an_error() {
        let mut profile = ProfileConfig::preset(Profile::LoraCompare);
        profile.adapter = None;
        assert!(matches!(
            profile.model_config(),
            Err(ConfigError::MissingAdapter(_))
        ));
    }
}
