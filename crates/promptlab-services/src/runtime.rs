//! [`InferenceBackend`] backed by a local Ollama server

use std::collections::BTreeMap;
use std::fs::File;
use std::io;
use std::path::Path;

use promptlab_core::{Device, DevicePreference, LoadOptions, SamplingParams};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};

use crate::backend::{BackendError, Completion, EncodedPrompt, InferenceBackend, RuntimeModel};
use crate::ollama::{
    ChatRequest, CreateRequest, GenerateOptions, GenerateRequest, ModelParameters, OllamaClient,
    RunningModel,
};

const NAMESPACE: &str = "promptlab";

pub struct OllamaRuntime {
    client: OllamaClient,
}

impl OllamaRuntime {
    pub fn new(client: OllamaClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &OllamaClient {
        &self.client
    }

    /// Upload the file unless the runtime already has it; returns its digest
    fn ensure_blob(&self, path: &Path) -> Result<String, BackendError> {
        let digest = format!("sha256:{}", sha256_file(path)?);
        if self.client.has_blob(&digest)? {
            debug!(%digest, "Blob already present");
        } else {
            self.client.push_blob(&digest, path)?;
        }
        Ok(digest)
    }
}

impl InferenceBackend for OllamaRuntime {
    #[instrument(skip(self, options), fields(artifact = %artifact.display()))]
    fn register(
        &self,
        artifact: &Path,
        options: &LoadOptions,
        device: Device,
    ) -> Result<RuntimeModel, BackendError> {
        let digest = self.ensure_blob(artifact)?;
        let name = model_name(artifact, &digest, options);

        let mut files = BTreeMap::new();
        files.insert(file_name(artifact), digest.clone());

        self.client.create_model(&CreateRequest {
            model: name.clone(),
            files,
            quantize: options.quantize.map(|q| q.as_str().to_string()),
            parameters: parameters(options),
            ..Default::default()
        })?;

        info!(model = %name, device = device.label(), "Registered base model");
        Ok(RuntimeModel { name, digest })
    }

    #[instrument(skip(self, options), fields(base = %base.name, adapter = %adapter.display()))]
    fn apply_adapter(
        &self,
        base: &RuntimeModel,
        adapter: &Path,
        options: &LoadOptions,
        device: Device,
    ) -> Result<RuntimeModel, BackendError> {
        let digest = self.ensure_blob(adapter)?;
        let name = adapted_name(&base.name, adapter, &digest, options);

        let mut adapters = BTreeMap::new();
        adapters.insert(file_name(adapter), digest.clone());

        self.client.create_model(&CreateRequest {
            model: name.clone(),
            from: Some(base.name.clone()),
            adapters,
            parameters: parameters(options),
            ..Default::default()
        })?;

        info!(model = %name, device = device.label(), "Registered adapted model");
        Ok(RuntimeModel { name, digest })
    }

    fn place(&self, model: &RuntimeModel) -> Result<Option<Device>, BackendError> {
        self.client.preload(&model.name)?;

        // The runtime may live on another host; ask it where the model landed
        match self.client.running_models() {
            Ok(running) => Ok(placement(&running, &model.name)),
            Err(e) => {
                warn!(model = %model.name, "Could not read model placement: {}", e);
                Ok(None)
            }
        }
    }

    fn generate(
        &self,
        model: &RuntimeModel,
        prompt: &EncodedPrompt,
        params: &SamplingParams,
    ) -> Result<Vec<Completion>, BackendError> {
        let options = GenerateOptions {
            temperature: params.temperature,
            top_p: params.top_p,
            num_predict: params.max_new_tokens,
        };

        let completion = match prompt {
            EncodedPrompt::Raw(text) => {
                let resp = self.client.generate(&GenerateRequest {
                    model: &model.name,
                    prompt: text,
                    raw: true,
                    stream: false,
                    options,
                })?;
                Completion {
                    text: resp.response,
                    tokens_generated: resp.eval_count.unwrap_or(0) as u32,
                    prompt_tokens: resp.prompt_eval_count.unwrap_or(0) as u32,
                }
            }
            EncodedPrompt::Chat(messages) => {
                let resp = self.client.chat(&ChatRequest {
                    model: &model.name,
                    messages,
                    stream: false,
                    options,
                })?;
                Completion {
                    text: resp.message.content,
                    tokens_generated: resp.eval_count.unwrap_or(0) as u32,
                    prompt_tokens: resp.prompt_eval_count.unwrap_or(0) as u32,
                }
            }
        };

        Ok(vec![completion])
    }

    fn unload(&self, model: &RuntimeModel) -> Result<(), BackendError> {
        self.client.unload_model(&model.name)?;
        Ok(())
    }
}

/// Layer offload is left to the runtime unless the config insists on the CPU
fn parameters(options: &LoadOptions) -> ModelParameters {
    ModelParameters {
        num_ctx: options.context_length,
        // Zero offloaded layers pins the model to the CPU
        num_gpu: (options.device == DevicePreference::Cpu).then_some(0),
    }
}

fn placement(running: &[RunningModel], name: &str) -> Option<Device> {
    running
        .iter()
        .find(|m| m.name == name || m.model == name)
        .map(|m| {
            if m.size_vram > 0 {
                Device::Accelerator
            } else {
                Device::Cpu
            }
        })
}

pub fn sha256_file(path: &Path) -> Result<String, io::Error> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "model.gguf".to_string())
}

fn stem(path: &Path) -> String {
    path.file_stem()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "model".to_string())
}

fn short_digest(digest: &str) -> &str {
    let hex = digest.trim_start_matches("sha256:");
    &hex[..hex.len().min(12)]
}

/// Runtime model names allow lowercase alphanumerics, '-', '_' and '.'
fn sanitize(s: &str) -> String {
    s.to_lowercase()
        .chars()
        .map(|c| match c {
            'a'..='z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '-',
        })
        .collect()
}

/// Eight hex chars identifying the load options a model was created with.
/// Configs that share weights but differ in options get separate models.
pub fn options_tag(options: &LoadOptions) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{:?}", options).as_bytes());
    let hex = format!("{:x}", hasher.finalize());
    hex[..8].to_string()
}

fn model_name(artifact: &Path, digest: &str, options: &LoadOptions) -> String {
    let mut name = sanitize(&stem(artifact));
    if let Some(q) = options.quantize {
        name.push('-');
        name.push_str(&sanitize(q.as_str()));
    }
    format!(
        "{}/{}:{}-{}",
        NAMESPACE,
        name,
        short_digest(digest),
        options_tag(options)
    )
}

fn adapted_name(base: &str, adapter: &Path, digest: &str, options: &LoadOptions) -> String {
    let base_stem = base
        .trim_start_matches(&format!("{}/", NAMESPACE))
        .split(':')
        .next()
        .unwrap_or(base);
    // The base name already carries its own options tag; fold it in
    let mut hasher = Sha256::new();
    hasher.update(base.as_bytes());
    hasher.update(options_tag(options).as_bytes());
    let hex = format!("{:x}", hasher.finalize());

    format!(
        "{}/{}-{}:{}-{}",
        NAMESPACE,
        base_stem,
        sanitize(&stem(adapter)),
        short_digest(digest),
        &hex[..8]
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use promptlab_core::Precision;
    use std::path::PathBuf;

    fn valid_name(name: &str) -> bool {
        name.chars().all(|c| {
            matches!(c, 'a'..='z' | '0'..='9' | '-' | '_' | '.' | '/' | ':')
        })
    }

    #[test]
    fn test_model_name_is_stable_and_valid() {
        let path = PathBuf::from("/cache/snapshots/abc/Model-Q4_K_M.gguf");
        let digest = "sha256:0123456789abcdef0123";
        let options = LoadOptions::default();

        let name = model_name(&path, digest, &options);
        assert!(name.starts_with("promptlab/model-q4_k_m:0123456789ab-"));
        assert_eq!(name, model_name(&path, digest, &options));
        assert!(valid_name(&name));

        let quantized = LoadOptions {
            quantize: Some(Precision::Q8_0),
            ..Default::default()
        };
        assert!(model_name(&path, digest, &quantized)
            .starts_with("promptlab/model-q4_k_m-q8_0:0123456789ab-"));
    }

    #[test]
    fn test_options_change_the_runtime_name() {
        let path = PathBuf::from("/cache/model-q4_k_m.gguf");
        let digest = "sha256:0123456789abcdef0123";
        let default = LoadOptions::default();
        let long_ctx = LoadOptions {
            context_length: Some(8192),
            ..Default::default()
        };
        let cpu = LoadOptions {
            device: DevicePreference::Cpu,
            ..Default::default()
        };

        let a = model_name(&path, digest, &default);
        let b = model_name(&path, digest, &long_ctx);
        let c = model_name(&path, digest, &cpu);
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(b, c);

        let adapter = PathBuf::from("/cache/adapter.gguf");
        let adapted_a = adapted_name(&a, &adapter, digest, &default);
        let adapted_b = adapted_name(&b, &adapter, digest, &long_ctx);
        assert_ne!(adapted_a, adapted_b);
        assert!(adapted_a.starts_with("promptlab/model-q4_k_m-adapter:0123456789ab-"));
        assert!(valid_name(&adapted_a));
    }

    #[test]
    fn test_sha256_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob");
        std::fs::write(&path, b"abc").unwrap();
        assert_eq!(
            sha256_file(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_only_explicit_cpu_pins_layers() {
        let cpu = parameters(&LoadOptions {
            context_length: Some(2048),
            device: DevicePreference::Cpu,
            ..Default::default()
        });
        assert_eq!(cpu.num_gpu, Some(0));
        assert_eq!(cpu.num_ctx, Some(2048));

        let auto = parameters(&LoadOptions::default());
        assert_eq!(auto.num_gpu, None);

        let accelerator = parameters(&LoadOptions {
            device: DevicePreference::Accelerator,
            ..Default::default()
        });
        assert_eq!(accelerator.num_gpu, None);
    }

    #[test]
    fn test_placement_from_running_models() {
        let running: Vec<RunningModel> = serde_json::from_str(
            r#"[
                {"name": "promptlab/a:1-x", "model": "promptlab/a:1-x", "size": 100, "size_vram": 100},
                {"name": "promptlab/b:2-y", "model": "promptlab/b:2-y", "size": 100, "size_vram": 0}
            ]"#,
        )
        .unwrap();

        assert_eq!(placement(&running, "promptlab/a:1-x"), Some(Device::Accelerator));
        assert_eq!(placement(&running, "promptlab/b:2-y"), Some(Device::Cpu));
        assert_eq!(placement(&running, "promptlab/c:3-z"), None);
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("My Adapter+v2"), "my-adapter-v2");
    }
}
