use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CredentialError;

/// A file inside a Hugging Face Hub repository
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub repo_id: String,
    #[serde(default)]
    pub subfolder: Option<String>,
    pub filename: String,
    #[serde(default)]
    pub revision: Option<String>,
}

impl ArtifactRef {
    pub fn new(repo_id: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            repo_id: repo_id.into(),
            subfolder: None,
            filename: filename.into(),
            revision: None,
        }
    }

    pub fn with_subfolder(mut self, subfolder: impl Into<String>) -> Self {
        self.subfolder = Some(subfolder.into());
        self
    }

    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = Some(revision.into());
        self
    }

    /// Path of the file relative to the repository root
    pub fn hub_path(&self) -> String {
        match self.subfolder.as_deref().map(|s| s.trim_matches('/')) {
            Some(dir) if !dir.is_empty() => format!("{}/{}", dir, self.filename),
            _ => self.filename.clone(),
        }
    }

    pub fn url(&self) -> String {
        format!("https://huggingface.co/{}", self.repo_id)
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.repo_id, self.hub_path())?;
        if let Some(rev) = &self.revision {
            write!(f, "@{}", rev)?;
        }
        Ok(())
    }
}

/// Target precision when the runtime is asked to quantize an artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Precision {
    #[serde(rename = "q4_K_S")]
    Q4KS,
    #[serde(rename = "q4_K_M")]
    Q4KM,
    #[serde(rename = "q8_0")]
    Q8_0,
}

impl Precision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Precision::Q4KS => "q4_K_S",
            Precision::Q4KM => "q4_K_M",
            Precision::Q8_0 => "q8_0",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "q4_k_s" => Some(Precision::Q4KS),
            "q4_k_m" | "4bit" | "4-bit" => Some(Precision::Q4KM),
            "q8_0" | "8bit" | "8-bit" => Some(Precision::Q8_0),
            _ => None,
        }
    }
}

/// How a prompt is handed to the model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptFormat {
    /// Plain completion, no template applied
    #[default]
    Raw,
    /// A single user turn rendered through the model's chat template
    Chat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DevicePreference {
    #[default]
    Auto,
    Cpu,
    Accelerator,
}

/// Compute device a model is placed on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Cpu,
    Accelerator,
}

impl Device {
    pub fn label(&self) -> &'static str {
        match self {
            Device::Cpu => "CPU",
            Device::Accelerator => "GPU",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct LoadOptions {
    #[serde(default)]
    pub quantize: Option<Precision>,
    #[serde(default)]
    pub context_length: Option<u32>,
    #[serde(default)]
    pub prompt_format: PromptFormat,
    #[serde(default)]
    pub device: DevicePreference,
}

/// Identifies one loadable model. Equal configs share one cached handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelConfig {
    pub base: ArtifactRef,
    #[serde(default)]
    pub adapter: Option<ArtifactRef>,
    #[serde(default)]
    pub options: LoadOptions,
}

impl ModelConfig {
    pub fn new(base: ArtifactRef) -> Self {
        Self {
            base,
            adapter: None,
            options: LoadOptions::default(),
        }
    }

    pub fn with_adapter(mut self, adapter: ArtifactRef) -> Self {
        self.adapter = Some(adapter);
        self
    }

    pub fn with_options(mut self, options: LoadOptions) -> Self {
        self.options = options;
        self
    }

    /// The same model without its adapter
    pub fn base_config(&self) -> ModelConfig {
        ModelConfig {
            base: self.base.clone(),
            adapter: None,
            options: self.options.clone(),
        }
    }

    pub fn is_adapted(&self) -> bool {
        self.adapter.is_some()
    }

    pub fn display_name(&self) -> String {
        match &self.adapter {
            Some(adapter) => format!("{} + {}", self.base, adapter),
            None => self.base.to_string(),
        }
    }
}

/// Hub access token. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Result<Self, CredentialError> {
        let token = token.into().trim().to_string();
        if token.is_empty() {
            return Err(CredentialError::Missing);
        }
        Ok(Self(token))
    }

    pub fn from_env(var: &str) -> Result<Self, CredentialError> {
        let token = std::env::var(var).map_err(|_| CredentialError::Missing)?;
        Self::new(token)
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_hub_path_joins_subfolder() {
        let plain = ArtifactRef::new("org/repo", "model.gguf");
        assert_eq!(plain.hub_path(), "model.gguf");

        let nested = ArtifactRef::new("org/repo", "adapter.gguf").with_subfolder("/lora_model/");
        assert_eq!(nested.hub_path(), "lora_model/adapter.gguf");
        assert_eq!(nested.to_string(), "org/repo/lora_model/adapter.gguf");
    }

    #[test]
    fn test_equal_configs_hash_together() {
        let a = ModelConfig::new(ArtifactRef::new("org/repo", "model.gguf"));
        let b = ModelConfig::new(ArtifactRef::new("org/repo", "model.gguf"));
        let c = a.clone().with_adapter(ArtifactRef::new("org/lora", "adapter.gguf"));

        let set: HashSet<_> = [a.clone(), b, c.clone()].into_iter().collect();
        assert_eq!(set.len(), 2);
        assert_eq!(c.base_config(), a);
    }

    #[test]
    fn test_credential_is_redacted() {
        let cred = Credential::new("hf_secret").unwrap();
        assert_eq!(format!("{:?}", cred), "Credential(***)");
        assert_eq!(cred.to_string(), "***");
        assert_eq!(cred.expose(), "hf_secret");
    }

    #[test]
    fn test_blank_credential_is_missing() {
        assert!(matches!(Credential::new("   "), Err(CredentialError::Missing)));
    }

    #[test]
    fn test_precision_parse() {
        assert_eq!(Precision::parse("4bit"), Some(Precision::Q4KM));
        assert_eq!(Precision::parse("Q8_0"), Some(Precision::Q8_0));
        assert_eq!(Precision::parse("fp4"), None);
    }
}
