//! Load progress reported to the UI

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadPhase {
    Starting,
    VerifyingCredential,
    /// An adapted model waiting on its base
    LoadingBase,
    Fetching,
    Registering,
    Placing,
}

impl LoadPhase {
    pub fn label(&self) -> &'static str {
        match self {
            LoadPhase::Starting => "Preparing model...",
            LoadPhase::VerifyingCredential => "Checking access token...",
            LoadPhase::LoadingBase => "Loading base model...",
            LoadPhase::Fetching => "Downloading model from Hugging Face...",
            LoadPhase::Registering => "Registering model with the runtime...",
            LoadPhase::Placing => "Loading model into memory...",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LoadStatus {
    #[default]
    NotStarted,
    Loading {
        phase: LoadPhase,
    },
    Ready,
    Failed {
        message: String,
    },
}

impl LoadStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, LoadStatus::Ready)
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, LoadStatus::Loading { .. })
    }
}

impl fmt::Display for LoadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadStatus::NotStarted => f.write_str("not loaded"),
            LoadStatus::Loading { phase } => f.write_str(phase.label()),
            LoadStatus::Ready => f.write_str("Model loaded!"),
            LoadStatus::Failed { message } => write!(f, "Model load failed: {}", message),
        }
    }
}

/// What the GGUF header of a fetched artifact says about it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactInfo {
    pub gguf_version: u32,
    pub tensor_count: u64,
    pub architecture: Option<String>,
    pub name: Option<String>,
    pub file_type: Option<u32>,
    pub size_bytes: u64,
}

impl ArtifactInfo {
    /// Human-readable `general.file_type`
    pub fn file_type_label(&self) -> &'static str {
        match self.file_type {
            Some(0) => "F32",
            Some(1) => "F16",
            Some(2) => "Q4_0",
            Some(3) => "Q4_1",
            Some(7) => "Q8_0",
            Some(8) => "Q5_0",
            Some(9) => "Q5_1",
            Some(10) => "Q2_K",
            Some(11) | Some(12) | Some(13) => "Q3_K",
            Some(14) => "Q4_K_S",
            Some(15) => "Q4_K_M",
            Some(16) => "Q5_K_S",
            Some(17) => "Q5_K_M",
            Some(18) => "Q6_K",
            Some(32) => "BF16",
            Some(_) => "quantized",
            None => "unknown",
        }
    }

    /// Only full-precision weights can be quantized by the runtime
    pub fn is_full_precision(&self) -> bool {
        matches!(self.file_type, Some(0) | Some(1) | Some(32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serializes_with_tag() {
        let status = LoadStatus::Loading {
            phase: LoadPhase::Fetching,
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"], "loading");
        assert_eq!(json["phase"], "fetching");
    }

    #[test]
    fn test_file_type_label() {
        let info = ArtifactInfo {
            file_type: Some(15),
            ..Default::default()
        };
        assert_eq!(info.file_type_label(), "Q4_K_M");
        assert!(!info.is_full_precision());
    }
}
