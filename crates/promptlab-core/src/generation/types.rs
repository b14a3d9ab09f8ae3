use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub text: String,
    pub model: String,
    pub tokens_generated: u32,
    pub prompt_tokens: u32,
    pub elapsed_ms: u64,
}

impl GenerationResult {
    pub fn tokens_per_sec(&self) -> Option<f64> {
        if self.elapsed_ms == 0 || self.tokens_generated == 0 {
            return None;
        }
        Some(self.tokens_generated as f64 / (self.elapsed_ms as f64 / 1000.0))
    }
}

impl fmt::Display for GenerationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}ms, {}/{} tokens",
            self.elapsed_ms, self.prompt_tokens, self.tokens_generated
        )?;
        if let Some(tps) = self.tokens_per_sec() {
            write!(f, ", {:.1} tok/s", tps)?;
        }
        Ok(())
    }
}

/// Output of the fine-tuned model next to its base model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub adapted: GenerationResult,
    pub base: GenerationResult,
}
