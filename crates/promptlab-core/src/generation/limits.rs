//! Slider ranges shown to users

use serde::Serialize;

use super::{GenerationRequest, SamplingParams};
use crate::error::RequestError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SliderSpec {
    pub label: &'static str,
    pub min: f64,
    pub max: f64,
    pub default: f64,
    pub step: f64,
}

impl SliderSpec {
    pub fn check(&self, value: f64) -> Result<(), RequestError> {
        if value.is_finite() && value >= self.min && value <= self.max {
            return Ok(());
        }
        Err(RequestError::OutOfRange {
            name: self.label,
            min: self.min,
            max: self.max,
            value,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SamplingLimits {
    pub temperature: SliderSpec,
    pub max_tokens: SliderSpec,
    pub top_p: SliderSpec,
}

impl Default for SamplingLimits {
    fn default() -> Self {
        Self {
            temperature: SliderSpec {
                label: "Temperature",
                min: 0.1,
                max: 2.0,
                default: 1.0,
                step: 0.1,
            },
            max_tokens: SliderSpec {
                label: "Max tokens",
                min: 32.0,
                max: 512.0,
                default: 128.0,
                step: 16.0,
            },
            top_p: SliderSpec {
                label: "Top-p",
                min: 0.1,
                max: 1.0,
                default: 0.9,
                step: 0.05,
            },
        }
    }
}

impl SamplingLimits {
    pub fn defaults(&self) -> SamplingParams {
        SamplingParams {
            temperature: self.temperature.default as f32,
            top_p: self.top_p.default as f32,
            max_new_tokens: self.max_tokens.default as u32,
        }
    }

    pub fn validate(&self, request: &GenerationRequest) -> Result<(), RequestError> {
        if request.prompt.trim().is_empty() {
            return Err(RequestError::EmptyPrompt);
        }
        // f32 -> f64 widening leaves 0.1 slightly above 0.1f64; round to the slider step
        self.temperature.check(round4(request.params.temperature))?;
        self.top_p.check(round4(request.params.top_p))?;
        self.max_tokens.check(request.params.max_new_tokens as f64)?;
        Ok(())
    }
}

fn round4(v: f32) -> f64 {
    (v as f64 * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(temperature: f32, top_p: f32, max_new_tokens: u32) -> GenerationRequest {
        GenerationRequest::new(
            "hello",
            SamplingParams {
                temperature,
                top_p,
                max_new_tokens,
            },
        )
    }

    #[test]
    fn test_documented_defaults() {
        let params = SamplingLimits::default().defaults();
        assert_eq!(params.temperature, 1.0);
        assert_eq!(params.max_new_tokens, 128);
        assert_eq!(params.top_p, 0.9);
    }

    #[test]
    fn test_bounds_are_inclusive() {
        let limits = SamplingLimits::default();
        assert!(limits.validate(&request(0.1, 0.1, 32)).is_ok());
        assert!(limits.validate(&request(2.0, 1.0, 512)).is_ok());
    }

    #[test]
    fn test_out_of_range_values() {
        let limits = SamplingLimits::default();
        assert!(matches!(
            limits.validate(&request(0.0, 0.9, 128)),
            Err(RequestError::OutOfRange { name: "Temperature", .. })
        ));
        assert!(matches!(
            limits.validate(&request(1.0, 1.5, 128)),
            Err(RequestError::OutOfRange { name: "Top-p", .. })
        ));
        assert!(matches!(
            limits.validate(&request(1.0, 0.9, 1024)),
            Err(RequestError::OutOfRange { name: "Max tokens", .. })
        ));
        assert!(limits.validate(&request(f32::NAN, 0.9, 128)).is_err());
    }

    #[test]
    fn test_blank_prompt_rejected() {
        let limits = SamplingLimits::default();
        let blank = GenerationRequest::new("  \n", limits.defaults());
        assert_eq!(limits.validate(&blank), Err(RequestError::EmptyPrompt));
    }
}
