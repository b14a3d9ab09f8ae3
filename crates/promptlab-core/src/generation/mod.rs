mod limits;
mod request;
mod types;

pub use limits::{SamplingLimits, SliderSpec};
pub use request::{GenerationRequest, SamplingParams};
pub use types::{Comparison, GenerationResult};
