use std::sync::Arc;

use promptlab_core::SamplingLimits;
use promptlab_services::Services;

pub struct AppState {
    pub services: Arc<Services>,
    pub limits: SamplingLimits,
}

impl AppState {
    pub fn new(services: Arc<Services>) -> Self {
        Self {
            services,
            limits: SamplingLimits::default(),
        }
    }
}
