use std::process::Command;

use promptlab_core::{Device, DevicePreference};
use tracing::{debug, info, instrument};

/// Vendor tools whose successful run means an accelerator is present
const PROBES: &[(&str, &[&str])] = &[
    ("nvidia-smi", &["-L"]),
    ("rocm-smi", &["--showproductname"]),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceProbe {
    detected: Device,
}

impl DeviceProbe {
    /// Run the vendor tools once and remember the answer
    #[instrument]
    pub fn detect() -> Self {
        let detected = PROBES
            .iter()
            .find(|(cmd, args)| probe(cmd, args))
            .map(|_| Device::Accelerator)
            .unwrap_or(Device::Cpu);

        info!(device = detected.label(), "Compute device detected");
        Self { detected }
    }

    pub fn fixed(detected: Device) -> Self {
        Self { detected }
    }

    pub fn detected(&self) -> Device {
        self.detected
    }

    /// Device for a model given its preference; `None` when an accelerator
    /// is required but absent
    pub fn resolve(&self, preference: DevicePreference) -> Option<Device> {
        match preference {
            DevicePreference::Auto => Some(self.detected),
            DevicePreference::Cpu => Some(Device::Cpu),
            DevicePreference::Accelerator => {
                (self.detected == Device::Accelerator).then_some(Device::Accelerator)
            }
        }
    }
}

fn probe(cmd: &str, args: &[&str]) -> bool {
    match Command::new(cmd).args(args).output() {
        Ok(out) if out.status.success() => {
            let found = !String::from_utf8_lossy(&out.stdout).trim().is_empty();
            debug!(cmd, found, "Accelerator probe ran");
            found
        }
        Ok(out) => {
            debug!(cmd, status = ?out.status, "Accelerator probe failed");
            false
        }
        Err(e) => {
            debug!(cmd, "Accelerator probe unavailable: {}", e);
            false
        }
    }
}
