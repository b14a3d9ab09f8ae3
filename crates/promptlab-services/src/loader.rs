//! Load-once model cache
//!
//! Each distinct [`ModelConfig`] owns a slot. The first caller for a config
//! holds the slot lock while fetching, registering and placing the model;
//! concurrent callers for the same config block on that lock and then get
//! the stored handle. Failed loads leave the slot empty.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use promptlab_core::{
    ArtifactInfo, ArtifactRef, Credential, CredentialError, Device, LoadPhase, LoadStatus,
    ModelConfig, PromptFormat,
};
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::backend::{BackendError, InferenceBackend, RuntimeModel};
use crate::device::DeviceProbe;
use crate::gguf::{self, GgufHeader};
use crate::hub::{ArtifactHub, HubError};

#[derive(Error, Debug)]
pub enum LoadError {
    #[error(transparent)]
    Credential(#[from] CredentialError),
    #[error("Could not fetch {artifact}: {source}")]
    Fetch {
        artifact: String,
        #[source]
        source: HubError,
    },
    #[error("Incompatible artifact {artifact}: {reason}")]
    Incompatible { artifact: String, reason: String },
    #[error("Runtime could not load {model}: {source}")]
    Runtime {
        model: String,
        #[source]
        source: BackendError,
    },
    #[error("Model cache lock poisoned")]
    LockPoisoned,
}

type Slot = Arc<Mutex<Option<Arc<ModelHandle>>>>;

/// A loaded model. Shared by every caller that asked for the same config.
#[derive(Debug)]
pub struct ModelHandle {
    config: ModelConfig,
    runtime: RuntimeModel,
    device: Device,
    artifact: ArtifactInfo,
    base: Option<Arc<ModelHandle>>,
    load_duration: Duration,
    released: AtomicBool,
}

impl ModelHandle {
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn runtime(&self) -> &RuntimeModel {
        &self.runtime
    }

    pub fn name(&self) -> &str {
        &self.runtime.name
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn prompt_format(&self) -> PromptFormat {
        self.config.options.prompt_format
    }

    /// Header of the artifact this handle was built from (the adapter, for
    /// adapted handles)
    pub fn artifact(&self) -> &ArtifactInfo {
        &self.artifact
    }

    /// The unmodified model an adapted handle was built on
    pub fn base(&self) -> Option<&Arc<ModelHandle>> {
        self.base.as_ref()
    }

    pub fn load_duration(&self) -> Duration {
        self.load_duration
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }
}

pub struct ModelLoader {
    hub: Arc<dyn ArtifactHub>,
    backend: Arc<dyn InferenceBackend>,
    credential: Option<Credential>,
    probe: DeviceProbe,
    credential_verified: Mutex<bool>,
    slots: DashMap<ModelConfig, Slot>,
    status: DashMap<ModelConfig, LoadStatus>,
}

impl ModelLoader {
    pub fn new(
        hub: Arc<dyn ArtifactHub>,
        backend: Arc<dyn InferenceBackend>,
        credential: Option<Credential>,
        probe: DeviceProbe,
    ) -> Self {
        Self {
            hub,
            backend,
            credential,
            probe,
            credential_verified: Mutex::new(false),
            slots: DashMap::new(),
            status: DashMap::new(),
        }
    }

    pub fn device(&self) -> Device {
        self.probe.detected()
    }

    pub fn status(&self, config: &ModelConfig) -> LoadStatus {
        self.status
            .get(config)
            .map(|s| s.value().clone())
            .unwrap_or_default()
    }

    /// Handle for `config` if it has already been loaded
    pub fn cached(&self, config: &ModelConfig) -> Option<Arc<ModelHandle>> {
        let slot = self.slots.get(config)?.clone();
        let guard = slot.try_lock().ok()?;
        guard.clone()
    }

    /// Return the handle for `config`, loading it on first use.
    ///
    /// Blocks while another caller is loading the same config.
    #[instrument(skip(self), fields(model = %config.display_name()))]
    pub fn load(&self, config: &ModelConfig) -> Result<Arc<ModelHandle>, LoadError> {
        let slot = self.slots.entry(config.clone()).or_default().clone();
        let mut guard = slot.lock().map_err(|_| LoadError::LockPoisoned)?;

        if let Some(handle) = guard.as_ref() {
            debug!("Model cache hit");
            return Ok(handle.clone());
        }

        let start = Instant::now();
        match self.load_uncached(config, start) {
            Ok(handle) => {
                info!(
                    runtime = %handle.name(),
                    device = handle.device().label(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Model ready"
                );
                *guard = Some(handle.clone());
                self.status.insert(config.clone(), LoadStatus::Ready);
                Ok(handle)
            }
            Err(e) => {
                error!("Model load failed: {}", e);
                self.status.insert(
                    config.clone(),
                    LoadStatus::Failed {
                        message: e.to_string(),
                    },
                );
                Err(e)
            }
        }
    }

    fn load_uncached(
        &self,
        config: &ModelConfig,
        start: Instant,
    ) -> Result<Arc<ModelHandle>, LoadError> {
        // Replaces any earlier Failed status for the duration of this attempt
        self.set_phase(config, LoadPhase::Starting);

        let credential = self.credential.as_ref().ok_or(CredentialError::Missing)?;
        self.verify_credential(config, credential)?;

        let device = self
            .probe
            .resolve(config.options.device)
            .ok_or_else(|| LoadError::Incompatible {
                artifact: config.base.to_string(),
                reason: "an accelerator was requested but none is available".to_string(),
            })?;

        match &config.adapter {
            None => self.load_base(config, credential, device, start),
            Some(adapter) => self.load_adapted(config, adapter, credential, device, start),
        }
    }

    fn verify_credential(
        &self,
        config: &ModelConfig,
        credential: &Credential,
    ) -> Result<(), LoadError> {
        let mut verified = self
            .credential_verified
            .lock()
            .map_err(|_| LoadError::LockPoisoned)?;
        if *verified {
            return Ok(());
        }

        self.set_phase(config, LoadPhase::VerifyingCredential);
        self.hub.verify(credential)?;
        *verified = true;
        Ok(())
    }

    fn load_base(
        &self,
        config: &ModelConfig,
        credential: &Credential,
        device: Device,
        start: Instant,
    ) -> Result<Arc<ModelHandle>, LoadError> {
        let (path, header) = self.fetch(config, &config.base, credential)?;

        if header.is_adapter() {
            return Err(incompatible(&config.base, "artifact is an adapter, not a model"));
        }
        if config.options.quantize.is_some() && !header.info.is_full_precision() {
            return Err(incompatible(
                &config.base,
                &format!(
                    "cannot quantize weights that are already {}",
                    header.info.file_type_label()
                ),
            ));
        }

        self.set_phase(config, LoadPhase::Registering);
        let runtime = self
            .backend
            .register(&path, &config.options, device)
            .map_err(|e| runtime_error(config, e))?;

        let device = self.place(config, &runtime, device)?;

        Ok(Arc::new(ModelHandle {
            config: config.clone(),
            runtime,
            device,
            artifact: header.info,
            base: None,
            load_duration: start.elapsed(),
            released: AtomicBool::new(false),
        }))
    }

    fn load_adapted(
        &self,
        config: &ModelConfig,
        adapter: &ArtifactRef,
        credential: &Credential,
        device: Device,
        start: Instant,
    ) -> Result<Arc<ModelHandle>, LoadError> {
        // Goes through the cache so the base handle is shared, never rebuilt
        self.set_phase(config, LoadPhase::LoadingBase);
        let base = self.load(&config.base_config())?;

        let (path, header) = self.fetch(config, adapter, credential)?;
        if !header.is_adapter() {
            return Err(incompatible(adapter, "artifact is not a LoRA adapter"));
        }
        if let (Some(adapter_arch), Some(base_arch)) = (
            header.info.architecture.as_deref(),
            base.artifact().architecture.as_deref(),
        ) {
            if adapter_arch != base_arch {
                return Err(incompatible(
                    adapter,
                    &format!(
                        "adapter targets {} but the base model is {}",
                        adapter_arch, base_arch
                    ),
                ));
            }
        }

        self.set_phase(config, LoadPhase::Registering);
        let runtime = self
            .backend
            .apply_adapter(base.runtime(), &path, &config.options, device)
            .map_err(|e| runtime_error(config, e))?;

        let device = self.place(config, &runtime, device)?;

        Ok(Arc::new(ModelHandle {
            config: config.clone(),
            runtime,
            device,
            artifact: header.info,
            base: Some(base),
            load_duration: start.elapsed(),
            released: AtomicBool::new(false),
        }))
    }

    fn fetch(
        &self,
        config: &ModelConfig,
        artifact: &ArtifactRef,
        credential: &Credential,
    ) -> Result<(std::path::PathBuf, GgufHeader), LoadError> {
        self.set_phase(config, LoadPhase::Fetching);
        let path = self
            .hub
            .fetch(artifact, credential)
            .map_err(|source| LoadError::Fetch {
                artifact: artifact.to_string(),
                source,
            })?;

        let header = inspect(artifact, &path)?;
        Ok((path, header))
    }

    /// Preload the model; the runtime's own report of where it landed wins
    /// over the local guess
    fn place(
        &self,
        config: &ModelConfig,
        runtime: &RuntimeModel,
        expected: Device,
    ) -> Result<Device, LoadError> {
        self.set_phase(config, LoadPhase::Placing);
        let placed = self
            .backend
            .place(runtime)
            .map_err(|e| runtime_error(config, e))?;

        match placed {
            Some(device) if device != expected => {
                warn!(
                    expected = expected.label(),
                    actual = device.label(),
                    "Runtime placed the model on a different device"
                );
                Ok(device)
            }
            Some(device) => Ok(device),
            None => Ok(expected),
        }
    }

    fn set_phase(&self, config: &ModelConfig, phase: LoadPhase) {
        debug!(phase = phase.label(), "Load phase");
        self.status
            .insert(config.clone(), LoadStatus::Loading { phase });
    }

    /// Unload every cached model from the runtime. Called at process teardown.
    pub fn release_all(&self) -> usize {
        // Slots are collected first so no map shard stays locked while waiting on a load
        let slots: Vec<Slot> = self.slots.iter().map(|e| e.value().clone()).collect();
        let handles: Vec<Arc<ModelHandle>> = slots
            .iter()
            .filter_map(|slot| slot.lock().ok().and_then(|g| g.clone()))
            .collect();

        // Adapted models first so no adapter outlives its base in the runtime
        let (adapted, bases): (Vec<_>, Vec<_>) =
            handles.into_iter().partition(|h| h.base().is_some());

        let mut released = 0;
        for handle in adapted.iter().chain(bases.iter()) {
            if handle.released.swap(true, Ordering::AcqRel) {
                continue;
            }
            match self.backend.unload(handle.runtime()) {
                Ok(()) => released += 1,
                Err(e) => warn!(model = %handle.name(), "Could not unload model: {}", e),
            }
        }

        self.slots.clear();
        self.status.clear();
        info!(released, "Released cached models");
        released
    }
}

fn inspect(artifact: &ArtifactRef, path: &Path) -> Result<GgufHeader, LoadError> {
    gguf::inspect(path).map_err(|e| incompatible(artifact, &e.to_string()))
}

fn incompatible(artifact: &ArtifactRef, reason: &str) -> LoadError {
    LoadError::Incompatible {
        artifact: artifact.to_string(),
        reason: reason.to_string(),
    }
}

fn runtime_error(config: &ModelConfig, source: BackendError) -> LoadError {
    LoadError::Runtime {
        model: config.display_name(),
        source,
    }
}
