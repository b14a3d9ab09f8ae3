//! In-memory stand-ins for the hub and the runtime, plus a tiny GGUF writer.
//!
//! Enabled for this crate's tests and, through the `testing` feature, for
//! dependants that want to exercise the loader without network access.

use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use promptlab_core::{ArtifactRef, Credential, CredentialError, Device, LoadOptions, SamplingParams};
use tempfile::TempDir;

use crate::backend::{BackendError, Completion, EncodedPrompt, InferenceBackend, RuntimeModel};
use crate::hub::{ArtifactHub, HubError};
use crate::runtime::options_tag;

/// The only token [`FakeHub`] accepts
pub const VALID_TOKEN: &str = "hf_valid_test_token";

/// Words a fake completion never exceeds, whatever the token budget
const MAX_FAKE_WORDS: u32 = 24;

#[derive(Debug, Clone)]
pub struct GgufFixture {
    pub architecture: String,
    pub name: Option<String>,
    pub kind: String,
    pub adapter_type: Option<String>,
    pub file_type: Option<u32>,
    /// Adds a `tokenizer.ggml.tokens` string array ahead of the other keys
    pub with_token_list: bool,
}

impl GgufFixture {
    pub fn model(architecture: &str, file_type: u32) -> Self {
        Self {
            architecture: architecture.to_string(),
            name: Some(format!("{} test model", architecture)),
            kind: "model".to_string(),
            adapter_type: None,
            file_type: Some(file_type),
            with_token_list: false,
        }
    }

    pub fn adapter(architecture: &str) -> Self {
        Self {
            architecture: architecture.to_string(),
            name: Some(format!("{} test adapter", architecture)),
            kind: "adapter".to_string(),
            adapter_type: Some("lora".to_string()),
            file_type: None,
            with_token_list: false,
        }
    }
}

fn put_string(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u64).to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
}

fn put_kv_string(buf: &mut Vec<u8>, key: &str, value: &str) {
    put_string(buf, key);
    buf.extend_from_slice(&8u32.to_le_bytes());
    put_string(buf, value);
}

/// Write a GGUF v3 file holding only the fixture's metadata
pub fn write_gguf(path: &Path, fixture: &GgufFixture) {
    let mut kvs = Vec::new();
    let mut kv_count = 0u64;

    if fixture.with_token_list {
        put_string(&mut kvs, "tokenizer.ggml.tokens");
        kvs.extend_from_slice(&9u32.to_le_bytes());
        kvs.extend_from_slice(&8u32.to_le_bytes());
        let tokens = ["<s>", "</s>", "hello", "world"];
        kvs.extend_from_slice(&(tokens.len() as u64).to_le_bytes());
        for token in tokens {
            put_string(&mut kvs, token);
        }
        // a scalar array too, skipped by seeking
        put_string(&mut kvs, "tokenizer.ggml.scores");
        kvs.extend_from_slice(&9u32.to_le_bytes());
        kvs.extend_from_slice(&6u32.to_le_bytes());
        kvs.extend_from_slice(&4u64.to_le_bytes());
        for _ in 0..4 {
            kvs.extend_from_slice(&0.5f32.to_le_bytes());
        }
        kv_count += 2;
    }

    put_kv_string(&mut kvs, "general.architecture", &fixture.architecture);
    kv_count += 1;
    put_kv_string(&mut kvs, "general.type", &fixture.kind);
    kv_count += 1;
    if let Some(name) = &fixture.name {
        put_kv_string(&mut kvs, "general.name", name);
        kv_count += 1;
    }
    if let Some(adapter_type) = &fixture.adapter_type {
        put_kv_string(&mut kvs, "adapter.type", adapter_type);
        kv_count += 1;
    }
    // unrelated u32 key before file_type
    put_string(&mut kvs, &format!("{}.context_length", fixture.architecture));
    kvs.extend_from_slice(&4u32.to_le_bytes());
    kvs.extend_from_slice(&4096u32.to_le_bytes());
    kv_count += 1;
    if let Some(file_type) = fixture.file_type {
        put_string(&mut kvs, "general.file_type");
        kvs.extend_from_slice(&4u32.to_le_bytes());
        kvs.extend_from_slice(&file_type.to_le_bytes());
        kv_count += 1;
    }

    let mut out = b"GGUF".to_vec();
    out.extend_from_slice(&3u32.to_le_bytes());
    out.extend_from_slice(&0u64.to_le_bytes());
    out.extend_from_slice(&kv_count.to_le_bytes());
    out.extend_from_slice(&kvs);

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    let mut file = std::fs::File::create(path).unwrap();
    file.write_all(&out).unwrap();
}

/// Hub that serves GGUF fixtures from a temp dir and accepts [`VALID_TOKEN`].
///
/// Files whose path mentions "lora" or "adapter" are served as a llama
/// adapter unless a fixture was set for the repo; all others as a Q4_K_M
/// llama model.
pub struct FakeHub {
    dir: TempDir,
    fixtures: Mutex<HashMap<String, GgufFixture>>,
    failing: Mutex<HashSet<String>>,
    fetches: AtomicUsize,
    verifies: AtomicUsize,
}

impl FakeHub {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
            fixtures: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            fetches: AtomicUsize::new(0),
            verifies: AtomicUsize::new(0),
        }
    }

    pub fn set_fixture(&self, repo_id: &str, fixture: GgufFixture) {
        self.fixtures
            .lock()
            .unwrap()
            .insert(repo_id.to_string(), fixture);
    }

    pub fn fail_fetch(&self, repo_id: &str) {
        self.failing.lock().unwrap().insert(repo_id.to_string());
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn verify_count(&self) -> usize {
        self.verifies.load(Ordering::SeqCst)
    }

    fn fixture_for(&self, artifact: &ArtifactRef) -> GgufFixture {
        if let Some(fixture) = self.fixtures.lock().unwrap().get(&artifact.repo_id) {
            return fixture.clone();
        }
        let path = artifact.hub_path().to_lowercase();
        if path.contains("lora") || path.contains("adapter") {
            GgufFixture::adapter("llama")
        } else {
            GgufFixture::model("llama", 15)
        }
    }
}

impl Default for FakeHub {
    fn default() -> Self {
        Self::new()
    }
}

impl ArtifactHub for FakeHub {
    fn verify(&self, credential: &Credential) -> Result<(), CredentialError> {
        self.verifies.fetch_add(1, Ordering::SeqCst);
        if credential.expose() == VALID_TOKEN {
            Ok(())
        } else {
            Err(CredentialError::Invalid("hub answered 401".to_string()))
        }
    }

    fn fetch(&self, artifact: &ArtifactRef, _credential: &Credential) -> Result<PathBuf, HubError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.failing.lock().unwrap().contains(&artifact.repo_id) {
            return Err(HubError::Download {
                artifact: artifact.to_string(),
                message: "404 Not Found".to_string(),
            });
        }

        let path = self
            .dir
            .path()
            .join(artifact.repo_id.replace('/', "--"))
            .join(artifact.hub_path());
        write_gguf(&path, &self.fixture_for(artifact));
        Ok(path)
    }
}

/// Runtime that answers with deterministic filler text.
///
/// At temperature 0 the text depends only on the model and the token
/// budget; above 0 it also carries a per-call counter so repeated calls
/// differ.
pub struct FakeBackend {
    register_delay: Option<Duration>,
    candidates: usize,
    placement: Option<Device>,
    registered: Mutex<HashSet<String>>,
    fail_register: Mutex<Option<String>>,
    last_params: Mutex<Option<SamplingParams>>,
    last_prompt: Mutex<Option<EncodedPrompt>>,
    unloaded: Mutex<Vec<String>>,
    registers: AtomicUsize,
    adapters: AtomicUsize,
    places: AtomicUsize,
    generates: AtomicUsize,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            register_delay: None,
            candidates: 1,
            placement: None,
            registered: Mutex::new(HashSet::new()),
            fail_register: Mutex::new(None),
            last_params: Mutex::new(None),
            last_prompt: Mutex::new(None),
            unloaded: Mutex::new(Vec::new()),
            registers: AtomicUsize::new(0),
            adapters: AtomicUsize::new(0),
            places: AtomicUsize::new(0),
            generates: AtomicUsize::new(0),
        }
    }

    pub fn with_register_delay(mut self, delay: Duration) -> Self {
        self.register_delay = Some(delay);
        self
    }

    /// Number of candidates each generate call returns
    pub fn with_candidates(mut self, candidates: usize) -> Self {
        self.candidates = candidates;
        self
    }

    /// Device `place` reports, as a remote runtime would
    pub fn with_placement(mut self, device: Device) -> Self {
        self.placement = Some(device);
        self
    }

    pub fn fail_next_register(&self, message: &str) {
        *self.fail_register.lock().unwrap() = Some(message.to_string());
    }

    pub fn register_count(&self) -> usize {
        self.registers.load(Ordering::SeqCst)
    }

    pub fn adapter_count(&self) -> usize {
        self.adapters.load(Ordering::SeqCst)
    }

    pub fn place_count(&self) -> usize {
        self.places.load(Ordering::SeqCst)
    }

    pub fn generate_count(&self) -> usize {
        self.generates.load(Ordering::SeqCst)
    }

    pub fn last_params(&self) -> Option<SamplingParams> {
        *self.last_params.lock().unwrap()
    }

    pub fn last_prompt(&self) -> Option<EncodedPrompt> {
        self.last_prompt.lock().unwrap().clone()
    }

    pub fn unloaded(&self) -> Vec<String> {
        self.unloaded.lock().unwrap().clone()
    }

    fn track(&self, name: String, digest: &str) -> RuntimeModel {
        self.registered.lock().unwrap().insert(name.clone());
        RuntimeModel {
            name,
            digest: digest.to_string(),
        }
    }
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InferenceBackend for FakeBackend {
    fn register(
        &self,
        artifact: &Path,
        options: &LoadOptions,
        _device: Device,
    ) -> Result<RuntimeModel, BackendError> {
        self.registers.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.register_delay {
            std::thread::sleep(delay);
        }
        if let Some(message) = self.fail_register.lock().unwrap().take() {
            return Err(BackendError::Failed(message));
        }

        let n = self.registers.load(Ordering::SeqCst);
        let stem = artifact
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(self.track(
            format!("fake/{}:{}", stem, options_tag(options)),
            &format!("sha256:{:064}", n),
        ))
    }

    fn apply_adapter(
        &self,
        base: &RuntimeModel,
        adapter: &Path,
        _options: &LoadOptions,
        _device: Device,
    ) -> Result<RuntimeModel, BackendError> {
        self.adapters.fetch_add(1, Ordering::SeqCst);
        let stem = adapter
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(self.track(format!("{}+{}", base.name, stem), &base.digest))
    }

    fn place(&self, _model: &RuntimeModel) -> Result<Option<Device>, BackendError> {
        self.places.fetch_add(1, Ordering::SeqCst);
        Ok(self.placement)
    }

    fn generate(
        &self,
        model: &RuntimeModel,
        prompt: &EncodedPrompt,
        params: &SamplingParams,
    ) -> Result<Vec<Completion>, BackendError> {
        let call = self.generates.fetch_add(1, Ordering::SeqCst);
        if !self.registered.lock().unwrap().contains(&model.name) {
            return Err(BackendError::ModelNotFound(format!(
                "model '{}' not found",
                model.name
            )));
        }

        *self.last_params.lock().unwrap() = Some(*params);
        *self.last_prompt.lock().unwrap() = Some(prompt.clone());

        let words = params.max_new_tokens.min(MAX_FAKE_WORDS);
        let completions = (0..self.candidates)
            .map(|candidate| {
                let mut text: Vec<String> = (0..words)
                    .map(|i| format!("{}#{}", model.name, i))
                    .collect();
                if params.temperature > 0.0 && !text.is_empty() {
                    text[0] = format!("sample{}.{}", call, candidate);
                }
                Completion {
                    text: text.join(" "),
                    tokens_generated: words,
                    prompt_tokens: 7,
                }
            })
            .collect();
        Ok(completions)
    }

    fn unload(&self, model: &RuntimeModel) -> Result<(), BackendError> {
        self.registered.lock().unwrap().remove(&model.name);
        self.unloaded.lock().unwrap().push(model.name.clone());
        Ok(())
    }
}
