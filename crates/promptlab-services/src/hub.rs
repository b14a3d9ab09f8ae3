//! Hugging Face Hub access
//!
//! Artifacts are resolved through the `hf-hub` cache, so a file that was
//! downloaded once is served from disk on later runs.

use std::path::{Path, PathBuf};
use std::time::Duration;

use hf_hub::api::sync::ApiBuilder;
use hf_hub::{Cache, Repo, RepoType};
use promptlab_core::{ArtifactRef, Credential, CredentialError};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

const HUB_ENDPOINT: &str = "https://huggingface.co";
const CHECK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum HubError {
    #[error("Download of {artifact} failed: {message}")]
    Download { artifact: String, message: String },
    #[error("Hub client setup failed: {0}")]
    Setup(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Resolves artifact references to local files
pub trait ArtifactHub: Send + Sync {
    /// Confirm the token is accepted by the hub
    fn verify(&self, credential: &Credential) -> Result<(), CredentialError>;

    /// Local path of the artifact, downloading it if it is not cached
    fn fetch(&self, artifact: &ArtifactRef, credential: &Credential) -> Result<PathBuf, HubError>;
}

pub struct HfHub {
    endpoint: String,
    cache_dir: PathBuf,
}

impl HfHub {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            endpoint: HUB_ENDPOINT.to_string(),
            cache_dir: cache_dir.into(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn repo(artifact: &ArtifactRef) -> Repo {
        match &artifact.revision {
            Some(rev) => Repo::with_revision(artifact.repo_id.clone(), RepoType::Model, rev.clone()),
            None => Repo::model(artifact.repo_id.clone()),
        }
    }

    /// Path of the artifact if it is already in the local cache
    pub fn cached(&self, artifact: &ArtifactRef) -> Option<PathBuf> {
        Cache::new(self.cache_dir.clone())
            .repo(Self::repo(artifact))
            .get(&artifact.hub_path())
    }
}

impl ArtifactHub for HfHub {
    #[instrument(skip_all, fields(endpoint = %self.endpoint))]
    fn verify(&self, credential: &Credential) -> Result<(), CredentialError> {
        let url = format!("{}/api/whoami-v2", self.endpoint);
        debug!("Checking access token");

        match ureq::get(&url)
            .set("Authorization", &format!("Bearer {}", credential.expose()))
            .timeout(CHECK_TIMEOUT)
            .call()
        {
            Ok(_) => {
                info!("Access token accepted");
                Ok(())
            }
            Err(ureq::Error::Status(code @ (401 | 403), _)) => {
                warn!(code, "Access token rejected");
                Err(CredentialError::Invalid(format!("hub answered {}", code)))
            }
            Err(e) => Err(CredentialError::Check(e.to_string())),
        }
    }

    #[instrument(skip(self, credential), fields(artifact = %artifact))]
    fn fetch(&self, artifact: &ArtifactRef, credential: &Credential) -> Result<PathBuf, HubError> {
        if let Some(path) = self.cached(artifact) {
            info!(path = %path.display(), "Artifact found in local cache");
            return Ok(path);
        }

        std::fs::create_dir_all(&self.cache_dir)?;

        let api = ApiBuilder::new()
            .with_endpoint(self.endpoint.clone())
            .with_cache_dir(self.cache_dir.clone())
            .with_token(Some(credential.expose().to_string()))
            .with_progress(false)
            .build()
            .map_err(|e| HubError::Setup(e.to_string()))?;

        info!("Downloading artifact");
        let path = api
            .repo(Self::repo(artifact))
            .get(&artifact.hub_path())
            .map_err(|e| HubError::Download {
                artifact: artifact.to_string(),
                message: e.to_string(),
            })?;

        info!(path = %path.display(), "Artifact downloaded");
        Ok(path)
    }
}
