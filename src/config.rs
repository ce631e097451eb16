use crate::{
    semantic::{search::DEFAULT_TOP_K, DEFAULT_MODEL},
    storage::{self, BlobStore},
};
use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const CONFIG_FILE: &str = "config.yaml";

const INGEST_MAX_THREADS: u16 = 4;
const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_PHOTO_FOLDER: &str = "animals";
/// Default embedding request timeout in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_TOKEN_ENV: &str = "PETMATCH_EMBEDDING_TOKEN";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// Hosted model reached over HTTP
    #[default]
    Remote,
    /// In-process fastembed model
    Local,
}

/// Configuration of the embedding model
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub provider: EmbeddingProvider,

    /// Predict endpoint of the hosted model
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Name of the environment variable holding a bearer token for `endpoint`
    #[serde(default = "default_token_env")]
    pub api_token_env: String,

    /// Timeout for a single embedding request in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Local model name (e.g., "clip-vit-b-32")
    #[serde(default = "default_model")]
    pub model: String,

    /// Expected embedding length; vectors of any other length are rejected
    #[serde(default)]
    pub dimensions: Option<usize>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::default(),
            endpoint: None,
            api_token_env: DEFAULT_TOKEN_ENV.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            model: DEFAULT_MODEL.to_string(),
            dimensions: None,
        }
    }
}

fn default_token_env() -> String {
    DEFAULT_TOKEN_ENV.to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Number of matches returned per search
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
        }
    }
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "ingest_max_threads")]
    pub ingest_max_threads: u16,
    /// Blob folder holding animal photos
    #[serde(default = "default_photo_folder")]
    pub photo_folder: String,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            ingest_max_threads: INGEST_MAX_THREADS,
            photo_folder: default_photo_folder(),
            search: SearchConfig::default(),
            embedding: EmbeddingConfig::default(),
            base_path: PathBuf::new(),
        }
    }
}

fn default_listen_addr() -> String {
    DEFAULT_LISTEN_ADDR.to_string()
}

fn ingest_max_threads() -> u16 {
    INGEST_MAX_THREADS
}

fn default_photo_folder() -> String {
    DEFAULT_PHOTO_FOLDER.to_string()
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.ingest_max_threads == 0 || self.ingest_max_threads > 100 {
            bail!(
                "ingest_max_threads must be between 1 and 100, got {}",
                self.ingest_max_threads
            );
        }

        let folder = self.photo_folder.trim();
        if folder.is_empty() || folder.contains('/') || folder == "." || folder == ".." {
            bail!(
                "photo_folder must be a single folder name, got {:?}",
                self.photo_folder
            );
        }

        if self.search.top_k == 0 {
            bail!("search.top_k must be greater than 0");
        }

        let emb = &self.embedding;
        if emb.timeout_secs == 0 {
            bail!("embedding.timeout_secs must be greater than 0");
        }

        if emb.dimensions == Some(0) {
            bail!("embedding.dimensions must be greater than 0");
        }

        if emb.provider == EmbeddingProvider::Remote {
            let endpoint = emb
                .endpoint
                .as_deref()
                .context("embedding.endpoint is required when embedding.provider is 'remote'")?;
            url::Url::parse(endpoint)
                .with_context(|| format!("embedding.endpoint {endpoint:?} is not a valid url"))?;
        }

        Ok(())
    }

    /// Load `config.yaml` from `base_path`, writing defaults if it does not exist.
    pub fn load_with(base_path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let store = storage::BackendLocal::new(base_path.as_ref())
            .context("failed to create config directory")?;

        // create new if does not exist
        if !store.exists(CONFIG_FILE) {
            log::info!("writing default config to {}", base_path.as_ref().display());
            store.write(
                CONFIG_FILE,
                serde_yml::to_string(&Self::default())?.as_bytes(),
            )?;
        }

        let config_str = String::from_utf8(store.read(CONFIG_FILE)?)
            .context("config file is not valid utf8")?;
        let mut config: Self = serde_yml::from_str(&config_str).context("config is malformed")?;

        config.base_path = base_path.as_ref().to_path_buf();

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config)? {
            config.save()?;
        }

        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let store = storage::BackendLocal::new(&self.base_path)?;

        let config_str = serde_yml::to_string(&self)?;
        store.write(CONFIG_FILE, config_str.as_bytes())?;
        Ok(())
    }

    /// Bearer token for the embedding endpoint, read from the configured env var.
    pub fn embedding_token(&self) -> Option<String> {
        std::env::var(&self.embedding.api_token_env)
            .ok()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
    }
}
