use crate::{
    app::App,
    config::{Config, EmbeddingProvider},
    records,
    semantic::{EmbeddingClient, RemoteEmbedder},
    storage,
};
use anyhow::{Context, Result};
use homedir::my_home;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Application factory for creating and configuring application components
pub struct AppFactory;

impl AppFactory {
    /// Build the application from the files under `paths`.
    pub fn create_app(paths: &AppPaths) -> Result<App> {
        let config = Self::create_config(paths)?;

        let records = Arc::new(
            records::BackendJson::load(&paths.records_path)
                .context("failed to load animal records")?,
        );
        let blobs = Arc::new(
            storage::BackendLocal::new(&paths.blobs_path)
                .context("failed to create blob storage")?,
        );
        let embedder = Self::create_embedder(&config, paths)?;

        Ok(App::new_with(config, records, blobs, embedder))
    }

    /// Load and validate configuration
    pub fn create_config(paths: &AppPaths) -> Result<Config> {
        let config = Config::load_with(&paths.base_path)?;
        config.validate().context("invalid config.yaml")?;
        Ok(config)
    }

    /// Create the embedding client selected by `embedding.provider`
    pub fn create_embedder(config: &Config, paths: &AppPaths) -> Result<Arc<dyn EmbeddingClient>> {
        let emb = &config.embedding;

        match emb.provider {
            EmbeddingProvider::Remote => {
                let endpoint = emb
                    .endpoint
                    .as_deref()
                    .context("embedding.endpoint is not set")?;
                log::info!("Using remote embedding endpoint: {}", endpoint);

                let embedder = RemoteEmbedder::new(
                    endpoint,
                    config.embedding_token(),
                    emb.dimensions,
                    Duration::from_secs(emb.timeout_secs),
                )?;
                Ok(Arc::new(embedder))
            }
            #[cfg(feature = "local-embeddings")]
            EmbeddingProvider::Local => {
                let embedder =
                    crate::semantic::LocalEmbedder::new(&emb.model, paths.base_path.clone())?;
                Ok(Arc::new(embedder))
            }
            #[cfg(not(feature = "local-embeddings"))]
            EmbeddingProvider::Local => {
                let _ = paths;
                anyhow::bail!("built without the local-embeddings feature")
            }
        }
    }

    /// Get application paths, creating the base directory
    pub fn get_paths() -> Result<AppPaths> {
        let base_path = Self::get_base_path()?;
        std::fs::create_dir_all(&base_path)
            .context("Failed to create application base directory")?;

        Ok(AppPaths::new(base_path))
    }

    fn get_base_path() -> Result<PathBuf> {
        if let Ok(base_path) = std::env::var("PETMATCH_BASE_PATH") {
            return Ok(PathBuf::from(base_path));
        }

        let home = my_home()
            .context("Could not determine home directory")?
            .context("Home directory path is empty")?;
        Ok(home.join(".local/share/petmatch"))
    }
}

/// Application paths structure
#[derive(Debug, Clone)]
pub struct AppPaths {
    pub base_path: PathBuf,
    pub records_path: PathBuf,
    pub blobs_path: PathBuf,
}

impl AppPaths {
    pub fn new(base_path: PathBuf) -> Self {
        Self {
            records_path: base_path.join("animals.json"),
            blobs_path: base_path.join("blobs"),
            base_path,
        }
    }
}
