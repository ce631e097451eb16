//! Image embedding clients.
//!
//! The embedding model lives outside this crate: either behind an HTTP API
//! ([`super::remote::RemoteEmbedder`]) or loaded in-process through fastembed
//! ([`LocalEmbedder`]). Both are used through [`EmbeddingClient`].

/// Error type for embedding operations
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Model initialization failed: {0}")]
    InitFailed(String),

    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),

    #[error("Embedding request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Embedding service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Embedding service returned no embedding")]
    EmptyResponse,

    #[error("Invalid model name: {0}")]
    InvalidModel(String),
}

/// Turns image bytes into a fixed-length vector.
pub trait EmbeddingClient: Send + Sync {
    fn embed(&self, image: &[u8]) -> Result<Vec<f32>, EmbeddingError>;

    /// Name of the model or endpoint, for logs.
    fn name(&self) -> &str;
}

/// Best-effort mime type for the image bytes, defaulting to JPEG.
pub fn sniff_mime(image: &[u8]) -> &'static str {
    match image::guess_format(image) {
        Ok(image::ImageFormat::Png) => "image/png",
        Ok(image::ImageFormat::WebP) => "image/webp",
        Ok(image::ImageFormat::Gif) => "image/gif",
        Ok(image::ImageFormat::Bmp) => "image/bmp",
        _ => "image/jpeg",
    }
}

#[cfg(feature = "local-embeddings")]
pub use local::LocalEmbedder;

#[cfg(feature = "local-embeddings")]
mod local {
    use fastembed::{ImageEmbedding, ImageInitOptions};
    use std::path::PathBuf;
    use std::sync::Mutex;

    use super::{EmbeddingClient, EmbeddingError};

    /// Wrapper around fastembed's ImageEmbedding model.
    /// Uses a Mutex because fastembed's embed() requires &mut self.
    pub struct LocalEmbedder {
        model: Mutex<ImageEmbedding>,
        model_name: String,
    }

    impl LocalEmbedder {
        /// Load the model, downloading it into `cache_dir/models` on first use.
        pub fn new(model_name: &str, cache_dir: PathBuf) -> Result<Self, EmbeddingError> {
            let model_enum = Self::parse_model_name(model_name)?;

            let models_dir = cache_dir.join("models");
            std::fs::create_dir_all(&models_dir).map_err(|e| {
                EmbeddingError::InitFailed(format!("Failed to create models directory: {}", e))
            })?;

            let options = ImageInitOptions::new(model_enum)
                .with_cache_dir(models_dir)
                .with_show_download_progress(true);

            let model = ImageEmbedding::try_new(options)
                .map_err(|e| EmbeddingError::InitFailed(e.to_string()))?;

            log::info!("loaded local image embedding model {model_name}");

            Ok(Self {
                model: Mutex::new(model),
                model_name: model_name.to_string(),
            })
        }

        fn parse_model_name(
            name: &str,
        ) -> Result<fastembed::ImageEmbeddingModel, EmbeddingError> {
            match name.to_lowercase().as_str() {
                "clip-vit-b-32" | "clipvitb32" => Ok(fastembed::ImageEmbeddingModel::ClipVitB32),
                "resnet50" => Ok(fastembed::ImageEmbeddingModel::Resnet50),
                "unicom-vit-b-16" | "unicomvitb16" => {
                    Ok(fastembed::ImageEmbeddingModel::UnicomVitB16)
                }
                "unicom-vit-b-32" | "unicomvitb32" => {
                    Ok(fastembed::ImageEmbeddingModel::UnicomVitB32)
                }
                "nomic-embed-vision-v1.5" | "nomicembedvisionv15" => {
                    Ok(fastembed::ImageEmbeddingModel::NomicEmbedVisionV15)
                }
                _ => Err(EmbeddingError::InvalidModel(format!(
                    "Unknown model: {}. Supported models: clip-vit-b-32, resnet50, unicom-vit-b-16, unicom-vit-b-32, nomic-embed-vision-v1.5",
                    name
                ))),
            }
        }
    }

    impl EmbeddingClient for LocalEmbedder {
        fn embed(&self, image: &[u8]) -> Result<Vec<f32>, EmbeddingError> {
            let mut model = self.model.lock().map_err(|e| {
                EmbeddingError::EmbeddingFailed(format!("Failed to acquire model lock: {}", e))
            })?;

            let embeddings = model
                .embed_bytes(&[image], None)
                .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?;

            embeddings
                .into_iter()
                .next()
                .filter(|embedding| !embedding.is_empty())
                .ok_or(EmbeddingError::EmptyResponse)
        }

        fn name(&self) -> &str {
            &self.model_name
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_invalid_model_name() {
            let temp_dir = std::env::temp_dir().join("petmatch-embed-invalid");
            let result = LocalEmbedder::new("nonexistent-model", temp_dir);
            assert!(matches!(result, Err(EmbeddingError::InvalidModel(_))));
        }

        // Requires model download - run with --ignored
        #[test]
        #[ignore = "requires model download"]
        fn test_embedding_generation() {
            let temp_dir = tempfile::tempdir().unwrap();
            let model = LocalEmbedder::new("clip-vit-b-32", temp_dir.path().to_path_buf()).unwrap();

            let mut img = image::RgbImage::new(32, 32);
            img.put_pixel(3, 3, image::Rgb([200, 10, 10]));
            let mut buf = Vec::new();
            img.write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Png)
                .unwrap();

            let embedding = model.embed(&buf).unwrap();
            assert_eq!(embedding.len(), 512);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png_bytes() -> Vec<u8> {
        let img = image::RgbaImage::new(1, 1);
        let mut buf = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn test_sniff_png() {
        assert_eq!(sniff_mime(&png_bytes()), "image/png");
    }

    #[test]
    fn test_sniff_defaults_to_jpeg() {
        assert_eq!(sniff_mime(&[0xFF, 0xD8, 0xFF, 0xE0]), "image/jpeg");
        assert_eq!(sniff_mime(b"not an image"), "image/jpeg");
    }
}
