//! Query-time ranking of animal records against a photo.
//!
//! Exhaustive scan: every vectored record is scored against the query vector.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::{
    eid::Eid,
    records::{RecordStore, RecordStoreError},
    semantic::{
        embeddings::{EmbeddingClient, EmbeddingError},
        vector_math::cosine_similarity,
    },
};

/// Number of matches returned when not configured otherwise.
pub const DEFAULT_TOP_K: usize = 10;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SearchRequest {
    /// Base64-encoded query photo. A `data:` URL prefix is tolerated.
    #[serde(default)]
    pub image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarAnimal {
    pub id: Eid,
    pub data: Value,
    pub similarity: f32,
}

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("a base64 encoded image is required")]
    MissingImage,

    #[error("image is not valid base64: {0}")]
    InvalidImage(#[from] base64::DecodeError),

    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("record store failed: {0}")]
    Store(#[from] RecordStoreError),
}

impl SearchError {
    /// Whether the caller sent a bad request, as opposed to an internal fault.
    pub fn is_client_error(&self) -> bool {
        matches!(self, SearchError::MissingImage | SearchError::InvalidImage(_))
    }
}

pub struct SimilaritySearchHandler {
    embedder: Arc<dyn EmbeddingClient>,
    records: Arc<dyn RecordStore>,
    top_k: usize,
}

impl SimilaritySearchHandler {
    pub fn new(embedder: Arc<dyn EmbeddingClient>, records: Arc<dyn RecordStore>) -> Self {
        Self {
            embedder,
            records,
            top_k: DEFAULT_TOP_K,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    pub fn search(&self, request: &SearchRequest) -> Result<Vec<SimilarAnimal>, SearchError> {
        let image = request
            .image
            .as_deref()
            .map(str::trim)
            .filter(|image| !image.is_empty())
            .ok_or(SearchError::MissingImage)?;

        let image = decode_image(image)?;
        if image.is_empty() {
            return Err(SearchError::MissingImage);
        }

        self.search_bytes(&image)
    }

    /// Rank stored animals against raw image bytes.
    pub fn search_bytes(&self, image: &[u8]) -> Result<Vec<SimilarAnimal>, SearchError> {
        self.rank(image, self.top_k)
    }

    /// Like [`Self::search_bytes`] with an explicit number of matches.
    pub fn rank(&self, image: &[u8], top_k: usize) -> Result<Vec<SimilarAnimal>, SearchError> {
        let search_vector = self.embedder.embed(image)?;
        if search_vector.is_empty() {
            return Err(EmbeddingError::EmptyResponse.into());
        }

        let candidates = self.records.scan_vectored()?;
        let dimensions = search_vector.len();

        // (index into candidates, similarity), in scan order
        let mut scored: Vec<(usize, f32)> = candidates
            .par_iter()
            .enumerate()
            .filter_map(|(idx, (id, record))| {
                let stored = record.image_vector.as_deref().filter(|v| !v.is_empty())?;

                if stored.len() != dimensions {
                    log::warn!(
                        "skipping animal {id}: vector has {} dimensions, query has {dimensions}",
                        stored.len()
                    );
                    return None;
                }

                let similarity = cosine_similarity(&search_vector, stored);
                if !similarity.is_finite() {
                    log::warn!("skipping animal {id}: similarity is not finite");
                    return None;
                }

                Some((idx, similarity))
            })
            .collect();

        // stable: equal scores keep scan order
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(top_k);

        log::debug!(
            "ranked {} of {} vectored animals",
            scored.len(),
            candidates.len()
        );

        Ok(scored
            .into_iter()
            .map(|(idx, similarity)| {
                let (id, record) = &candidates[idx];
                SimilarAnimal {
                    id: id.clone(),
                    data: record.data(),
                    similarity,
                }
            })
            .collect())
    }
}

fn decode_image(image: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let payload = match image.strip_prefix("data:") {
        Some(data_url) => data_url
            .split_once("base64,")
            .map(|(_, payload)| payload)
            .unwrap_or(data_url),
        None => image,
    };

    STANDARD.decode(payload)
}
