//! Vector generation for newly created animal records.
//!
//! Runs once per creation event: resolve the photo blob, embed it and store
//! the vector on the record. Failures are logged and reported as an
//! [`IngestOutcome`], never propagated to the event source.

use std::sync::Arc;

use crate::{
    eid::Eid,
    photo_ref::{BlobKey, PhotoRefError},
    records::{AnimalRecord, RecordStore, RecordStoreError},
    semantic::embeddings::{EmbeddingClient, EmbeddingError},
    storage::BlobStore,
};

/// A record-created event as delivered by the dispatcher.
#[derive(Debug, Clone)]
pub struct RecordCreated {
    pub id: Eid,
    pub snapshot: AnimalRecord,
}

impl From<AnimalRecord> for RecordCreated {
    fn from(snapshot: AnimalRecord) -> Self {
        Self {
            id: snapshot.id.clone(),
            snapshot,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("malformed photo reference: {0}")]
    MalformedPhotoRef(#[from] PhotoRefError),

    #[error("failed to fetch photo {key}: {source}")]
    Blob {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("embedding has {got} dimensions, expected {expected}")]
    Dimension { expected: usize, got: usize },

    #[error("record store failed: {0}")]
    Store(#[from] RecordStoreError),
}

#[derive(Debug)]
pub enum IngestOutcome {
    /// Vector written to the record.
    Stored { dimensions: usize },
    /// Record has no photo; nothing to do.
    Skipped,
    /// Processing ended early; the record was left untouched.
    Failed(IngestError),
}

impl IngestOutcome {
    #[cfg(test)]
    pub fn is_stored(&self) -> bool {
        matches!(self, IngestOutcome::Stored { .. })
    }
}

pub struct VectorIngestionHandler {
    embedder: Arc<dyn EmbeddingClient>,
    records: Arc<dyn RecordStore>,
    blobs: Arc<dyn BlobStore>,
    photo_folder: String,
    dimensions: Option<usize>,
}

impl VectorIngestionHandler {
    pub fn new(
        embedder: Arc<dyn EmbeddingClient>,
        records: Arc<dyn RecordStore>,
        blobs: Arc<dyn BlobStore>,
        photo_folder: &str,
    ) -> Self {
        Self {
            embedder,
            records,
            blobs,
            photo_folder: photo_folder.to_string(),
            dimensions: None,
        }
    }

    /// Reject embeddings whose length differs from `dimensions`.
    pub fn with_dimensions(mut self, dimensions: Option<usize>) -> Self {
        self.dimensions = dimensions;
        self
    }

    pub fn handle(&self, event: &RecordCreated) -> IngestOutcome {
        log::info!("processing photo for animal {}", event.id);

        let photo_ref = event
            .snapshot
            .photo_ref
            .as_deref()
            .filter(|photo_ref| !photo_ref.trim().is_empty());

        let Some(photo_ref) = photo_ref else {
            log::info!("animal {} has no photoRef, skipping", event.id);
            return IngestOutcome::Skipped;
        };

        match self.ingest(&event.id, photo_ref) {
            Ok(record) => {
                let dimensions = record.image_vector.map(|v| v.len()).unwrap_or_default();
                log::info!("stored {dimensions}-d vector for animal {}", event.id);
                IngestOutcome::Stored { dimensions }
            }
            Err(err) => {
                log::error!("failed to generate vector for animal {}: {err}", event.id);
                IngestOutcome::Failed(err)
            }
        }
    }

    /// Re-read the record from the store and ingest it.
    pub fn handle_id(&self, id: &Eid) -> IngestOutcome {
        match self.records.get(id) {
            Ok(snapshot) => self.handle(&RecordCreated {
                id: id.clone(),
                snapshot,
            }),
            Err(err) => {
                log::error!("failed to load animal {id}: {err}");
                IngestOutcome::Failed(err.into())
            }
        }
    }

    fn ingest(&self, id: &Eid, photo_ref: &str) -> Result<AnimalRecord, IngestError> {
        let key = BlobKey::from_photo_ref(photo_ref, &self.photo_folder)?;

        let image = self.blobs.read(&key.path()).map_err(|source| IngestError::Blob {
            key: key.path(),
            source,
        })?;
        log::debug!("fetched {} bytes from {key} for animal {id}", image.len());

        let vector = self.embedder.embed(&image)?;
        if vector.is_empty() {
            return Err(EmbeddingError::EmptyResponse.into());
        }
        if let Some(expected) = self.dimensions {
            if vector.len() != expected {
                return Err(IngestError::Dimension {
                    expected,
                    got: vector.len(),
                });
            }
        }

        Ok(self.records.set_image_vector(id, vector)?)
    }
}
