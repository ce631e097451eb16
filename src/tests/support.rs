//! Test doubles shared by the cross-module tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::app::App;
use crate::config::Config;
use crate::eid::Eid;
use crate::records::{AnimalCreate, AnimalRecord, BackendJson, RecordStore, RecordStoreError};
use crate::semantic::embeddings::{EmbeddingClient, EmbeddingError};
use crate::storage::BackendLocal;

/// Embedder answering from a fixed table of image bytes -> vector.
#[derive(Default)]
pub struct FakeEmbedder {
    vectors: Mutex<HashMap<Vec<u8>, Vec<f32>>>,
    calls: AtomicUsize,
    fail: bool,
    panic_on: Option<Vec<u8>>,
}

impl FakeEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call fails as if the service were down.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn panicking_on(image: &[u8]) -> Self {
        Self {
            panic_on: Some(image.to_vec()),
            ..Default::default()
        }
    }

    pub fn with(self, image: &[u8], vector: Vec<f32>) -> Self {
        self.vectors
            .lock()
            .unwrap()
            .insert(image.to_vec(), vector);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl EmbeddingClient for FakeEmbedder {
    fn embed(&self, image: &[u8]) -> Result<Vec<f32>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.panic_on.as_deref() == Some(image) {
            panic!("embedder blew up");
        }

        if self.fail {
            return Err(EmbeddingError::Status {
                status: 503,
                body: "service unavailable".to_string(),
            });
        }

        self.vectors
            .lock()
            .unwrap()
            .get(image)
            .cloned()
            .ok_or_else(|| EmbeddingError::EmbeddingFailed("unknown test image".to_string()))
    }

    fn name(&self) -> &str {
        "fake"
    }
}

/// Record store whose backend is unreachable.
pub struct BrokenStore;

impl RecordStore for BrokenStore {
    fn get(&self, _id: &Eid) -> Result<AnimalRecord, RecordStoreError> {
        Err(RecordStoreError::Unavailable("connection refused".to_string()))
    }

    fn create(&self, _animal: AnimalCreate) -> Result<AnimalRecord, RecordStoreError> {
        Err(RecordStoreError::Unavailable("connection refused".to_string()))
    }

    fn set_image_vector(
        &self,
        _id: &Eid,
        _vector: Vec<f32>,
    ) -> Result<AnimalRecord, RecordStoreError> {
        Err(RecordStoreError::Unavailable("connection refused".to_string()))
    }

    fn scan_vectored(&self) -> Result<Vec<(Eid, AnimalRecord)>, RecordStoreError> {
        Err(RecordStoreError::Unavailable("connection refused".to_string()))
    }

    fn scan_unvectored(&self) -> Result<Vec<AnimalRecord>, RecordStoreError> {
        Err(RecordStoreError::Unavailable("connection refused".to_string()))
    }

    fn total(&self) -> Result<usize, RecordStoreError> {
        Err(RecordStoreError::Unavailable("connection refused".to_string()))
    }
}

/// Isolated record and blob stores in a fresh temp directory.
pub fn create_stores() -> (Arc<BackendJson>, Arc<BackendLocal>, tempfile::TempDir) {
    let tmp = tempfile::tempdir().expect("failed to create temp dir");

    let records = Arc::new(
        BackendJson::load(tmp.path().join("animals.json")).expect("failed to create record store"),
    );
    let blobs =
        Arc::new(BackendLocal::new(tmp.path().join("blobs")).expect("failed to create blob store"));

    (records, blobs, tmp)
}

pub fn animal(name: &str, photo_ref: Option<&str>) -> AnimalCreate {
    let mut fields = serde_json::Map::new();
    fields.insert("name".to_string(), name.into());
    fields.insert("species".to_string(), "dog".into());

    AnimalCreate {
        photo_ref: photo_ref.map(str::to_string),
        fields,
    }
}

/// Unit vector whose cosine similarity with `[1, 0]` is `similarity`.
pub fn vector_with_similarity(similarity: f32) -> Vec<f32> {
    vec![similarity, (1.0 - similarity * similarity).max(0.0).sqrt()]
}

/// App over fresh stores with the default config.
pub fn create_app(embedder: Arc<FakeEmbedder>) -> (Arc<App>, tempfile::TempDir) {
    let (records, blobs, tmp) = create_stores();
    let app = App::new_with(Config::default(), records, blobs, embedder);
    (Arc::new(app), tmp)
}
