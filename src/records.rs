use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
    time::Instant,
};

use crate::eid::Eid;

/// Keys owned by the record itself; never accepted as domain fields.
pub const RESERVED_FIELDS: &[&str] = &[
    "id",
    "photoRef",
    "fotoUrl",
    "imageVector",
    "vectorGeneratedAt",
];

/// One adoptable animal.
///
/// `image_vector` and `vector_generated_at` are only ever set together through
/// [`RecordStore::set_image_vector`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnimalRecord {
    pub id: Eid,

    #[serde(default, alias = "fotoUrl", skip_serializing_if = "Option::is_none")]
    pub photo_ref: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_vector: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_generated_at: Option<DateTime<Utc>>,

    /// Domain fields (name, species, ...) passed through untouched.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl AnimalRecord {
    pub fn has_vector(&self) -> bool {
        self.image_vector
            .as_ref()
            .map(|vector| !vector.is_empty())
            .unwrap_or(false)
    }

    /// Record contents without the id, as returned to search clients.
    pub fn data(&self) -> Value {
        let mut value = serde_json::to_value(self).unwrap_or(Value::Null);
        if let Value::Object(ref mut object) = value {
            object.remove("id");
        }
        value
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnimalCreate {
    #[serde(default, alias = "fotoUrl", skip_serializing_if = "Option::is_none")]
    pub photo_ref: Option<String>,

    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum RecordStoreError {
    #[error("animal {0} not found")]
    NotFound(Eid),

    #[error("record store io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("record store is malformed: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("record store lock poisoned")]
    Poisoned,

    #[error("record store unavailable: {0}")]
    Unavailable(String),

    #[error("field {0:?} is reserved")]
    ReservedField(String),
}

pub trait RecordStore: Send + Sync {
    fn get(&self, id: &Eid) -> Result<AnimalRecord, RecordStoreError>;
    fn create(&self, animal: AnimalCreate) -> Result<AnimalRecord, RecordStoreError>;

    /// Atomically write `imageVector` together with a store-assigned `vectorGeneratedAt`.
    fn set_image_vector(
        &self,
        id: &Eid,
        vector: Vec<f32>,
    ) -> Result<AnimalRecord, RecordStoreError>;

    /// All records carrying a vector, in unspecified order.
    fn scan_vectored(&self) -> Result<Vec<(Eid, AnimalRecord)>, RecordStoreError>;

    /// Records still waiting for a vector.
    fn scan_unvectored(&self) -> Result<Vec<AnimalRecord>, RecordStoreError>;

    fn total(&self) -> Result<usize, RecordStoreError>;
}

/// Records kept in memory and persisted as a single JSON document.
#[derive(Debug, Clone)]
pub struct BackendJson {
    list: Arc<RwLock<Vec<AnimalRecord>>>,
    path: PathBuf,
}

impl BackendJson {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RecordStoreError> {
        let path = path.as_ref().to_path_buf();

        if let Err(err) = std::fs::metadata(&path) {
            match err.kind() {
                ErrorKind::NotFound => {
                    log::info!("Creating new record store at {}", path.display());
                    if let Some(parent) = path.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    persist(&path, &[])?;
                }
                _ => Err(err)?,
            }
        }

        let now = Instant::now();
        let data = std::fs::read(&path)?;
        let list: Vec<AnimalRecord> = serde_json::from_slice(&data)?;

        log::debug!(
            "loaded {} animals from {} in {:?}",
            list.len(),
            path.display(),
            now.elapsed()
        );

        Ok(Self {
            list: Arc::new(RwLock::new(list)),
            path,
        })
    }

}

/// Write the full document to a temp file and rename it over the original.
fn persist(path: &Path, list: &[AnimalRecord]) -> Result<(), RecordStoreError> {
    let data = serde_json::to_vec_pretty(list)?;
    let temp_path = path.with_extension(format!("{}.tmp", Eid::new()));

    std::fs::write(&temp_path, data)?;
    if let Err(err) = std::fs::rename(&temp_path, path) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(err.into());
    }

    Ok(())
}

impl RecordStore for BackendJson {
    fn get(&self, id: &Eid) -> Result<AnimalRecord, RecordStoreError> {
        let list = self.list.read().map_err(|_| RecordStoreError::Poisoned)?;
        list.iter()
            .find(|animal| &animal.id == id)
            .cloned()
            .ok_or_else(|| RecordStoreError::NotFound(id.clone()))
    }

    fn create(&self, animal: AnimalCreate) -> Result<AnimalRecord, RecordStoreError> {
        if let Some(key) = RESERVED_FIELDS
            .iter()
            .find(|key| animal.fields.contains_key(**key))
        {
            return Err(RecordStoreError::ReservedField(key.to_string()));
        }

        let mut list = self.list.write().map_err(|_| RecordStoreError::Poisoned)?;

        let record = AnimalRecord {
            id: Eid::new(),
            photo_ref: animal.photo_ref.filter(|photo_ref| !photo_ref.trim().is_empty()),
            image_vector: None,
            vector_generated_at: None,
            fields: animal.fields,
        };

        let mut next = list.clone();
        next.push(record.clone());
        persist(&self.path, &next)?;
        *list = next;

        Ok(record)
    }

    fn set_image_vector(
        &self,
        id: &Eid,
        vector: Vec<f32>,
    ) -> Result<AnimalRecord, RecordStoreError> {
        let mut list = self.list.write().map_err(|_| RecordStoreError::Poisoned)?;

        let idx = list
            .iter()
            .position(|animal| &animal.id == id)
            .ok_or_else(|| RecordStoreError::NotFound(id.clone()))?;

        let mut next = list.clone();
        next[idx].image_vector = Some(vector);
        next[idx].vector_generated_at = Some(Utc::now());

        // memory is only swapped once the document is on disk
        persist(&self.path, &next)?;
        let updated = next[idx].clone();
        *list = next;

        Ok(updated)
    }

    fn scan_vectored(&self) -> Result<Vec<(Eid, AnimalRecord)>, RecordStoreError> {
        let list = self.list.read().map_err(|_| RecordStoreError::Poisoned)?;
        Ok(list
            .iter()
            .filter(|animal| animal.image_vector.is_some())
            .map(|animal| (animal.id.clone(), animal.clone()))
            .collect())
    }

    fn scan_unvectored(&self) -> Result<Vec<AnimalRecord>, RecordStoreError> {
        let list = self.list.read().map_err(|_| RecordStoreError::Poisoned)?;
        Ok(list
            .iter()
            .filter(|animal| !animal.has_vector())
            .cloned()
            .collect())
    }

    fn total(&self) -> Result<usize, RecordStoreError> {
        let list = self.list.read().map_err(|_| RecordStoreError::Poisoned)?;
        Ok(list.len())
    }
}
