pub mod dispatch;
pub mod errors;
pub mod factory;

pub use errors::AppError;
pub use factory::AppFactory;

use std::sync::{Arc, Mutex};

use crate::{
    config::Config,
    eid::Eid,
    photo_ref::BlobKey,
    records::{AnimalCreate, AnimalRecord, RecordStore},
    semantic::{
        EmbeddingClient, IngestOutcome, RecordCreated, SearchRequest, SimilarAnimal,
        SimilaritySearchHandler, VectorIngestionHandler,
    },
    storage::BlobStore,
};
use dispatch::Dispatcher;
use indicatif::ProgressBar;
use rayon::prelude::*;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackfillReport {
    pub stored: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Wires the stores, the embedding client and both handlers together.
pub struct App {
    config: Arc<Config>,
    pub records: Arc<dyn RecordStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub ingest: Arc<VectorIngestionHandler>,
    pub search: Arc<SimilaritySearchHandler>,

    dispatcher: Mutex<Option<Dispatcher>>,
}

impl App {
    pub fn new_with(
        config: Config,
        records: Arc<dyn RecordStore>,
        blobs: Arc<dyn BlobStore>,
        embedder: Arc<dyn EmbeddingClient>,
    ) -> Self {
        log::info!("embedding photos with {}", embedder.name());

        let ingest = VectorIngestionHandler::new(
            embedder.clone(),
            records.clone(),
            blobs.clone(),
            &config.photo_folder,
        )
        .with_dimensions(config.embedding.dimensions);

        let search =
            SimilaritySearchHandler::new(embedder, records.clone()).with_top_k(config.search.top_k);

        Self {
            config: Arc::new(config),
            records,
            blobs,
            ingest: Arc::new(ingest),
            search: Arc::new(search),
            dispatcher: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Start delivering creation events to background workers.
    /// Until this is called, `create` runs ingestion inline.
    pub fn run_dispatcher(&self) {
        let mut dispatcher = match self.dispatcher.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if dispatcher.is_none() {
            *dispatcher = Some(Dispatcher::start(
                self.ingest.clone(),
                self.config.ingest_max_threads,
            ));
        }
    }

    pub fn shutdown(&self) {
        let dispatcher = match self.dispatcher.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(mut dispatcher) = dispatcher {
            dispatcher.shutdown();
        }
    }

    /// Create a record, optionally storing its photo first, and raise the creation event.
    pub fn create(
        &self,
        mut animal: AnimalCreate,
        photo: Option<Vec<u8>>,
    ) -> Result<AnimalRecord, AppError> {
        let mut stored_photo = None;
        if let Some(photo) = photo {
            if photo.is_empty() {
                return Err(AppError::BadRequest("photo is empty".to_string()));
            }
            let key = BlobKey::new(&self.config.photo_folder, &format!("{}.jpg", Eid::new()))
                .map_err(|err| AppError::Other(err.into()))?;
            self.blobs.write(&key.path(), &photo)?;
            animal.photo_ref = Some(key.path());
            stored_photo = Some(key.path());
        }

        let record = match self.records.create(animal) {
            Ok(record) => record,
            Err(err) => {
                if let Some(key) = stored_photo {
                    if let Err(cleanup_err) = self.blobs.delete(&key) {
                        log::warn!("failed to remove orphaned photo {key}: {cleanup_err}");
                    }
                }
                return Err(err.into());
            }
        };
        log::info!("created animal {}", record.id);

        let event = RecordCreated::from(record.clone());
        let inline = {
            let dispatcher = match self.dispatcher.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let inline = match dispatcher.as_ref() {
                Some(dispatcher) => {
                    dispatcher.dispatch(event);
                    None
                }
                None => Some(event),
            };
            inline
        };

        // no dispatcher running: ingest on the caller's thread
        if let Some(event) = inline {
            self.ingest.handle(&event);
        }

        Ok(record)
    }

    pub fn get(&self, id: &Eid) -> Result<AnimalRecord, AppError> {
        Ok(self.records.get(id)?)
    }

    pub fn search(&self, request: &SearchRequest) -> Result<Vec<SimilarAnimal>, AppError> {
        Ok(self.search.search(request)?)
    }

    /// Re-run ingestion for one record.
    pub fn ingest(&self, id: &Eid) -> IngestOutcome {
        self.ingest.handle_id(id)
    }

    /// Run ingestion for every record that has no vector yet.
    pub fn backfill(&self, progress: &ProgressBar) -> Result<BackfillReport, AppError> {
        let pending = self.records.scan_unvectored()?;
        progress.set_length(pending.len() as u64);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.ingest_max_threads as usize)
            .build()
            .map_err(|err| AppError::Other(err.into()))?;

        let outcomes: Vec<IngestOutcome> = pool.install(|| {
            pending
                .into_par_iter()
                .map(|record| {
                    let outcome = self.ingest.handle(&RecordCreated::from(record));
                    progress.inc(1);
                    outcome
                })
                .collect()
        });

        let mut report = BackfillReport::default();
        for outcome in outcomes {
            match outcome {
                IngestOutcome::Stored { .. } => report.stored += 1,
                IngestOutcome::Skipped => report.skipped += 1,
                IngestOutcome::Failed(_) => report.failed += 1,
            }
        }

        Ok(report)
    }

    /// Records and how many of them are searchable.
    pub fn stats(&self) -> Result<(usize, usize), AppError> {
        let total = self.records.total()?;
        let vectored = self.records.scan_vectored()?.len();
        Ok((total, vectored))
    }
}

impl Drop for App {
    fn drop(&mut self) {
        self.shutdown();
    }
}
