//! Photo similarity pipeline.
//!
//! # Architecture
//!
//! - `vector_math`: cosine similarity
//! - `embeddings`: embedding client trait and the in-process fastembed model
//! - `remote`: HTTP embedding client
//! - `ingest`: vector generation on record creation
//! - `search`: top-K ranking of stored records against a query photo

pub mod embeddings;
pub mod ingest;
pub mod remote;
pub mod search;
pub mod vector_math;

#[cfg(feature = "local-embeddings")]
pub use embeddings::LocalEmbedder;
pub use embeddings::EmbeddingClient;
pub use ingest::{IngestOutcome, RecordCreated, VectorIngestionHandler};
pub use remote::RemoteEmbedder;
pub use search::{SearchError, SearchRequest, SimilarAnimal, SimilaritySearchHandler};

/// Default local image embedding model
pub const DEFAULT_MODEL: &str = "clip-vit-b-32";
