use crate::{eid::Eid, records::RecordStoreError, semantic::SearchError};

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("animal {0} not found")]
    NotFound(Eid),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Search(#[from] SearchError),

    #[error("{0}")]
    Store(RecordStoreError),

    #[error("io error: {0:?}")]
    IO(#[from] std::io::Error),

    #[error("Base64: {0:?}")]
    Base64(#[from] base64::DecodeError),

    #[error("unexpected error: {0:?}")]
    Other(#[from] anyhow::Error),
}

impl From<RecordStoreError> for AppError {
    fn from(err: RecordStoreError) -> Self {
        match err {
            RecordStoreError::NotFound(id) => AppError::NotFound(id),
            RecordStoreError::ReservedField(key) => {
                AppError::BadRequest(format!("field {key:?} is reserved"))
            }
            err => AppError::Store(err),
        }
    }
}
