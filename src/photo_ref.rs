//! Resolution of an animal's `photoRef` to a blob key.
//!
//! Two forms are understood:
//! - download URLs where the key is path-encoded after the folder marker,
//!   e.g. `https://host/v0/b/bucket/o/animals%2Frex.jpg?alt=media&token=..`
//! - plain storage paths, e.g. `animals/rex.jpg`

use percent_encoding::percent_decode_str;
use url::Url;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PhotoRefError {
    #[error("photo reference is empty")]
    Empty,

    #[error("photo reference is not a valid url: {0}")]
    InvalidUrl(String),

    #[error("photo reference does not point into the {0:?} folder")]
    MissingFolder(String),

    #[error("photo reference has no object name")]
    EmptyName,

    #[error("photo reference object name is not valid utf-8")]
    InvalidEncoding,

    #[error("photo reference object name {0:?} is not a safe key")]
    UnsafeName(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobKey {
    pub folder: String,
    pub name: String,
}

impl BlobKey {
    pub fn new(folder: &str, name: &str) -> Result<Self, PhotoRefError> {
        validate_name(name)?;
        Ok(Self {
            folder: folder.to_string(),
            name: name.to_string(),
        })
    }

    /// Derive the blob key from a record's photo reference.
    pub fn from_photo_ref(photo_ref: &str, folder: &str) -> Result<Self, PhotoRefError> {
        let photo_ref = photo_ref.trim();
        if photo_ref.is_empty() {
            return Err(PhotoRefError::Empty);
        }

        let encoded_marker = format!("{folder}%2F");

        let encoded_name = if photo_ref.contains("://") {
            let url =
                Url::parse(photo_ref).map_err(|err| PhotoRefError::InvalidUrl(err.to_string()))?;
            // `path()` keeps percent-encoding and excludes the query
            after_marker(url.path(), &encoded_marker)
                .ok_or_else(|| PhotoRefError::MissingFolder(folder.to_string()))?
                .to_string()
        } else if let Some(rest) = after_marker(photo_ref, &encoded_marker) {
            rest.to_string()
        } else if let Some(rest) = photo_ref.strip_prefix(&format!("{folder}/")) {
            rest.to_string()
        } else {
            return Err(PhotoRefError::MissingFolder(folder.to_string()));
        };

        let encoded_name = encoded_name
            .split('?')
            .next()
            .unwrap_or_default();

        let name = percent_decode_str(encoded_name)
            .decode_utf8()
            .map_err(|_| PhotoRefError::InvalidEncoding)?;

        Self::new(folder, &name)
    }

    /// Storage key within the blob store.
    pub fn path(&self) -> String {
        format!("{}/{}", self.folder, self.name)
    }
}

impl std::fmt::Display for BlobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path())
    }
}

/// Text after the first (ASCII case-insensitive) occurrence of `marker`.
fn after_marker<'a>(haystack: &'a str, marker: &str) -> Option<&'a str> {
    let idx = haystack
        .to_ascii_lowercase()
        .find(&marker.to_ascii_lowercase())?;
    Some(&haystack[idx + marker.len()..])
}

fn validate_name(name: &str) -> Result<(), PhotoRefError> {
    if name.is_empty() {
        return Err(PhotoRefError::EmptyName);
    }

    let unsafe_segment = name
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == "..");

    if unsafe_segment || name.contains('\\') {
        return Err(PhotoRefError::UnsafeName(name.to_string()));
    }

    Ok(())
}
