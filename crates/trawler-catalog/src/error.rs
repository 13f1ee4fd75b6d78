use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Failed to fetch {url}: {message}")]
    Fetch { url: String, message: String },

    #[error("Strategy generation failed: {0}")]
    GenerationFailed(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Failed to read seed file {path}: {message}")]
    SeedFile { path: PathBuf, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CatalogError {
    pub fn fetch(url: impl Into<String>, message: impl std::fmt::Display) -> Self {
        CatalogError::Fetch {
            url: url.into(),
            message: message.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CatalogError>;
