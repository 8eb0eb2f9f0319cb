use storage::StorageError;
use thiserror::Error;

/// Errors that abort the import of a single file.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("unable to parse date '{value}': {source}")]
    Date {
        value: String,
        #[source]
        source: chrono::ParseError,
    },

    #[error("no {what} found in '{value}'")]
    NoMatch { what: &'static str, value: String },

    #[error("malformed document: {0}")]
    Malformed(String),

    #[error("HTML to XML conversion failed: {0}")]
    Conversion(String),

    #[error("unsupported file type: {0}")]
    UnsupportedFile(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, IngestError>;
