use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum ExportError {
    #[error("dataset not found in catalog: {0}")]
    DatasetNotFound(String),

    #[error("catalog request failed: {0}")]
    CatalogHttp(String),

    #[error("catalog returned status {status}: {message}")]
    CatalogStatus { status: u16, message: String },

    #[error("failed to parse catalog response: {0}")]
    CatalogParse(String),

    #[error("artifact download failed: {0}")]
    ArtifactHttp(String),

    #[error("artifact server returned status {status}: {message}")]
    ArtifactStatus { status: u16, message: String },

    #[error("failed to deserialize R object: {0}")]
    Deserialization(String),

    #[error("unsupported RDS compression: {0}")]
    UnsupportedCompression(String),

    #[error("extraction failed: {0}")]
    Extraction(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("csv error: {0}")]
    Csv(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl ExportError {
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            ExportError::CatalogHttp(_)
                | ExportError::CatalogStatus { .. }
                | ExportError::CatalogParse(_)
                | ExportError::ArtifactHttp(_)
                | ExportError::ArtifactStatus { .. }
        )
    }
}

impl From<csv::Error> for ExportError {
    fn from(err: csv::Error) -> Self {
        ExportError::Csv(err.to_string())
    }
}
