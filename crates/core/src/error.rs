use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported file type or encoding: {filename}: {reason}")]
    Unsupported { filename: String, reason: String },

    #[error("extraction failed for {filename}: {reason}")]
    Extraction { filename: String, reason: String },

    #[error(transparent)]
    Retrieval(#[from] RetrievalError),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("collection already exists: {0}")]
    AlreadyExists(String),

    #[error("collection {collection} not ready after {attempts} attempts: {last_error}")]
    NotReady {
        collection: String,
        attempts: u32,
        last_error: String,
    },

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store request failed: {0}")]
    Request(String),

    #[error("retries exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("embedding provider error: {0}")]
    Embedding(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

pub type Result<T, E = ProcessingError> = std::result::Result<T, E>;
