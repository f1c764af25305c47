use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("search index error: {0}")]
    Tantivy(#[from] tantivy::TantivyError),

    #[error("database error: {0}")]
    Redb(#[from] redb::Error),

    #[error("database open error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("database storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("database transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("database table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("database commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("model '{model}' unavailable: {reason}")]
    ModelUnavailable { model: String, reason: String },

    #[error("document store for index '{index}' unreachable: {reason}")]
    StoreUnreachable { index: String, reason: String },

    #[error("unsupported input type: {media_type}")]
    UnsupportedInputType { media_type: String },

    #[error("batch {stage} failed: {reason}")]
    BatchExecution { stage: &'static str, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("data directory does not exist and could not be created: {0}")]
    DataDir(PathBuf),
}

impl Error {
    /// Wrap any displayable failure as a whole-batch execution error.
    pub fn batch(stage: &'static str, err: impl std::fmt::Display) -> Self {
        Error::BatchExecution {
            stage,
            reason: err.to_string(),
        }
    }
}
