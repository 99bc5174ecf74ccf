use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown collection: {0}")]
    UnknownCollection(String),

    #[error("Record in '{collection}' has no usable '{key_path}' key")]
    MissingKey {
        collection: String,
        key_path: String,
    },

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Lock poisoning means a writer panicked mid-transaction; the store is
    /// treated as unavailable rather than propagating the panic.
    pub(crate) fn poisoned(what: &str) -> Self {
        StoreError::Unavailable(format!("{} lock poisoned", what))
    }
}
