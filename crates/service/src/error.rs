use eqs_contracts::codec::CodecError;
use eqs_docstore::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("tenant id is missing in the request")]
    MissingTenant,
    #[error("{0}")]
    RequestShape(String),
    #[error("multiple documents in `{collection}` share key {key}")]
    AmbiguousKey { collection: String, key: String },
    #[error("storage operation failed: {source}")]
    Storage {
        #[source]
        source: StoreError,
        /// The request that was being served, for diagnostics.
        detail: Option<serde_json::Value>,
    },
    #[error("failed to encode document: {0}")]
    Codec(#[from] CodecError),
}

impl ServiceError {
    pub fn request_shape(message: impl Into<String>) -> Self {
        ServiceError::RequestShape(message.into())
    }

    pub fn storage(source: StoreError, detail: Option<serde_json::Value>) -> Self {
        ServiceError::Storage { source, detail }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::MissingTenant => "ERR_TENANT_MISSING",
            ServiceError::RequestShape(_) => "ERR_INVALID_REQUEST",
            ServiceError::AmbiguousKey { .. } => "ERR_AMBIGUOUS_KEY",
            ServiceError::Storage { .. } => "ERR_STORE_UNAVAILABLE",
            ServiceError::Codec(_) => "ERR_INTERNAL",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ServiceError::Storage { .. })
    }
}

impl From<StoreError> for ServiceError {
    fn from(source: StoreError) -> Self {
        ServiceError::storage(source, None)
    }
}
