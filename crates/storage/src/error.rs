use rlp::DecoderError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("decode error: {0}")]
    Decode(#[from] DecoderError),
    #[error("heads index error: {0}")]
    HeadsIndex(#[from] serde_json::Error),
    #[error("poisoned lock")]
    LockError,
    #[error("{0}")]
    Custom(String),
}
