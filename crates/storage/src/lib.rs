pub mod api;
pub mod backend;
pub mod cache;
pub mod error;
pub mod keys;
mod store;

pub use api::{StorageBackend, StorageReadView, StorageWriteBatch};
pub use error::StoreError;
pub use store::{EngineType, Store, StoreBatch};
