pub mod cache;
pub mod config;

pub use cache::{BlobStore, CacheError, LocalCache, MemoryBlobStore, SqliteBlobStore};
pub use config::{Config, ConfigError};
