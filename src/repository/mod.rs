//! 资源存储层
//! 文件持久化、内存三级索引与查询过滤

pub mod file_store;
pub mod filter;
pub mod store;

pub use file_store::{FileStore, Loaded};
pub use filter::{filter, Axis};
pub use store::{IndexedStore, Store};

use crate::models::ModelError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("storage I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to load {path}: {reason}")]
    Load { path: String, reason: String },

    #[error(transparent)]
    Model(#[from] ModelError),
}

impl StoreError {
    pub(crate) fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }
}
