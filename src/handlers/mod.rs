//! HTTP 处理器模块

pub mod auth;
pub mod health;
pub mod lease;
pub mod resource;

use crate::error::AppError;
use axum::body::Bytes;
use serde::de::DeserializeOwned;

/// Decodes a JSON body; an empty body means `T::default()`.
/// GET endpoints take their query object in the body, so this is used
/// instead of the `Json` extractor.
pub(crate) fn parse_body_or_default<T>(body: &Bytes) -> Result<T, AppError>
where
    T: DeserializeOwned + Default,
{
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    parse_body(body)
}

/// Decodes a required JSON body. Decode failures (including unknown
/// resource types) are client errors.
pub(crate) fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, AppError> {
    serde_json::from_slice(body).map_err(|e| AppError::bad_request(format!("invalid body: {}", e)))
}

/// Runs store, scheduler and hashing work off the async executor.
pub(crate) async fn blocking<T, F>(work: F) -> Result<T, AppError>
where
    F: FnOnce() -> Result<T, AppError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work).await?
}
