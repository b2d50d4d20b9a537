//! Timeout enforcement.
//!
//! Every outbound attempt carries a deadline. Exceeding it yields a
//! transient `Timeout` error, eligible for retry like any network failure.

use std::future::Future;
use std::time::Duration;

use crate::error::{ClientError, ClientResult};

/// Run `fut`, failing with `ClientError::Timeout` once `limit` elapses.
pub async fn with_timeout<T, F>(limit: Duration, fut: F) -> ClientResult<T>
where
    F: Future<Output = ClientResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(ClientError::Timeout(limit.as_millis() as u64)),
    }
}
