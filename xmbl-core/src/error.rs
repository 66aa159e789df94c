//! Error kinds shared across the mempool, ledger, and storage subsystems.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum XmblError {
    #[error("authentication failed: {0}")]
    AuthError(String),

    #[error("one or more referenced inputs are already locked")]
    InputsLocked,

    #[error("insufficient validations: have {have}, need {need}")]
    InsufficientValidations { have: usize, need: usize },

    #[error("capacity exceeded: used {used} + incoming {incoming} > capacity {capacity}")]
    CapacityExceeded {
        used: u64,
        incoming: u64,
        capacity: u64,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("insufficient shards to reconstruct payload")]
    InsufficientShards,

    #[error("transaction already finalized: {0}")]
    AlreadyFinalized(String),

    #[error("invalid state transition: {0}")]
    InvalidState(String),

    #[error("io error: {0}")]
    IoError(String),

    #[error("operation timed out")]
    Timeout,
}

pub type XmblResult<T> = Result<T, XmblError>;

/// Retries `f` with exponential backoff (100/200/400/800/1600 ms) on
/// `XmblError::IoError`, up to 5 attempts total. Any other error, or the
/// final attempt's error, is returned immediately.
pub mod retry {
    use super::{XmblError, XmblResult};
    use std::future::Future;
    use std::time::Duration;

    const MAX_ATTEMPTS: u32 = 5;
    const BASE_DELAY_MS: u64 = 100;

    pub async fn with_backoff<T, F, Fut>(mut f: F) -> XmblResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = XmblResult<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match f().await {
                Ok(v) => return Ok(v),
                Err(XmblError::IoError(msg)) if attempt < MAX_ATTEMPTS => {
                    let delay = BASE_DELAY_MS * 2u64.pow(attempt - 1);
                    tracing::warn!(attempt, delay_ms = delay, "io error, retrying: {msg}");
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

}
