// shared/src/lib.rs
use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("loader failed: {0}")]
    Loader(String),
    #[error("storage: {0}")]
    Storage(String),
    #[error("serialization: {0}")]
    Serialization(String),
    #[error("internal: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

pub mod config;
pub mod telemetry;
