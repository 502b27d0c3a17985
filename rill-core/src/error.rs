//! Error types for rill-core.

use thiserror::Error;

use crate::codec::CodecError;
use crate::stores::StoreError;

/// Top-level error type for the processing engine.
///
/// Recoverable per-record failures (decode, encode, delivery, route misses)
/// never surface here; they are counted in processor metrics and logged.
/// What does surface is fatal: state store I/O, log client failures, flush
/// timeouts.
#[derive(Debug, Error)]
pub enum Error {
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("state store error: {0}")]
    Store(#[from] StoreError),

    #[error("log client error: {0}")]
    Log(#[from] rill_log::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("topology is closed")]
    Closed,
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
