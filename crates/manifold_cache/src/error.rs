//! Error taxonomy for batched cache operations.
//!
//! `CacheError` covers the fatal, batch-aborting failures (configuration,
//! topology, pool, transport). `CodecError` covers per-value marshalling
//! failures; those are recovered locally by the batch operations and never
//! abort the surrounding batch: a value that fails to decode is a miss, and
//! a value that fails to encode is skipped.

use thiserror::Error;

/// Fatal failures that abort the whole batch call.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The capability cannot derive a cache key for this parameter.
    #[error("cannot derive cache key: {0}")]
    KeyDerivation(String),

    /// The topology could not resolve an owning pool for a key. This
    /// indicates a topology inconsistency and is never retried here.
    #[error("no shard pool owns key {key:?}: {message}")]
    Routing { key: String, message: String },

    /// Checking a connection out of a shard pool failed.
    #[error("connection checkout failed: {0}")]
    Pool(String),

    /// A shard pipeline failed mid-flight, or replies did not line up
    /// positionally with the enqueued commands.
    #[error("pipeline transport failed: {0}")]
    Transport(String),
}

/// Per-value marshalling failures. Recovered locally: logged, then the
/// value is treated as absent (read path) or skipped (write path).
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("cannot parse {raw:?}: {message}")]
    Parse { raw: String, message: String },

    #[error("malformed stored json: {message}")]
    Json { message: String },

    #[error("hash field {field:?} rejected stored value: {message}")]
    Field { field: String, message: String },

    /// The store answered with a reply shape this codec does not read,
    /// e.g. a field map where a plain string was expected.
    #[error("unexpected {0} reply for this value shape")]
    UnexpectedReply(&'static str),

    /// The encoded form does not fit the requested storage layout,
    /// e.g. a plain text encoding destined for whole-hash storage.
    #[error("{encoded} encoding does not fit {storage} storage")]
    ShapeMismatch {
        encoded: &'static str,
        storage: &'static str,
    },
}
