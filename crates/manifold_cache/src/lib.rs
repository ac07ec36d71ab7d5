//! Batched, pipelined read-through caching over a sharded key-value cluster.
//!
//! [`ClusterCache`] takes lists of application parameters, derives cache
//! keys, buckets them by owning shard pool, and issues one pipelined round
//! trip per shard for reads, writes, and deletes. Cache misses are handed to
//! a caller-supplied [`Loader`] backed by the system of record, and loaded
//! values are written back into the cache under the batch's TTL.
//!
//! The cluster itself (topology, pooling, wire protocol) is external and
//! injected through the traits in [`cluster`]. Value marshalling is declared
//! per call through the codecs in [`codec`]: scalars use their canonical
//! textual form, composites use JSON, and hash-stored composites go through
//! a per-type field table.
//!
//! Cross-shard ordering note: shard buckets are visited in no particular
//! order, so batch results do not preserve caller input order. Re-sort by
//! key when input order matters.

pub mod batch;
pub mod cluster;
pub mod codec;
pub mod error;
pub mod memory;

pub use batch::{BatchResult, ClusterCache, Loader, StringKeys, WriteKey};
pub use cluster::{
    group_by_shard, read_shard, ClusterTopology, Command, Reply, ShardConn, ShardGroup,
    ShardPool, Storage,
};
pub use codec::{
    field, Encoded, HashCodec, HashField, HashValue, JsonCodec, ScalarCodec, ValueCodec,
};
pub use error::{CacheError, CodecError};
