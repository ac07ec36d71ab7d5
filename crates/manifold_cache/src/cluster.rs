//! Cluster collaborator traits, the pipeline command model, and shard
//! routing.
//!
//! The cluster itself is external: topology resolution, connection pooling,
//! and the wire protocol all live behind the traits here. This module owns
//! the two building blocks the batch operations share, grouping a keyed
//! batch by owning pool and running one pipelined read per shard.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::CacheError;

/// One command enqueued on a shard pipeline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Get {
        key: String,
    },
    HashGet {
        key: String,
        field: String,
    },
    HashGetAll {
        key: String,
    },
    /// Plain string write with the TTL applied in the same command.
    SetWithTtl {
        key: String,
        ttl_seconds: i64,
        value: String,
    },
    HashSet {
        key: String,
        field: String,
        value: String,
    },
    /// Multi-field hash write; fields are applied in order.
    HashSetAll {
        key: String,
        fields: Vec<(String, String)>,
    },
    Expire {
        key: String,
        ttl_seconds: i64,
    },
    Del {
        key: String,
    },
}

/// Positional reply to one pipelined command.
#[derive(Clone, Debug, PartialEq)]
pub enum Reply {
    Ok,
    Text(String),
    Fields(HashMap<String, String>),
    Missing,
}

impl Reply {
    pub fn kind(&self) -> &'static str {
        match self {
            Reply::Ok => "ok",
            Reply::Text(_) => "text",
            Reply::Fields(_) => "fields",
            Reply::Missing => "missing",
        }
    }
}

/// How values are laid out in the store for one batch call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Storage<'a> {
    /// One plain string value per key.
    Plain,
    /// The value spreads across the key's hash fields.
    Hash,
    /// The whole encoded value occupies one designated hash field.
    HashField(&'a str),
}

impl Storage<'_> {
    pub fn kind(&self) -> &'static str {
        match self {
            Storage::Plain => "plain",
            Storage::Hash => "whole-hash",
            Storage::HashField(_) => "hash-field",
        }
    }

    fn read_command(&self, key: &str) -> Command {
        match self {
            Storage::Plain => Command::Get {
                key: key.to_string(),
            },
            Storage::Hash => Command::HashGetAll {
                key: key.to_string(),
            },
            Storage::HashField(field) => Command::HashGet {
                key: key.to_string(),
                field: (*field).to_string(),
            },
        }
    }
}

/// A checked-out connection to one shard. All commands handed to
/// [`ShardConn::pipeline`] execute as a single round trip; replies are
/// positionally ordered to match the commands.
pub trait ShardConn {
    fn pipeline(&mut self, commands: &[Command]) -> Result<Vec<Reply>, CacheError>;
}

/// A pool of equivalent connections to one shard. The connection returns to
/// the pool when the boxed handle drops, on every path.
pub trait ShardPool: Send + Sync {
    fn checkout(&self) -> Result<Box<dyn ShardConn + '_>, CacheError>;
}

/// The externally supplied cluster topology: which pool owns a key's shard.
///
/// The handle is shared and safe for concurrent batch calls; a resolution
/// failure indicates a topology inconsistency and aborts the batch.
pub trait ClusterTopology: Send + Sync {
    fn pool_for_key(&self, key: &str) -> Result<Arc<dyn ShardPool>, CacheError>;
}

/// The ordered `(key, payload)` entries destined for one pool.
pub struct ShardGroup<T> {
    pub pool: Arc<dyn ShardPool>,
    pub entries: Vec<(String, T)>,
}

impl<T: std::fmt::Debug> std::fmt::Debug for ShardGroup<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardGroup")
            .field("pool", &Arc::as_ptr(&self.pool).cast::<()>())
            .field("entries", &self.entries)
            .finish()
    }
}

/// Bucket a keyed batch by owning pool, preserving per-bucket insertion
/// order. Pools are identified by the pointer identity of their shared
/// handle. Groups come back in first-appearance order, which carries no
/// meaning for callers; cross-shard ordering is unspecified.
pub fn group_by_shard<T>(
    topology: &dyn ClusterTopology,
    items: Vec<(String, T)>,
) -> Result<Vec<ShardGroup<T>>, CacheError> {
    let mut groups: Vec<ShardGroup<T>> = Vec::new();
    let mut slots: HashMap<usize, usize> = HashMap::new();
    for (key, payload) in items {
        let pool = topology.pool_for_key(&key)?;
        let pool_id = Arc::as_ptr(&pool) as *const () as usize;
        let slot = *slots.entry(pool_id).or_insert_with(|| {
            groups.push(ShardGroup {
                pool: Arc::clone(&pool),
                entries: Vec::new(),
            });
            groups.len() - 1
        });
        groups[slot].entries.push((key, payload));
    }
    Ok(groups)
}

/// Issue one pipelined read per key against a single shard: checkout one
/// connection, enqueue one read command per key in the given order, execute
/// the pipeline as a single round trip, and return the replies in command
/// order. The connection returns to the pool when the handle drops, even
/// when the pipeline errors.
pub fn read_shard(
    pool: &dyn ShardPool,
    keys: &[String],
    storage: Storage<'_>,
) -> Result<Vec<Reply>, CacheError> {
    let commands: Vec<Command> = keys.iter().map(|key| storage.read_command(key)).collect();
    let mut conn = pool.checkout()?;
    let replies = conn.pipeline(&commands)?;
    if replies.len() != commands.len() {
        return Err(CacheError::Transport(format!(
            "pipeline returned {} replies for {} commands",
            replies.len(),
            commands.len()
        )));
    }
    Ok(replies)
}
