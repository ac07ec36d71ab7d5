//! In-process memory-backed cluster implementing the topology traits.
//!
//! One `MemoryShard` per shard, each a mutex-guarded map with TTL honored at
//! read time. Keys route to shards by hashing modulo the shard count. The
//! shards count executed pipelines and commands so callers can observe the
//! round-trip behavior of a batch.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::cluster::{ClusterTopology, Command, Reply, ShardConn, ShardPool};
use crate::error::CacheError;

pub fn hash_key(key: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

#[derive(Clone, Debug)]
enum Stored {
    Text(String),
    Fields(HashMap<String, String>),
}

#[derive(Clone, Debug)]
struct Entry {
    value: Stored,
    expires_at: Option<Instant>,
}

impl Entry {
    fn live(&self) -> bool {
        self.expires_at.map_or(true, |at| Instant::now() < at)
    }
}

/// One shard of the memory cluster. Implements [`ShardPool`]; checkouts
/// share the shard's map behind its mutex.
pub struct MemoryShard {
    entries: Mutex<HashMap<String, Entry>>,
    pipelines: AtomicU64,
    commands: AtomicU64,
}

impl MemoryShard {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            pipelines: AtomicU64::new(0),
            commands: AtomicU64::new(0),
        }
    }

    /// Pipelines executed against this shard (one per round trip).
    pub fn pipelines_executed(&self) -> u64 {
        self.pipelines.load(Ordering::Relaxed)
    }

    /// Individual commands executed against this shard.
    pub fn commands_executed(&self) -> u64 {
        self.commands.load(Ordering::Relaxed)
    }

    fn apply(&self, entries: &mut HashMap<String, Entry>, command: &Command) -> Reply {
        match command {
            Command::Get { key } => match live_entry(entries, key) {
                Some(Entry {
                    value: Stored::Text(text),
                    ..
                }) => Reply::Text(text.clone()),
                _ => Reply::Missing,
            },
            Command::HashGet { key, field } => match live_entry(entries, key) {
                Some(Entry {
                    value: Stored::Fields(fields),
                    ..
                }) => match fields.get(field) {
                    Some(value) => Reply::Text(value.clone()),
                    None => Reply::Missing,
                },
                _ => Reply::Missing,
            },
            // A missing hash key reads back as an empty field map.
            Command::HashGetAll { key } => match live_entry(entries, key) {
                Some(Entry {
                    value: Stored::Fields(fields),
                    ..
                }) => Reply::Fields(fields.clone()),
                _ => Reply::Fields(HashMap::new()),
            },
            Command::SetWithTtl {
                key,
                ttl_seconds,
                value,
            } => {
                entries.insert(
                    key.clone(),
                    Entry {
                        value: Stored::Text(value.clone()),
                        expires_at: deadline(*ttl_seconds),
                    },
                );
                Reply::Ok
            }
            Command::HashSet { key, field, value } => {
                let entry = hash_entry(entries, key);
                if let Stored::Fields(fields) = &mut entry.value {
                    fields.insert(field.clone(), value.clone());
                }
                Reply::Ok
            }
            Command::HashSetAll { key, fields } => {
                let entry = hash_entry(entries, key);
                if let Stored::Fields(existing) = &mut entry.value {
                    for (field, value) in fields {
                        existing.insert(field.clone(), value.clone());
                    }
                }
                Reply::Ok
            }
            Command::Expire { key, ttl_seconds } => {
                if let Some(entry) = live_entry(entries, key) {
                    entry.expires_at = deadline(*ttl_seconds);
                }
                Reply::Ok
            }
            Command::Del { key } => {
                entries.remove(key);
                Reply::Ok
            }
        }
    }
}

impl Default for MemoryShard {
    fn default() -> Self {
        Self::new()
    }
}

fn deadline(ttl_seconds: i64) -> Option<Instant> {
    if ttl_seconds > 0 {
        Some(Instant::now() + Duration::from_secs(ttl_seconds as u64))
    } else {
        None
    }
}

/// Look a key up, discarding it first if its TTL has passed.
fn live_entry<'m>(entries: &'m mut HashMap<String, Entry>, key: &str) -> Option<&'m mut Entry> {
    if entries.get(key).is_some_and(|entry| !entry.live()) {
        entries.remove(key);
    }
    entries.get_mut(key)
}

/// The live hash entry for a key, creating an empty one when absent. A live
/// non-hash entry under the same key is replaced, matching a store where
/// hash writes clobber a string value.
fn hash_entry<'m>(entries: &'m mut HashMap<String, Entry>, key: &str) -> &'m mut Entry {
    let fresh = match live_entry(entries, key) {
        Some(Entry {
            value: Stored::Fields(_),
            ..
        }) => false,
        _ => true,
    };
    if fresh {
        entries.insert(
            key.to_string(),
            Entry {
                value: Stored::Fields(HashMap::new()),
                expires_at: None,
            },
        );
    }
    entries.get_mut(key).expect("entry was just ensured")
}

struct MemoryConn<'a> {
    shard: &'a MemoryShard,
}

impl ShardConn for MemoryConn<'_> {
    fn pipeline(&mut self, commands: &[Command]) -> Result<Vec<Reply>, CacheError> {
        self.shard.pipelines.fetch_add(1, Ordering::Relaxed);
        self.shard
            .commands
            .fetch_add(commands.len() as u64, Ordering::Relaxed);
        let mut entries = self
            .shard
            .entries
            .lock()
            .map_err(|_| CacheError::Transport("memory shard lock poisoned".to_string()))?;
        Ok(commands
            .iter()
            .map(|command| self.shard.apply(&mut entries, command))
            .collect())
    }
}

impl ShardPool for MemoryShard {
    fn checkout(&self) -> Result<Box<dyn ShardConn + '_>, CacheError> {
        Ok(Box::new(MemoryConn { shard: self }))
    }
}

/// An in-process sharded store: `shards` independent [`MemoryShard`]s with
/// keys routed by hash.
pub struct MemoryCluster {
    shards: Vec<Arc<MemoryShard>>,
}

impl MemoryCluster {
    pub fn new(shards: usize) -> Self {
        let shards = (0..shards.max(1))
            .map(|_| Arc::new(MemoryShard::new()))
            .collect();
        Self { shards }
    }

    pub fn shard_for_key(&self, key: &str) -> usize {
        (hash_key(key) as usize) % self.shards.len()
    }

    pub fn shards(&self) -> &[Arc<MemoryShard>] {
        &self.shards
    }

    /// Total pipelines executed across all shards.
    pub fn pipelines_executed(&self) -> u64 {
        self.shards.iter().map(|s| s.pipelines_executed()).sum()
    }

    /// Total commands executed across all shards.
    pub fn commands_executed(&self) -> u64 {
        self.shards.iter().map(|s| s.commands_executed()).sum()
    }
}

impl ClusterTopology for MemoryCluster {
    fn pool_for_key(&self, key: &str) -> Result<Arc<dyn ShardPool>, CacheError> {
        let shard = self.shard_for_key(key);
        Ok(self.shards[shard].clone())
    }
}
