//! Batched read-through, write-through, and delete operations.
//!
//! Every operation follows the same shape: derive cache keys, bucket the
//! batch by owning shard pool, then run exactly one pipelined round trip per
//! shard touched. Reads classify each key as a hit or a miss, hand the miss
//! set to the caller's backing-store loader, and write loaded values back
//! into the cache under the batch's TTL.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::cluster::{
    group_by_shard, read_shard, ClusterTopology, Command, ShardGroup, Storage,
};
use crate::codec::{Encoded, ValueCodec};
use crate::error::{CacheError, CodecError};

/// Outcome of one batch read.
///
/// Every input param lands in exactly one of `hit_params` or `miss_params`.
/// `hits` and `hit_params` are parallel for cache hits; pairs supplied by
/// the loader are appended to `hits` afterwards while their params stay in
/// `miss_params`, which always reports the original cache-miss set.
///
/// Shard buckets are visited in no particular order, so `hits` does NOT
/// preserve the caller's input order. Callers that need input order must
/// re-sort by key.
#[derive(Debug, Clone)]
pub struct BatchResult<P, V> {
    pub hits: Vec<(P, V)>,
    pub hit_params: Vec<P>,
    pub miss_params: Vec<P>,
}

impl<P, V> BatchResult<P, V> {
    fn with_capacity(len: usize) -> Self {
        Self {
            hits: Vec::with_capacity(len),
            hit_params: Vec::new(),
            miss_params: Vec::new(),
        }
    }

    /// The hit values alone, in shard-processing order.
    pub fn into_values(self) -> Vec<V> {
        self.hits.into_iter().map(|(_, value)| value).collect()
    }
}

/// Caller-supplied capability for one read-through batch: derives the cache
/// key for a parameter and fetches cache-missed parameters from the backing
/// store.
pub trait Loader<P, V> {
    fn read_key(&self, param: &P) -> Result<String, CacheError>;

    /// Key used when writing a loaded value back. Defaults to the read key
    /// of the same parameter.
    fn write_key(&self, param: &P, value: &V) -> Result<String, CacheError> {
        let _ = value;
        self.read_key(param)
    }

    /// Fetch values for the cache-missed parameters. An empty result means
    /// the misses stay misses; absence is not cached.
    fn fetch(&self, misses: &[P]) -> Result<Vec<(P, V)>, CacheError> {
        let _ = misses;
        Ok(Vec::new())
    }
}

/// Caller-supplied capability deriving the cache key for an explicit write
/// or delete.
pub trait WriteKey<P, V> {
    fn write_key(&self, param: &P, value: &V) -> Result<String, CacheError>;
}

/// Uses the string parameter itself as the cache key.
pub struct StringKeys;

impl<P: AsRef<str>, V> Loader<P, V> for StringKeys {
    fn read_key(&self, param: &P) -> Result<String, CacheError> {
        Ok(param.as_ref().to_string())
    }
}

impl<P: AsRef<str>, V> WriteKey<P, V> for StringKeys {
    fn write_key(&self, param: &P, _value: &V) -> Result<String, CacheError> {
        Ok(param.as_ref().to_string())
    }
}

/// Write-back adapter: keys loaded pairs with the loader's own derivation.
struct LoaderKeys<'a, P, V>(&'a dyn Loader<P, V>);

impl<P, V> WriteKey<P, V> for LoaderKeys<'_, P, V> {
    fn write_key(&self, param: &P, value: &V) -> Result<String, CacheError> {
        self.0.write_key(param, value)
    }
}

/// Batched, pipelined cache operations over an injected cluster topology.
///
/// The topology handle is shared and read-only after construction; several
/// independently configured instances can coexist. Each batch call's
/// pipelines are private to that call.
pub struct ClusterCache {
    topology: Arc<dyn ClusterTopology>,
}

impl ClusterCache {
    pub fn new(topology: Arc<dyn ClusterTopology>) -> Self {
        Self { topology }
    }

    /// Read-through batch read of plain string-stored values; returns the
    /// hit values only, in shard-processing order.
    ///
    /// `ttl_seconds <= 0` disables writing loaded values back.
    pub fn batch_read<P: Clone, V>(
        &self,
        params: Vec<P>,
        loader: &dyn Loader<P, V>,
        codec: &dyn ValueCodec<V>,
        ttl_seconds: i64,
    ) -> Result<Vec<V>, CacheError> {
        Ok(self
            .batch_read_pairs(params, loader, codec, ttl_seconds)?
            .into_values())
    }

    /// Read-through batch read of plain string-stored values with full
    /// hit/miss detail.
    pub fn batch_read_pairs<P: Clone, V>(
        &self,
        params: Vec<P>,
        loader: &dyn Loader<P, V>,
        codec: &dyn ValueCodec<V>,
        ttl_seconds: i64,
    ) -> Result<BatchResult<P, V>, CacheError> {
        self.read_pairs(params, loader, codec, ttl_seconds, Storage::Plain)
    }

    /// Read-through batch read of hash-stored values; whole-hash when
    /// `hash_field` is `None`, single designated field otherwise.
    pub fn hash_batch_read<P: Clone, V>(
        &self,
        params: Vec<P>,
        loader: &dyn Loader<P, V>,
        codec: &dyn ValueCodec<V>,
        hash_field: Option<&str>,
        ttl_seconds: i64,
    ) -> Result<Vec<V>, CacheError> {
        Ok(self
            .hash_batch_read_pairs(params, loader, codec, hash_field, ttl_seconds)?
            .into_values())
    }

    /// Hash-stored read-through with full hit/miss detail.
    pub fn hash_batch_read_pairs<P: Clone, V>(
        &self,
        params: Vec<P>,
        loader: &dyn Loader<P, V>,
        codec: &dyn ValueCodec<V>,
        hash_field: Option<&str>,
        ttl_seconds: i64,
    ) -> Result<BatchResult<P, V>, CacheError> {
        self.read_pairs(params, loader, codec, ttl_seconds, hash_storage(hash_field))
    }

    /// Write `(param, value)` pairs as plain string values under a shared
    /// TTL. A no-op when `ttl_seconds <= 0`.
    pub fn batch_write<P, V>(
        &self,
        pairs: &[(P, V)],
        keys: &dyn WriteKey<P, V>,
        codec: &dyn ValueCodec<V>,
        ttl_seconds: i64,
    ) -> Result<(), CacheError> {
        self.write_pairs(pairs, keys, codec, ttl_seconds, Storage::Plain)
    }

    /// Write values that key themselves (each value is its own write-key
    /// parameter) as plain string values.
    pub fn batch_write_values<V>(
        &self,
        values: &[V],
        keys: &dyn WriteKey<V, V>,
        codec: &dyn ValueCodec<V>,
        ttl_seconds: i64,
    ) -> Result<(), CacheError> {
        self.write_values(values, keys, codec, ttl_seconds, Storage::Plain)
    }

    /// Write `(param, value)` pairs into hash storage; whole-hash when
    /// `hash_field` is `None`, single designated field otherwise.
    pub fn hash_batch_write<P, V>(
        &self,
        pairs: &[(P, V)],
        keys: &dyn WriteKey<P, V>,
        codec: &dyn ValueCodec<V>,
        hash_field: Option<&str>,
        ttl_seconds: i64,
    ) -> Result<(), CacheError> {
        self.write_pairs(pairs, keys, codec, ttl_seconds, hash_storage(hash_field))
    }

    /// Write self-keying values into hash storage.
    pub fn hash_batch_write_values<V>(
        &self,
        values: &[V],
        keys: &dyn WriteKey<V, V>,
        codec: &dyn ValueCodec<V>,
        hash_field: Option<&str>,
        ttl_seconds: i64,
    ) -> Result<(), CacheError> {
        self.write_values(values, keys, codec, ttl_seconds, hash_storage(hash_field))
    }

    /// Delete the cache entries for `params`, one pipelined round trip per
    /// shard. Unconditional: there is no TTL gate on deletes.
    pub fn batch_delete<P>(
        &self,
        params: &[P],
        keys: &dyn WriteKey<P, P>,
    ) -> Result<(), CacheError> {
        let mut keyed = Vec::with_capacity(params.len());
        for param in params {
            keyed.push((keys.write_key(param, param)?, ()));
        }
        for group in group_by_shard(self.topology.as_ref(), keyed)? {
            let commands: Vec<Command> = group
                .entries
                .iter()
                .map(|(key, ())| Command::Del { key: key.clone() })
                .collect();
            let mut conn = group.pool.checkout()?;
            conn.pipeline(&commands)?;
        }
        Ok(())
    }

    fn read_pairs<P: Clone, V>(
        &self,
        params: Vec<P>,
        loader: &dyn Loader<P, V>,
        codec: &dyn ValueCodec<V>,
        ttl_seconds: i64,
        storage: Storage<'_>,
    ) -> Result<BatchResult<P, V>, CacheError> {
        let mut keyed = Vec::with_capacity(params.len());
        for param in params {
            keyed.push((loader.read_key(&param)?, param));
        }

        let mut result = BatchResult::with_capacity(keyed.len());
        for group in group_by_shard(self.topology.as_ref(), keyed)? {
            self.read_group(group, codec, storage, &mut result)?;
        }

        if result.miss_params.is_empty() {
            return Ok(result);
        }

        let loaded = loader.fetch(&result.miss_params)?;
        if loaded.is_empty() {
            return Ok(result);
        }
        debug!(
            misses = result.miss_params.len(),
            loaded = loaded.len(),
            "backing store supplied values for cache misses"
        );

        if ttl_seconds > 0 {
            self.write_keyed(
                derive_write_keys(&loaded, &LoaderKeys(loader))?,
                codec,
                ttl_seconds,
                storage,
            )?;
        }
        // Loaded pairs join the hit list; their params intentionally stay in
        // miss_params, which reports the original cache-miss set.
        result.hits.extend(loaded);
        Ok(result)
    }

    fn read_group<P: Clone, V>(
        &self,
        group: ShardGroup<P>,
        codec: &dyn ValueCodec<V>,
        storage: Storage<'_>,
        result: &mut BatchResult<P, V>,
    ) -> Result<(), CacheError> {
        let keys: Vec<String> = group.entries.iter().map(|(key, _)| key.clone()).collect();
        let replies = read_shard(group.pool.as_ref(), &keys, storage)?;
        for ((key, param), reply) in group.entries.into_iter().zip(replies) {
            match codec.decode(reply) {
                Ok(Some(value)) => {
                    result.hit_params.push(param.clone());
                    result.hits.push((param, value));
                }
                Ok(None) => result.miss_params.push(param),
                Err(err) => {
                    warn!(key = %key, error = %err, "stored value failed to decode, treating as miss");
                    result.miss_params.push(param);
                }
            }
        }
        Ok(())
    }

    fn write_pairs<P, V>(
        &self,
        pairs: &[(P, V)],
        keys: &dyn WriteKey<P, V>,
        codec: &dyn ValueCodec<V>,
        ttl_seconds: i64,
        storage: Storage<'_>,
    ) -> Result<(), CacheError> {
        if ttl_seconds <= 0 {
            return Ok(());
        }
        self.write_keyed(derive_write_keys(pairs, keys)?, codec, ttl_seconds, storage)
    }

    fn write_values<V>(
        &self,
        values: &[V],
        keys: &dyn WriteKey<V, V>,
        codec: &dyn ValueCodec<V>,
        ttl_seconds: i64,
        storage: Storage<'_>,
    ) -> Result<(), CacheError> {
        if ttl_seconds <= 0 {
            return Ok(());
        }
        let mut keyed = Vec::with_capacity(values.len());
        for value in values {
            keyed.push((keys.write_key(value, value)?, value));
        }
        self.write_keyed(keyed, codec, ttl_seconds, storage)
    }

    fn write_keyed<V>(
        &self,
        keyed: Vec<(String, &V)>,
        codec: &dyn ValueCodec<V>,
        ttl_seconds: i64,
        storage: Storage<'_>,
    ) -> Result<(), CacheError> {
        for group in group_by_shard(self.topology.as_ref(), keyed)? {
            let mut commands = Vec::with_capacity(group.entries.len());
            for (key, value) in &group.entries {
                let encoded = match codec.encode(value) {
                    Ok(encoded) => encoded,
                    Err(err) => {
                        warn!(key = %key, error = %err, "value failed to encode, skipping cache write");
                        continue;
                    }
                };
                if let Err(err) = push_write(&mut commands, key, encoded, storage, ttl_seconds) {
                    warn!(key = %key, error = %err, "encoding does not fit storage layout, skipping cache write");
                }
            }
            if commands.is_empty() {
                continue;
            }
            let mut conn = group.pool.checkout()?;
            conn.pipeline(&commands)?;
        }
        Ok(())
    }
}

fn hash_storage(hash_field: Option<&str>) -> Storage<'_> {
    match hash_field {
        Some(field) => Storage::HashField(field),
        None => Storage::Hash,
    }
}

fn derive_write_keys<'a, P, V>(
    pairs: &'a [(P, V)],
    keys: &dyn WriteKey<P, V>,
) -> Result<Vec<(String, &'a V)>, CacheError> {
    let mut keyed = Vec::with_capacity(pairs.len());
    for (param, value) in pairs {
        keyed.push((keys.write_key(param, value)?, value));
    }
    Ok(keyed)
}

/// Append the pipeline commands for one encoded value, or reject a layout
/// mismatch without touching the pipeline.
fn push_write(
    commands: &mut Vec<Command>,
    key: &str,
    encoded: Encoded,
    storage: Storage<'_>,
    ttl_seconds: i64,
) -> Result<(), CodecError> {
    match (storage, encoded) {
        (Storage::Plain, Encoded::Text(value)) => {
            commands.push(Command::SetWithTtl {
                key: key.to_string(),
                ttl_seconds,
                value,
            });
        }
        (Storage::HashField(field), Encoded::Text(value)) => {
            commands.push(Command::HashSet {
                key: key.to_string(),
                field: field.to_string(),
                value,
            });
            commands.push(Command::Expire {
                key: key.to_string(),
                ttl_seconds,
            });
        }
        (Storage::Hash, Encoded::Fields(fields)) => {
            commands.push(Command::HashSetAll {
                key: key.to_string(),
                fields,
            });
            commands.push(Command::Expire {
                key: key.to_string(),
                ttl_seconds,
            });
        }
        (storage, encoded) => {
            return Err(CodecError::ShapeMismatch {
                encoded: encoded.kind(),
                storage: storage.kind(),
            });
        }
    }
    Ok(())
}
