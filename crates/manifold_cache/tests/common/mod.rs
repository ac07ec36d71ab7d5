//! Shared fixtures for integration tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use manifold_cache::memory::MemoryShard;
use manifold_cache::{
    field, CacheError, ClusterTopology, HashField, HashValue, Loader, ShardPool,
};

/// Composite value exercising scalar, nested-composite, and collection
/// fields.
#[derive(Debug, Default, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Profile {
    pub name: String,
    pub age: i32,
    pub tags: Vec<String>,
}

impl Profile {
    pub fn sample() -> Self {
        Self {
            name: "a".to_string(),
            age: 30,
            tags: vec!["x".to_string(), "y".to_string()],
        }
    }
}

impl HashValue for Profile {
    fn fields() -> &'static [HashField<Self>] {
        const FIELDS: &[HashField<Profile>] = &[
            HashField {
                name: "name",
                get: |v| field::text(&v.name),
                set: |v, raw| {
                    v.name = field::scalar(raw)?;
                    Ok(())
                },
            },
            HashField {
                name: "age",
                get: |v| field::text(&v.age),
                set: |v, raw| {
                    v.age = field::scalar(raw)?;
                    Ok(())
                },
            },
            HashField {
                name: "tags",
                get: |v| field::json_text(&v.tags),
                set: |v, raw| {
                    v.tags = field::json_vec(raw)?;
                    Ok(())
                },
            },
        ];
        FIELDS
    }
}

/// Loader over a fixed row table, recording every backing-store fetch.
pub struct TableLoader<V> {
    rows: HashMap<String, V>,
    fetches: Mutex<Vec<Vec<String>>>,
}

impl<V> TableLoader<V> {
    pub fn empty() -> Self {
        Self {
            rows: HashMap::new(),
            fetches: Mutex::new(Vec::new()),
        }
    }

    pub fn with_rows<K: Into<String>>(rows: impl IntoIterator<Item = (K, V)>) -> Self {
        Self {
            rows: rows.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            fetches: Mutex::new(Vec::new()),
        }
    }

    /// Every miss list handed to `fetch`, in call order.
    pub fn fetch_calls(&self) -> Vec<Vec<String>> {
        self.fetches.lock().unwrap().clone()
    }
}

impl<V: Clone> Loader<String, V> for TableLoader<V> {
    fn read_key(&self, param: &String) -> Result<String, CacheError> {
        Ok(param.clone())
    }

    fn fetch(&self, misses: &[String]) -> Result<Vec<(String, V)>, CacheError> {
        self.fetches.lock().unwrap().push(misses.to_vec());
        Ok(misses
            .iter()
            .filter_map(|key| self.rows.get(key).map(|v| (key.clone(), v.clone())))
            .collect())
    }
}

/// Two explicit shards with caller-controlled routing, for scenarios that
/// pin particular keys to particular shards.
pub struct TwoShards {
    pub a: Arc<MemoryShard>,
    pub b: Arc<MemoryShard>,
    route_b: fn(&str) -> bool,
}

impl TwoShards {
    pub fn routing_b(route_b: fn(&str) -> bool) -> Self {
        Self {
            a: Arc::new(MemoryShard::new()),
            b: Arc::new(MemoryShard::new()),
            route_b,
        }
    }

    pub fn pipelines(&self) -> (u64, u64) {
        (self.a.pipelines_executed(), self.b.pipelines_executed())
    }
}

impl ClusterTopology for TwoShards {
    fn pool_for_key(&self, key: &str) -> Result<Arc<dyn ShardPool>, CacheError> {
        if (self.route_b)(key) {
            Ok(self.b.clone())
        } else {
            Ok(self.a.clone())
        }
    }
}
