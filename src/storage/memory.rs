use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

use super::{lrange_bounds, KeyValueStore};

/// Almacén en memoria; se pierde al reiniciar el proceso
#[derive(Debug, Default)]
pub struct MemoryStore {
    lists: Mutex<HashMap<String, VecDeque<String>>>,
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn rpush(&self, key: &str, value: String) -> Result<usize> {
        let mut lists = self.lists.lock();
        let list = lists.entry(key.to_string()).or_default();
        list.push_back(value);
        Ok(list.len())
    }

    async fn lpop(&self, key: &str) -> Result<Option<String>> {
        let mut lists = self.lists.lock();
        Ok(lists.get_mut(key).and_then(|list| list.pop_front()))
    }

    async fn llen(&self, key: &str) -> Result<usize> {
        Ok(self.lists.lock().get(key).map_or(0, |list| list.len()))
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>> {
        let lists = self.lists.lock();
        let Some(list) = lists.get(key) else {
            return Ok(Vec::new());
        };

        Ok(match lrange_bounds(list.len(), start, stop) {
            Some((from, to)) => list.range(from..to).cloned().collect(),
            None => Vec::new(),
        })
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        self.values.lock().insert(key.to_string(), value);
        Ok(())
    }
}
