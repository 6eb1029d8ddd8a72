//! # Storage Module
//!
//! Durable key-value storage for the music queue and cached search results.
//!
//! The queue logic only depends on the [`KeyValueStore`] contract, a small
//! Redis-like surface (`RPUSH`, `LPOP`, `LLEN`, `LRANGE`, `GET`, `SET`):
//!
//! - [`MemoryStore`]: in-process store, used by tests and when no data
//!   directory is available
//! - [`JsonStore`]: JSON files on disk with a write-through cache, so the
//!   queue survives restarts
//!
//! [`MusicStore`] wraps any of them with the canonical key scheme
//! (`<namespace>.<guild>.music_queue`, `<namespace>.<guild>.<channel>.search`)
//! and is the single place where store errors become
//! [`MusicError::Persistence`].

pub mod json;
pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use std::{future::Future, sync::Arc, time::Duration};
use tracing::{debug, warn};

pub use json::JsonStore;
pub use memory::MemoryStore;

use crate::{audio::record::QueueRecord, error::MusicError, sources::SearchHit};

/// Contrato mínimo de almacén clave-valor con listas ordenadas
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Agrega al final de la lista y devuelve la nueva longitud
    async fn rpush(&self, key: &str, value: String) -> Result<usize>;

    /// Extrae el primer elemento de la lista
    async fn lpop(&self, key: &str) -> Result<Option<String>>;

    async fn llen(&self, key: &str) -> Result<usize>;

    /// Rango inclusivo con semántica de Redis (índices negativos desde el final)
    async fn lrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: String) -> Result<()>;
}

/// Convierte índices estilo `LRANGE` a un rango `[start, end)` sobre `len`.
pub(crate) fn lrange_bounds(len: usize, start: isize, stop: isize) -> Option<(usize, usize)> {
    let len = len as isize;
    let normalize = |i: isize| if i < 0 { len + i } else { i };

    let start = normalize(start).max(0);
    let stop = normalize(stop).min(len - 1);

    if len == 0 || start > stop {
        None
    } else {
        Some((start as usize, stop as usize + 1))
    }
}

const READ_RETRY_BACKOFF: Duration = Duration::from_millis(50);

/// Fachada de almacenamiento con el esquema de claves de la cola de música
#[derive(Clone)]
pub struct MusicStore {
    store: Arc<dyn KeyValueStore>,
    namespace: String,
}

impl MusicStore {
    pub fn new(store: Arc<dyn KeyValueStore>, namespace: impl Into<String>) -> Self {
        Self {
            store,
            namespace: namespace.into(),
        }
    }

    pub fn queue_key(&self, guild_id: GuildId) -> String {
        format!("{}.{}.music_queue", self.namespace, guild_id)
    }

    pub fn search_key(&self, guild_id: GuildId, channel_id: ChannelId) -> String {
        format!("{}.{}.{}.search", self.namespace, guild_id, channel_id)
    }

    /// Persiste un registro al final de la cola durable
    pub async fn push_record(&self, record: &QueueRecord) -> Result<usize, MusicError> {
        let key = self.queue_key(record.guild_id);
        let serialized = serde_json::to_string(record)?;

        let len = self
            .store
            .rpush(&key, serialized)
            .await
            .map_err(MusicError::persistence)?;

        debug!("💾 Guardado en {} (longitud {})", key, len);
        Ok(len)
    }

    /// Extrae el registro en la cabeza de la cola durable
    pub async fn pop_record(&self, guild_id: GuildId) -> Result<Option<QueueRecord>, MusicError> {
        let key = self.queue_key(guild_id);

        match self.store.lpop(&key).await.map_err(MusicError::persistence)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn queue_len(&self, guild_id: GuildId) -> Result<usize, MusicError> {
        let key = self.queue_key(guild_id);
        self.read_with_retry(|| self.store.llen(&key)).await
    }

    /// Devuelve hasta `count` registros desde la cabeza sin consumirlos.
    /// Las entradas corruptas se omiten; el drenado las descarta al extraerlas.
    pub async fn peek_records(
        &self,
        guild_id: GuildId,
        count: usize,
    ) -> Result<Vec<QueueRecord>, MusicError> {
        if count == 0 {
            return Ok(Vec::new());
        }

        let key = self.queue_key(guild_id);
        let stop = count as isize - 1;
        let raw = self
            .read_with_retry(|| self.store.lrange(&key, 0, stop))
            .await?;

        let records: Vec<QueueRecord> = raw
            .iter()
            .filter_map(|entry| match serde_json::from_str(entry) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!("⚠️ Registro corrupto omitido en {}: {}", key, e);
                    None
                }
            })
            .collect();
        Ok(records)
    }

    pub async fn save_search(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        hits: &[SearchHit],
    ) -> Result<(), MusicError> {
        let key = self.search_key(guild_id, channel_id);
        let serialized = serde_json::to_string(hits)?;

        self.store
            .set(&key, serialized)
            .await
            .map_err(MusicError::persistence)
    }

    pub async fn load_search(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Option<Vec<SearchHit>>, MusicError> {
        let key = self.search_key(guild_id, channel_id);

        match self.read_with_retry(|| self.store.get(&key)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Las lecturas se reintentan una vez; las escrituras nunca.
    async fn read_with_retry<T, F, Fut>(&self, op: F) -> Result<T, MusicError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match op().await {
            Ok(value) => Ok(value),
            Err(first) => {
                warn!("⚠️ Lectura fallida, reintentando: {:?}", first);
                tokio::time::sleep(READ_RETRY_BACKOFF).await;
                op().await.map_err(MusicError::persistence)
            }
        }
    }
}
