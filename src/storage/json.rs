use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use tokio::{fs, sync::Mutex};
use tracing::{debug, info, warn};

use super::{lrange_bounds, KeyValueStore};

#[derive(Debug, Default)]
struct Cache {
    lists: HashMap<String, VecDeque<String>>,
    values: HashMap<String, String>,
}

/// Almacén clave-valor basado en archivos JSON
///
/// Cada lista vive en `lists/<clave>.json` y cada valor en
/// `values/<clave>.json`. Todas las claves se cargan al iniciar y las
/// escrituras se hacen con el caché bloqueado, así que `LPOP` es atómico.
pub struct JsonStore {
    data_dir: PathBuf,
    cache: Mutex<Cache>,
}

impl JsonStore {
    pub async fn new(data_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(data_dir.join("lists")).await?;
        fs::create_dir_all(data_dir.join("values")).await?;

        info!("📁 Storage inicializado en: {}", data_dir.display());

        let mut cache = Cache::default();
        let lists = load_dir::<Vec<String>>(&data_dir.join("lists")).await?;
        let values = load_dir::<String>(&data_dir.join("values")).await?;

        if !lists.is_empty() || !values.is_empty() {
            info!("📂 Cargadas {} listas y {} valores", lists.len(), values.len());
        }

        cache.lists = lists
            .into_iter()
            .map(|(key, items)| (key, items.into()))
            .collect();
        cache.values = values;

        Ok(Self {
            data_dir,
            cache: Mutex::new(cache),
        })
    }

    fn list_path(&self, key: &str) -> Result<PathBuf> {
        Ok(self.data_dir.join("lists").join(file_name(key)?))
    }

    fn value_path(&self, key: &str) -> Result<PathBuf> {
        Ok(self.data_dir.join("values").join(file_name(key)?))
    }

    async fn write_list(&self, key: &str, list: &VecDeque<String>) -> Result<()> {
        let path = self.list_path(key)?;

        if list.is_empty() {
            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e).with_context(|| format!("No se pudo borrar {}", path.display())),
            }
            return Ok(());
        }

        let content = serde_json::to_string_pretty(list)?;
        write_atomic(&path, content).await
    }
}

#[async_trait]
impl KeyValueStore for JsonStore {
    async fn rpush(&self, key: &str, value: String) -> Result<usize> {
        let mut cache = self.cache.lock().await;
        let list = cache.lists.entry(key.to_string()).or_default();
        list.push_back(value);

        if let Err(e) = self.write_list(key, list).await {
            list.pop_back();
            return Err(e);
        }

        Ok(list.len())
    }

    async fn lpop(&self, key: &str) -> Result<Option<String>> {
        let mut cache = self.cache.lock().await;
        let Some(list) = cache.lists.get_mut(key) else {
            return Ok(None);
        };

        let Some(head) = list.pop_front() else {
            return Ok(None);
        };

        if let Err(e) = self.write_list(key, list).await {
            list.push_front(head);
            return Err(e);
        }

        Ok(Some(head))
    }

    async fn llen(&self, key: &str) -> Result<usize> {
        let cache = self.cache.lock().await;
        Ok(cache.lists.get(key).map_or(0, |list| list.len()))
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>> {
        let cache = self.cache.lock().await;
        let Some(list) = cache.lists.get(key) else {
            return Ok(Vec::new());
        };

        Ok(match lrange_bounds(list.len(), start, stop) {
            Some((from, to)) => list.range(from..to).cloned().collect(),
            None => Vec::new(),
        })
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let cache = self.cache.lock().await;
        Ok(cache.values.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        let mut cache = self.cache.lock().await;
        let path = self.value_path(key)?;

        write_atomic(&path, serde_json::to_string(&value)?).await?;
        cache.values.insert(key.to_string(), value);

        debug!("💾 Valor guardado: {}", key);
        Ok(())
    }
}

/// Las claves se usan tal cual como nombre de archivo
fn file_name(key: &str) -> Result<String> {
    let valid = !key.is_empty()
        && !key.starts_with('.')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | ':'));

    if !valid {
        anyhow::bail!("Clave inválida para JsonStore: {:?}", key);
    }

    Ok(format!("{}.json", key))
}

async fn write_atomic(path: &Path, content: String) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, content)
        .await
        .with_context(|| format!("No se pudo escribir {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .await
        .with_context(|| format!("No se pudo renombrar {}", tmp.display()))?;
    Ok(())
}

async fn load_dir<T: serde::de::DeserializeOwned>(dir: &Path) -> Result<HashMap<String, T>> {
    let mut loaded = HashMap::new();
    let mut files = fs::read_dir(dir).await?;

    while let Some(entry) = files.next_entry().await? {
        let path = entry.path();

        if path.extension().map_or(true, |ext| ext != "json") {
            continue;
        }

        let Some(key) = path.file_stem().and_then(|n| n.to_str()) else {
            continue;
        };

        let parsed = fs::read_to_string(&path)
            .await
            .map_err(anyhow::Error::from)
            .and_then(|content| serde_json::from_str::<T>(&content).map_err(anyhow::Error::from));

        match parsed {
            Ok(value) => {
                loaded.insert(key.to_string(), value);
            }
            Err(e) => {
                warn!("Error cargando {}: {}", path.display(), e);
            }
        }
    }

    Ok(loaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn queue_survives_a_restart() {
        let dir = tempfile::tempdir().unwrap();

        {
            let store = JsonStore::new(dir.path().to_path_buf()).await.unwrap();
            store.rpush("cardinal.1.music_queue", "a".into()).await.unwrap();
            store.rpush("cardinal.1.music_queue", "b".into()).await.unwrap();
            store.set("cardinal.1.2.search", "[]".into()).await.unwrap();
        }

        let store = JsonStore::new(dir.path().to_path_buf()).await.unwrap();
        assert_eq!(store.llen("cardinal.1.music_queue").await.unwrap(), 2);
        assert_eq!(
            store.lpop("cardinal.1.music_queue").await.unwrap().as_deref(),
            Some("a")
        );
        assert_eq!(
            store.get("cardinal.1.2.search").await.unwrap().as_deref(),
            Some("[]")
        );

        // el pop también se persistió
        let reopened = JsonStore::new(dir.path().to_path_buf()).await.unwrap();
        assert_eq!(
            reopened.lrange("cardinal.1.music_queue", 0, -1).await.unwrap(),
            vec!["b"]
        );
    }

    #[tokio::test]
    async fn draining_a_list_removes_its_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path().to_path_buf()).await.unwrap();

        store.rpush("q", "only".into()).await.unwrap();
        assert!(dir.path().join("lists").join("q.json").exists());

        store.lpop("q").await.unwrap();
        assert!(!dir.path().join("lists").join("q.json").exists());
    }

    #[tokio::test]
    async fn rejects_keys_that_escape_the_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path().to_path_buf()).await.unwrap();

        assert!(store.rpush("../etc/passwd", "x".into()).await.is_err());
        assert_eq!(store.llen("../etc/passwd").await.unwrap(), 0);
    }
}
