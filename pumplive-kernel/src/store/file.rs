/**
 * FILE STORE - Implémentation locale du CounterStore
 *
 * RÔLE :
 * Store clé/valeur en mémoire, rangé par namespace, avec snapshot JSON optionnel
 * sur disque. Suffisant pour un kernel mono-processus.
 *
 * FONCTIONNEMENT :
 * - Toutes les données vivent dans une map protégée par un mutex
 * - `incr` modifie la valeur sous le lock : l'incrément est linéarisable par clé
 * - Chaque mutation sérialise le snapshot sous le lock, puis l'écrit hors du lock
 *   dans un thread bloquant : fichier temporaire voisin puis `rename` atomique
 * - Chaque snapshot porte une génération ; un snapshot plus ancien que celui
 *   déjà écrit est abandonné
 * - Au démarrage, le snapshot existant est rechargé. S'il est illisible, il est
 *   mis de côté (`.corrupt`) et le store repart vide
 *
 * FORMAT DISQUE :
 * ```json
 * {
 *   "hourlyactivitycount": { "2013_3_5_7": 42 },
 *   "activityrate": { "2013_3_5_7": 0.0123 }
 * }
 * ```
 */

use super::{CounterStore, StoreError};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;

type Namespaces = HashMap<String, HashMap<String, Value>>;

/// Snapshot sérialisé en attente d'écriture
struct PendingSnapshot {
    generation: u64,
    json: String,
}

struct Inner {
    namespaces: Namespaces,
    generation: u64,
}

pub struct FileStore {
    /// Fichier de snapshot (None = purement en mémoire)
    storage_path: Option<PathBuf>,
    data: Mutex<Inner>,
    /// Dernière génération écrite sur disque ; sérialise les écritures
    written: tokio::sync::Mutex<u64>,
}

impl FileStore {
    fn with_path(storage_path: Option<PathBuf>) -> Self {
        Self {
            storage_path,
            data: Mutex::new(Inner {
                namespaces: HashMap::new(),
                generation: 0,
            }),
            written: tokio::sync::Mutex::new(0),
        }
    }

    /// Store volatile, utilisé pour les tests et quand aucun fichier n'est configuré
    pub fn in_memory() -> Self {
        Self::with_path(None)
    }

    /// Ouvre (ou crée) un store persistant au chemin donné
    pub fn open<P: Into<PathBuf>>(storage_path: P) -> Result<Self, StoreError> {
        let path = storage_path.into();
        let store = Self::with_path(Some(path.clone()));

        store.load_from_disk()?;
        tracing::info!(path = %path.display(), "file store initialized");
        Ok(store)
    }

    fn load_from_disk(&self) -> Result<(), StoreError> {
        let Some(path) = &self.storage_path else {
            return Ok(());
        };

        if !path.exists() {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            write_atomic(path, "{}")?;
        }

        let content = fs::read_to_string(path)?;
        let namespaces: Namespaces = if content.trim().is_empty() {
            HashMap::new()
        } else {
            match serde_json::from_str(&content) {
                Ok(namespaces) => namespaces,
                Err(e) => {
                    let aside = set_aside(path)?;
                    tracing::error!(
                        path = %path.display(),
                        moved_to = %aside.display(),
                        error = %e,
                        "unreadable snapshot set aside, starting with an empty store"
                    );
                    HashMap::new()
                }
            }
        };

        self.data.lock().namespaces = namespaces;
        Ok(())
    }

    /// Sérialise l'état courant ; appelé avec le lock tenu
    fn snapshot(&self, inner: &mut Inner) -> Result<Option<PendingSnapshot>, StoreError> {
        if self.storage_path.is_none() {
            return Ok(None);
        }
        inner.generation += 1;
        Ok(Some(PendingSnapshot {
            generation: inner.generation,
            json: serde_json::to_string(&inner.namespaces)?,
        }))
    }

    /// Écrit un snapshot hors du lock des données
    async fn persist(&self, pending: Option<PendingSnapshot>) -> Result<(), StoreError> {
        let (Some(path), Some(pending)) = (&self.storage_path, pending) else {
            return Ok(());
        };

        let mut written = self.written.lock().await;
        if *written >= pending.generation {
            return Ok(()); // un snapshot plus récent est déjà sur disque
        }

        let path = path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&path, &pending.json))
            .await
            .map_err(io::Error::other)??;

        *written = pending.generation;
        Ok(())
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    path.with_file_name(name)
}

/// Écriture dans un fichier temporaire voisin puis `rename` : le snapshot n'est jamais tronqué
fn write_atomic(path: &Path, contents: &str) -> io::Result<()> {
    let tmp = sibling(path, ".tmp");
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)
}

fn set_aside(path: &Path) -> io::Result<PathBuf> {
    let stamp = OffsetDateTime::now_utc().unix_timestamp();
    let aside = sibling(path, &format!(".corrupt-{stamp}"));
    fs::rename(path, &aside)?;
    Ok(aside)
}

#[async_trait]
impl CounterStore for FileStore {
    async fn read(&self, kind: &str, key: &str) -> Result<Value, StoreError> {
        self.data
            .lock()
            .namespaces
            .get(kind)
            .and_then(|records| records.get(key))
            .cloned()
            .ok_or_else(|| StoreError::not_found(kind, key))
    }

    async fn read_all(&self, kind: &str, keys: &[String]) -> Result<Vec<Option<Value>>, StoreError> {
        let data = self.data.lock();
        let records = data.namespaces.get(kind);
        Ok(keys
            .iter()
            .map(|key| records.and_then(|r| r.get(key)).cloned())
            .collect())
    }

    async fn create(&self, kind: &str, key: &str, value: Value) -> Result<(), StoreError> {
        let pending = {
            let mut data = self.data.lock();
            data.namespaces
                .entry(kind.to_string())
                .or_default()
                .insert(key.to_string(), value);
            self.snapshot(&mut data)?
        };
        self.persist(pending).await
    }

    async fn incr(&self, kind: &str, key: &str) -> Result<i64, StoreError> {
        let (next, pending) = {
            let mut data = self.data.lock();
            let slot = data
                .namespaces
                .entry(kind.to_string())
                .or_default()
                .entry(key.to_string())
                .or_insert(Value::from(0));

            let current = slot.as_i64().ok_or_else(|| StoreError::NotACounter {
                kind: kind.to_string(),
                key: key.to_string(),
            })?;
            let next = current + 1;
            *slot = Value::from(next);

            (next, self.snapshot(&mut data)?)
        };

        self.persist(pending).await?;
        Ok(next)
    }

    async fn scan(&self, kind: &str) -> Result<Vec<Value>, StoreError> {
        Ok(self
            .data
            .lock()
            .namespaces
            .get(kind)
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_read_missing_is_not_found() {
        let store = FileStore::in_memory();
        let err = store.read("hostcount", "example.com").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_read_all_tolerates_missing_keys() {
        let store = FileStore::in_memory();
        store.create("hourlyactivitycount", "2013_3_5_7", Value::from(4)).await.unwrap();

        let keys = vec!["2013_3_5_6".to_string(), "2013_3_5_7".to_string()];
        let values = store.read_all("hourlyactivitycount", &keys).await.unwrap();
        assert_eq!(values, vec![None, Some(Value::from(4))]);
    }

    #[tokio::test]
    async fn test_create_overwrites() {
        let store = FileStore::in_memory();
        store.create("activityrate", "k", Value::from(1.0)).await.unwrap();
        store.create("activityrate", "k", Value::from(2.5)).await.unwrap();
        assert_eq!(store.read("activityrate", "k").await.unwrap(), Value::from(2.5));
    }

    #[tokio::test]
    async fn test_concurrent_incr_loses_nothing() {
        let store = Arc::new(FileStore::in_memory());
        let mut handles = Vec::new();
        for _ in 0..200 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.incr("hourlyactivitycount", "2013_3_5_7").await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let value = store.read("hourlyactivitycount", "2013_3_5_7").await.unwrap();
        assert_eq!(value, Value::from(200));
    }

    #[tokio::test]
    async fn test_incr_on_non_counter_fails() {
        let store = FileStore::in_memory();
        store.create("hosttotal", "0", Value::from("many")).await.unwrap();
        let err = store.incr("hosttotal", "0").await.unwrap_err();
        assert!(matches!(err, StoreError::NotACounter { .. }));
    }

    #[tokio::test]
    async fn test_snapshot_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("store.json");

        {
            let store = FileStore::open(&path).unwrap();
            store.incr("hosttotal", "0").await.unwrap();
            store.incr("hosttotal", "0").await.unwrap();
            store
                .create("hostcount", "example.com", serde_json::json!({"count": 7}))
                .await
                .unwrap();
        }

        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(reopened.read("hosttotal", "0").await.unwrap(), Value::from(2));
        assert_eq!(reopened.scan("hostcount").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_torn_snapshot_is_set_aside_on_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        {
            let store = FileStore::open(&path).unwrap();
            for _ in 0..50 {
                store.incr("hourlyactivitycount", "2013_3_5_7").await.unwrap();
            }
        }

        // Écriture interrompue à mi-chemin
        let content = fs::read(&path).unwrap();
        fs::write(&path, &content[..content.len() / 2]).unwrap();

        let reopened = FileStore::open(&path).unwrap();
        assert!(reopened
            .read("hourlyactivitycount", "2013_3_5_7")
            .await
            .unwrap_err()
            .is_not_found());

        // Le store reste utilisable et le fichier illisible est conservé à côté
        assert_eq!(reopened.incr("hosttotal", "0").await.unwrap(), 1);
        let kept_aside = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .any(|entry| entry.file_name().to_string_lossy().starts_with("store.json.corrupt-"));
        assert!(kept_aside);
    }

    #[tokio::test]
    async fn test_leftover_temp_file_does_not_affect_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        {
            let store = FileStore::open(&path).unwrap();
            store.incr("hosttotal", "0").await.unwrap();
        }
        fs::write(dir.path().join("store.json.tmp"), "{\"hosttotal\": {\"0\": 9").unwrap();

        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(reopened.read("hosttotal", "0").await.unwrap(), Value::from(1));
    }

    #[tokio::test]
    async fn test_concurrent_persistent_incr_leaves_latest_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let store = Arc::new(FileStore::open(&path).unwrap());

        let mut handles = Vec::new();
        for _ in 0..40 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.incr("hourlyactivitycount", "2013_3_5_7").await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let on_disk: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk["hourlyactivitycount"]["2013_3_5_7"], 40);
    }
}
