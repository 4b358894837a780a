/**
 * COUNTER STORE - Interface de persistence clé/valeur du kernel Pump Live
 *
 * RÔLE :
 * Ce module définit le contrat de stockage partagé par le chemin "pull" (updater)
 * et le chemin "push" (callback PuSH). Toutes les statistiques passent par ici.
 *
 * FONCTIONNEMENT :
 * - CounterStore trait = interface commune (read/read_all/create/incr/scan)
 * - Les enregistrements sont rangés par type (namespace) puis par clé
 * - `incr` est atomique par clé : aucun incrément perdu sous concurrence
 * - `read_all` tolère les clés absentes individuellement (None), jamais en bloc
 *
 * LECTURES "SOUPLES" :
 * Les chemins de reporting lisent avec `soft_read` : NotFound → valeur par défaut.
 * Le chemin de vérification, lui, traite NotFound comme un rejet.
 */

pub mod file;

pub use file::FileStore;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Namespaces utilisés par le kernel
pub mod kinds {
    pub const HOST: &str = "host";
    pub const HOST_TOTAL: &str = "hosttotal";
    pub const HOST_COUNT: &str = "hostcount";
    pub const TOTAL_COUNT: &str = "totalcount";
    pub const LAST_TOTAL_COUNT: &str = "lasttotalcount";
    pub const HOURLY_ACTIVITY_COUNT: &str = "hourlyactivitycount";
    pub const ACTIVITY_RATE: &str = "activityrate";
    pub const SUBSCRIPTION: &str = "subscription";
    pub const PUSH_REQUEST: &str = "pushrequest";
}

/// Clé des enregistrements singletons (hosttotal, lasttotalcount)
pub const SINGLETON_KEY: &str = "0";

/// Erreurs possibles lors des opérations sur le store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("No such {kind}: {key}")]
    NotFound { kind: String, key: String },
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Value at {kind}/{key} is not a counter")]
    NotACounter { kind: String, key: String },
}

impl StoreError {
    pub fn not_found(kind: &str, key: &str) -> Self {
        StoreError::NotFound {
            kind: kind.to_string(),
            key: key.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Lecture ponctuelle ; NotFound si la clé n'existe pas
    async fn read(&self, kind: &str, key: &str) -> Result<Value, StoreError>;

    /// Lecture groupée, un slot par clé demandée (None = absent)
    async fn read_all(&self, kind: &str, keys: &[String]) -> Result<Vec<Option<Value>>, StoreError>;

    /// Création avec sémantique d'écrasement
    async fn create(&self, kind: &str, key: &str, value: Value) -> Result<(), StoreError>;

    /// Incrément atomique ; crée la clé à 1 si absente
    async fn incr(&self, kind: &str, key: &str) -> Result<i64, StoreError>;

    /// Toutes les valeurs d'un namespace (ordre non garanti)
    async fn scan(&self, kind: &str) -> Result<Vec<Value>, StoreError>;
}

/// Lecture typée d'un enregistrement
pub async fn read_as<T: DeserializeOwned>(
    store: &dyn CounterStore,
    kind: &str,
    key: &str,
) -> Result<T, StoreError> {
    let value = store.read(kind, key).await?;
    Ok(serde_json::from_value(value)?)
}

/// Lecture souple : NotFound → `default`, toute autre erreur remonte
pub async fn soft_read<T: DeserializeOwned>(
    store: &dyn CounterStore,
    kind: &str,
    key: &str,
    default: T,
) -> Result<T, StoreError> {
    match read_as(store, kind, key).await {
        Ok(value) => Ok(value),
        Err(e) if e.is_not_found() => Ok(default),
        Err(e) => Err(e),
    }
}

/// Écriture typée (écrase l'existant)
pub async fn create_from<T: Serialize>(
    store: &dyn CounterStore,
    kind: &str,
    key: &str,
    value: &T,
) -> Result<(), StoreError> {
    store.create(kind, key, serde_json::to_value(value)?).await
}
