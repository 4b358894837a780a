/**
 * HOST REGISTRY - Catalogue des hosts de la fédération
 *
 * RÔLE :
 * Résout un hostname en enregistrement Host (création au premier contact),
 * énumère tous les hosts connus et interroge leur nombre d'utilisateurs.
 *
 * FONCTIONNEMENT :
 * - HostRegistry trait = contrat consommé par l'updater et le callback PuSH
 * - `scan` est une énumération "push" : un ScanEvent::Host par host puis un
 *   ScanEvent::Done final portant le succès ou l'échec de l'énumération
 * - StoreHostRegistry = implémentation sur le CounterStore + client HTTP reqwest
 *
 * APPEL DISTANT :
 * GET http://{hostname}/api/users → 200, content-type application/json,
 * corps `{"totalItems": <entier>}`. Tout écart est une PollError.
 */

use crate::models::{now_rfc3339, Host};
use crate::store::{create_from, kinds, read_as, CounterStore, StoreError, SINGLETON_KEY};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Invalid hostname: {0:?}")]
    InvalidHostname(String),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Échecs d'un poll de host ; tous sont absorbés par l'updater
#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
    #[error("Bad response status: {0}")]
    Status(StatusCode),
    #[error("Bad response content type: {0:?}")]
    ContentType(Option<String>),
    #[error("Invalid JSON body: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Response has no integer totalItems")]
    MissingTotal,
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug)]
pub enum ScanEvent {
    Host(Host),
    Done(Result<(), RegistryError>),
}

#[async_trait]
pub trait HostRegistry: Send + Sync {
    /// Retourne le host, en le créant s'il est inconnu
    async fn ensure_host(&self, hostname: &str) -> Result<Host, RegistryError>;

    /// Énumération paresseuse ; le dernier événement est toujours `Done`
    fn scan(&self) -> mpsc::Receiver<ScanEvent>;

    /// Nombre d'utilisateurs annoncé par le host
    async fn user_count(&self, host: &Host) -> Result<u64, PollError>;
}

#[derive(Debug, Deserialize)]
struct UserCollection {
    #[serde(rename = "totalItems")]
    total_items: Option<serde_json::Value>,
}

/// Extrait `totalItems` d'un corps de réponse `/api/users`
pub fn parse_user_count(body: &[u8]) -> Result<u64, PollError> {
    let doc: UserCollection = serde_json::from_slice(body)?;
    doc.total_items
        .as_ref()
        .and_then(serde_json::Value::as_u64)
        .ok_or(PollError::MissingTotal)
}

pub fn user_count_url(hostname: &str) -> String {
    format!("http://{hostname}/api/users")
}

pub struct StoreHostRegistry {
    store: Arc<dyn CounterStore>,
    client: reqwest::Client,
    /// Sérialise les créations pour que hosttotal compte chaque hostname une fois
    creating: Mutex<()>,
}

impl StoreHostRegistry {
    pub fn new(store: Arc<dyn CounterStore>, request_timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .user_agent(concat!("pumplive/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            store,
            client,
            creating: Mutex::new(()),
        })
    }

    async fn lookup(&self, hostname: &str) -> Result<Option<Host>, StoreError> {
        match read_as::<Host>(self.store.as_ref(), kinds::HOST, hostname).await {
            Ok(host) => Ok(Some(host)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl HostRegistry for StoreHostRegistry {
    async fn ensure_host(&self, hostname: &str) -> Result<Host, RegistryError> {
        let hostname = hostname.trim().to_lowercase();
        if hostname.is_empty() || hostname.contains('/') {
            return Err(RegistryError::InvalidHostname(hostname));
        }

        if let Some(host) = self.lookup(&hostname).await? {
            return Ok(host);
        }

        let _guard = self.creating.lock().await;
        // Un autre appel a pu créer le host pendant l'attente du lock
        if let Some(host) = self.lookup(&hostname).await? {
            return Ok(host);
        }

        let host = Host {
            hostname: hostname.clone(),
            credentials: None,
            created: now_rfc3339(),
        };
        create_from(self.store.as_ref(), kinds::HOST, &hostname, &host).await?;
        // Le host existe désormais : un échec ici laisse hosttotal en retard d'une unité
        if let Err(e) = self.store.incr(kinds::HOST_TOTAL, SINGLETON_KEY).await {
            tracing::error!(hostname = %hostname, error = %e, "host created but not counted in hosttotal");
        }

        tracing::info!(hostname = %hostname, "new host registered");
        Ok(host)
    }

    fn scan(&self) -> mpsc::Receiver<ScanEvent> {
        let (tx, rx) = mpsc::channel(64);
        let store = self.store.clone();

        tokio::spawn(async move {
            let outcome = match store.scan(kinds::HOST).await {
                Ok(values) => {
                    for value in values {
                        match serde_json::from_value::<Host>(value) {
                            Ok(host) => {
                                if tx.send(ScanEvent::Host(host)).await.is_err() {
                                    return; // consommateur parti
                                }
                            }
                            Err(e) => tracing::warn!(error = %e, "skipping unreadable host record"),
                        }
                    }
                    Ok(())
                }
                Err(e) => Err(RegistryError::Store(e)),
            };
            let _ = tx.send(ScanEvent::Done(outcome)).await;
        });

        rx
    }

    async fn user_count(&self, host: &Host) -> Result<u64, PollError> {
        let mut request = self.client.get(user_count_url(&host.hostname));
        if let Some(creds) = &host.credentials {
            request = request.basic_auth(&creds.client_id, Some(&creds.client_secret));
        }

        let response = request.send().await?;
        if response.status() != StatusCode::OK {
            return Err(PollError::Status(response.status()));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        if !content_type
            .as_deref()
            .is_some_and(|ct| ct.starts_with("application/json"))
        {
            return Err(PollError::ContentType(content_type));
        }

        let body = response.bytes().await?;
        parse_user_count(&body)
    }
}
