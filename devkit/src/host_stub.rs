/*!
Host distant simulé pour développer sans fédération

Démarre un petit serveur HTTP local qui répond sur `/api/users` comme le ferait
un serveur de la fédération. La réponse est configurable (statut, content-type,
corps, latence) et modifiable à chaud entre deux cycles de polling.
*/

use anyhow::Result;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::test_utils::serve;

/// Réponse renvoyée par le host simulé
#[derive(Debug, Clone)]
pub struct StubResponse {
    pub status: u16,
    pub content_type: String,
    pub body: String,
    pub delay: Option<Duration>,
}

impl StubResponse {
    /// Collection d'utilisateurs valide : `{"totalItems": count}`
    pub fn users(count: u64) -> Self {
        Self::raw(
            200,
            "application/json",
            &serde_json::json!({ "totalItems": count, "items": [] }).to_string(),
        )
    }

    /// Réponse vide avec un statut donné
    pub fn status(status: u16) -> Self {
        Self::raw(status, "text/plain", "")
    }

    pub fn raw(status: u16, content_type: &str, body: &str) -> Self {
        Self {
            status,
            content_type: content_type.to_string(),
            body: body.to_string(),
            delay: None,
        }
    }

    /// Ajoute une latence avant la réponse
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

struct StubState {
    response: Mutex<StubResponse>,
    hits: AtomicUsize,
    last_authorization: Mutex<Option<String>>,
}

pub struct StubHost {
    addr: SocketAddr,
    state: Arc<StubState>,
}

impl StubHost {
    /// Démarre le host simulé sur un port éphémère de 127.0.0.1
    pub async fn spawn(response: StubResponse) -> Result<Self> {
        let state = Arc::new(StubState {
            response: Mutex::new(response),
            hits: AtomicUsize::new(0),
            last_authorization: Mutex::new(None),
        });

        let app = Router::new()
            .route("/api/users", get(users))
            .with_state(state.clone());
        let addr = serve(app).await?;

        log::info!("🖥️ [STUB] host listening on {}", addr);
        Ok(Self { addr, state })
    }

    /// "hostname" au sens du kernel : `127.0.0.1:port`
    pub fn hostname(&self) -> String {
        self.addr.to_string()
    }

    /// Remplace la réponse pour les prochains appels
    pub fn set_response(&self, response: StubResponse) {
        *self.state.response.lock().unwrap() = response;
    }

    /// Nombre d'appels reçus
    pub fn hits(&self) -> usize {
        self.state.hits.load(Ordering::SeqCst)
    }

    /// Header Authorization du dernier appel
    pub fn last_authorization(&self) -> Option<String> {
        self.state.last_authorization.lock().unwrap().clone()
    }
}

async fn users(State(state): State<Arc<StubState>>, headers: HeaderMap) -> Response {
    state.hits.fetch_add(1, Ordering::SeqCst);
    *state.last_authorization.lock().unwrap() = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let response = state.response.lock().unwrap().clone();
    if let Some(delay) = response.delay {
        tokio::time::sleep(delay).await;
    }

    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        [(header::CONTENT_TYPE, response.content_type)],
        response.body,
    )
        .into_response()
}
