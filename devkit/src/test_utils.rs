/*!
Test Harness pour le kernel Pump Live

Facilite l'écriture de tests HTTP de bout en bout avec:
- Démarrage d'un Router axum sur un port éphémère
- Client HTTP préconfiguré vers ce serveur
- Attentes par polling pour les traitements en tâche de fond
*/

use anyhow::Result;
use axum::Router;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;

/// Sert `app` sur 127.0.0.1 (port éphémère) et retourne l'adresse liée
pub async fn serve(app: Router) -> Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            log::error!("❌ [HARNESS] server on {} stopped: {}", addr, e);
        }
    });

    Ok(addr)
}

/// Rappelle `check` toutes les 20ms jusqu'à `true` ou expiration du délai
pub async fn wait_until<F, Fut>(timeout_ms: u64, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = std::time::Instant::now();

    while start.elapsed() < Duration::from_millis(timeout_ms) {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    log::warn!("⏰ Timeout after {}ms waiting for condition", timeout_ms);
    false
}

/// Harness de test : serveur kernel démarré + client HTTP
pub struct TestHarness {
    pub addr: SocketAddr,
    pub client: reqwest::Client,
}

impl TestHarness {
    /// Démarre le router du kernel pour un test
    pub async fn start(app: Router) -> Result<Self> {
        env_logger::try_init().ok(); // Init logging pour tests

        let addr = serve(app).await?;
        log::info!("🧪 Test server listening on {}", addr);

        Ok(Self {
            addr,
            client: reqwest::Client::new(),
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// POST brut avec content-type et headers additionnels
    pub async fn post_raw(
        &self,
        path: &str,
        content_type: &str,
        headers: &[(&str, &str)],
        body: Vec<u8>,
    ) -> Result<(u16, String)> {
        let mut request = self
            .client
            .post(self.url(path))
            .header("content-type", content_type)
            .body(body);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = String::from_utf8_lossy(&response.bytes().await?).into_owned();
        Ok((status, body))
    }

    /// GET et décodage JSON de la réponse
    pub async fn get_json(&self, path: &str) -> Result<(u16, serde_json::Value)> {
        let response = self.client.get(self.url(path)).send().await?;
        let status = response.status().as_u16();
        let bytes = response.bytes().await?;
        let value = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes)?
        };
        Ok((status, value))
    }
}
