/**
 * PUSH SUBSCRIBER - Callback PubSubHubbub-JSON du kernel
 *
 * RÔLE :
 * Termine les appels du hub sur le callback : handshakes de vérification
 * d'abonnement et livraisons d'activités signées. Seules les livraisons
 * authentifiées touchent aux compteurs partagés.
 *
 * FONCTIONNEMENT :
 * - Aiguillage sur le media type du Content-Type :
 *   form urlencoded → handshake, JSON → livraison, autre → 400
 * - Handshake : PushRequest retrouvée par `hub.verify_token`, `hub.mode` et
 *   `hub.topic` doivent correspondre exactement → 200 + `hub.challenge`
 * - Livraison : `items` non vide, un seul topic, Subscription connue,
 *   `x-hub-signature` = sha1 HMAC des octets bruts → 204 puis traitement en tâche de fond
 * - Chaque item vérifié : host de l'acteur assuré + bucket horaire incrémenté,
 *   les deux étapes toujours tentées
 *
 * ERREURS :
 * Chaque cause de rejet a sa variante VerifyError (visible dans les logs),
 * mais toutes produisent la même réponse 404 opaque.
 */

use crate::activity::ActivityAggregator;
use crate::health::HealthTracker;
use crate::hosts::HostRegistry;
use crate::registry::{PushRequestRegistry, SubscriptionRegistry};
use crate::signature::{verify_signature, SignatureError};
use crate::store::StoreError;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::future::join_all;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use time::OffsetDateTime;

pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Corps fixe de toutes les réponses de rejet
pub const REJECTED_BODY: &str = "Not found";
pub const UNSUPPORTED_BODY: &str = "Unsupported content type";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackKind {
    Handshake,
    Delivery,
    Unsupported,
}

/// Classe un appel d'après le media type (paramètres comme `charset` ignorés)
pub fn classify(content_type: Option<&str>) -> CallbackKind {
    let essence = content_type
        .and_then(|ct| ct.split(';').next())
        .map(|ct| ct.trim().to_ascii_lowercase());

    match essence.as_deref() {
        Some(FORM_CONTENT_TYPE) => CallbackKind::Handshake,
        Some(JSON_CONTENT_TYPE) => CallbackKind::Delivery,
        _ => CallbackKind::Unsupported,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("Malformed handshake form: {0}")]
    Form(#[from] serde_urlencoded::de::Error),
    #[error("Handshake without hub.verify_token")]
    MissingToken,
    #[error("Unknown verify token")]
    UnknownToken,
    #[error("Mismatched PuSH request (mode {mode:?}, topic {topic:?})")]
    Mismatch {
        mode: Option<String>,
        topic: Option<String>,
    },
    #[error("Invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Payload has no items")]
    NoItems,
    #[error("Payload item has no topic")]
    MissingTopic,
    #[error("Payload mixes topics")]
    MixedTopics,
    #[error("No subscription for topic {0}")]
    UnknownTopic(String),
    #[error("Signature rejected: {0}")]
    Signature(#[from] SignatureError),
    #[error("Store error: {0}")]
    Store(StoreError),
}

impl IntoResponse for VerifyError {
    fn into_response(self) -> Response {
        (
            StatusCode::NOT_FOUND,
            [(header::CONTENT_TYPE, "text/plain")],
            REJECTED_BODY,
        )
            .into_response()
    }
}

#[derive(Debug, Deserialize)]
struct HandshakeForm {
    #[serde(rename = "hub.mode")]
    mode: Option<String>,
    #[serde(rename = "hub.topic")]
    topic: Option<String>,
    #[serde(rename = "hub.verify_token")]
    verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    challenge: Option<String>,
}

/// Livraison authentifiée, prête à être dispatchée
#[derive(Debug, Clone)]
pub struct Delivery {
    pub topic: String,
    pub items: Vec<Value>,
}

/// Bilan du traitement d'une livraison
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub recorded: usize,
    pub hosts_ensured: usize,
    pub failures: usize,
}

/// Hostname de l'acteur d'un item : `item.actor.url`, sinon `item.payload.actor.url`
pub fn actor_hostname(item: &Value) -> Option<String> {
    let actor_url = |holder: &Value| {
        holder
            .get("actor")
            .and_then(|actor| actor.get("url"))
            .and_then(Value::as_str)
            .map(str::to_string)
    };

    let raw = actor_url(item).or_else(|| item.get("payload").and_then(actor_url))?;
    let parsed = url::Url::parse(&raw).ok()?;
    parsed.host_str().map(str::to_lowercase)
}

#[derive(Clone)]
pub struct PushSubscriber {
    subscriptions: Arc<dyn SubscriptionRegistry>,
    push_requests: Arc<dyn PushRequestRegistry>,
    hosts: Arc<dyn HostRegistry>,
    activity: ActivityAggregator,
    health: HealthTracker,
}

impl PushSubscriber {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionRegistry>,
        push_requests: Arc<dyn PushRequestRegistry>,
        hosts: Arc<dyn HostRegistry>,
        activity: ActivityAggregator,
        health: HealthTracker,
    ) -> Self {
        Self {
            subscriptions,
            push_requests,
            hosts,
            activity,
            health,
        }
    }

    /// Vérifie un handshake et retourne le challenge à renvoyer
    pub async fn verify_handshake(&self, body: &[u8]) -> Result<String, VerifyError> {
        let form: HandshakeForm = serde_urlencoded::from_bytes(body)?;
        let token = form.verify_token.as_deref().ok_or(VerifyError::MissingToken)?;

        let request = self
            .push_requests
            .push_request(token)
            .await
            .map_err(|e| match e {
                e if e.is_not_found() => VerifyError::UnknownToken,
                e => VerifyError::Store(e),
            })?;

        if form.mode.as_deref() != Some(request.mode.as_str())
            || form.topic.as_deref() != Some(request.topic.as_str())
        {
            return Err(VerifyError::Mismatch {
                mode: form.mode,
                topic: form.topic,
            });
        }

        Ok(form.challenge.unwrap_or_default())
    }

    /// Vérifie une livraison ; la signature porte sur `raw_body` tel que reçu
    pub async fn verify_delivery(
        &self,
        signature: Option<&str>,
        raw_body: &[u8],
    ) -> Result<Delivery, VerifyError> {
        let payload: Value = serde_json::from_slice(raw_body)?;
        let items = match payload.get("items") {
            Some(Value::Array(items)) if !items.is_empty() => items.clone(),
            _ => return Err(VerifyError::NoItems),
        };

        let topic = items[0]
            .get("topic")
            .and_then(Value::as_str)
            .ok_or(VerifyError::MissingTopic)?
            .to_string();
        if items
            .iter()
            .any(|item| item.get("topic").and_then(Value::as_str) != Some(topic.as_str()))
        {
            return Err(VerifyError::MixedTopics);
        }

        let subscription = self
            .subscriptions
            .subscription(&topic)
            .await
            .map_err(|e| match e {
                e if e.is_not_found() => VerifyError::UnknownTopic(topic.clone()),
                e => VerifyError::Store(e),
            })?;

        verify_signature(signature, subscription.secret.as_bytes(), raw_body)?;

        Ok(Delivery { topic, items })
    }

    /// Handshake complet : vérification, logs et compteurs de santé
    pub async fn handle_handshake(&self, body: &[u8]) -> Result<String, VerifyError> {
        let result = self.verify_handshake(body).await;
        match &result {
            Ok(_) => tracing::info!("PuSH subscription verified"),
            Err(e) => tracing::warn!(reason = %e, "PuSH handshake rejected"),
        }
        self.health.record_handshake(result.is_ok());
        result
    }

    /// Livraison complète : vérification puis dispatch en tâche de fond
    pub async fn handle_delivery(
        &self,
        signature: Option<&str>,
        raw_body: &[u8],
    ) -> Result<usize, VerifyError> {
        let result = self.verify_delivery(signature, raw_body).await;
        self.health.record_delivery(result.is_ok());

        let delivery = result.map_err(|e| {
            tracing::warn!(reason = %e, "PuSH delivery rejected");
            e
        })?;

        let count = delivery.items.len();
        tracing::info!(topic = %delivery.topic, count, "PuSH delivery accepted");

        let subscriber = self.clone();
        tokio::spawn(async move {
            subscriber.dispatch(delivery).await;
        });

        Ok(count)
    }

    /// Traite chaque item indépendamment et en parallèle
    pub async fn dispatch(&self, delivery: Delivery) -> DispatchReport {
        let outcomes = join_all(delivery.items.iter().map(|item| self.deliver_item(item))).await;

        let report = outcomes
            .into_iter()
            .fold(DispatchReport::default(), |mut acc, (host_ok, recorded)| {
                acc.hosts_ensured += usize::from(host_ok == Some(true));
                acc.recorded += usize::from(recorded);
                acc.failures += usize::from(host_ok == Some(false)) + usize::from(!recorded);
                acc
            });

        if report.failures > 0 {
            tracing::error!(
                topic = %delivery.topic,
                failures = report.failures,
                "delivery handled with errors"
            );
        } else {
            tracing::info!(topic = %delivery.topic, count = report.recorded, "delivery handled");
        }
        report
    }

    /// (host assuré ? None si pas d'acteur, compteur incrémenté ?)
    async fn deliver_item(&self, item: &Value) -> (Option<bool>, bool) {
        let id = item
            .get("payload")
            .and_then(|p| p.get("id"))
            .and_then(Value::as_str)
            .unwrap_or("?");

        let ensure_host = async {
            let hostname = actor_hostname(item)?;
            match self.hosts.ensure_host(&hostname).await {
                Ok(_) => Some(true),
                Err(e) => {
                    tracing::error!(hostname = %hostname, error = %e, "could not ensure activity host");
                    Some(false)
                }
            }
        };

        let record = async {
            match self.activity.record_activity(OffsetDateTime::now_utc()).await {
                Ok(_) => true,
                Err(e) => {
                    tracing::error!(activity = %id, error = %e, "could not count activity");
                    false
                }
            }
        };

        tokio::join!(ensure_host, record)
    }
}
