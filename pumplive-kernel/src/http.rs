/**
 * API HTTP PUMP LIVE - Serveur HTTP du kernel
 *
 * RÔLE :
 * Expose le callback PuSH appelé par le hub et la surface de lecture des
 * statistiques agrégées.
 *
 * FONCTIONNEMENT :
 * - Serveur Axum, état unique AppState
 * - POST /pubsubhubbub/callback : corps lu en octets bruts (la signature porte
 *   sur ces octets), aiguillage par Content-Type
 * - Lectures : /stats, /hosts/{hostname}, /health, /system/health
 * - Les rejets de vérification ont tous la même réponse 404 text/plain
 */

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use time::OffsetDateTime;

use crate::health::KernelHealth;
use crate::models::HostCount;
use crate::signature::SIGNATURE_HEADER;
use crate::state::AppState;
use crate::stats::{get_stats, Stats};
use crate::store::{kinds, read_as};
use crate::subscriber::{classify, CallbackKind, UNSUPPORTED_BODY};

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(get_system_health))
        .route("/stats", get(stats))
        .route("/hosts/{hostname}", get(get_host_count))
        .route("/pubsubhubbub/callback", post(push_callback))
        .with_state(app_state)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

// POST /pubsubhubbub/callback (handshake ou livraison)
async fn push_callback(State(app): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let content_type = header_str(&headers, header::CONTENT_TYPE.as_str());
    tracing::debug!(content_type = ?content_type, "PuSH callback called");

    match classify(content_type) {
        CallbackKind::Handshake => match app.subscriber.handle_handshake(&body).await {
            Ok(challenge) => (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "text/plain")],
                challenge,
            )
                .into_response(),
            Err(e) => e.into_response(),
        },
        CallbackKind::Delivery => {
            let signature = header_str(&headers, SIGNATURE_HEADER);
            match app.subscriber.handle_delivery(signature, &body).await {
                Ok(_) => StatusCode::NO_CONTENT.into_response(),
                Err(e) => e.into_response(),
            }
        }
        CallbackKind::Unsupported => (
            StatusCode::BAD_REQUEST,
            [(header::CONTENT_TYPE, "text/plain")],
            UNSUPPORTED_BODY,
        )
            .into_response(),
    }
}

// GET /stats
async fn stats(State(app): State<AppState>) -> Result<Json<Stats>, StatusCode> {
    get_stats(app.store.as_ref(), &app.activity, OffsetDateTime::now_utc())
        .await
        .map(Json)
        .map_err(|e| {
            tracing::error!(error = %e, "stats read failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })
}

// GET /hosts/{hostname} (dernier comptage)
async fn get_host_count(
    State(app): State<AppState>,
    Path(hostname): Path<String>,
) -> Result<Json<HostCount>, StatusCode> {
    let hostname = hostname.to_lowercase();
    match read_as::<HostCount>(app.store.as_ref(), kinds::HOST_COUNT, &hostname).await {
        Ok(count) => Ok(Json(count)),
        Err(e) if e.is_not_found() => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!(hostname = %hostname, error = %e, "host count read failed");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

// GET /system/health
async fn get_system_health(State(app): State<AppState>) -> Json<KernelHealth> {
    Json(app.health_tracker.get_health())
}
