//! HTTP and WebSocket surface.
//!
//! | route             | purpose                                        |
//! |-------------------|------------------------------------------------|
//! | `POST /detect`    | upload an image, forward to the detector       |
//! | `POST /detections`| push plate readings directly                   |
//! | `GET /ws`         | real-time verification stream                  |
//! | `GET /stats`      | cache and hub counters                         |

use crate::config::SessionConfig;
use crate::detector::{DetectorClient, DetectorResponse};
use crate::event::ServiceEventsSender;
use crate::hub::{HubStats, NotificationHub};
use crate::ingest::{Accepted, DetectionIngestor, Rejection};
use crate::registry::{CacheStats, RegistryVerifier};
use crate::session::ClientSession;
use crate::types::RawDetection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    /// Pipeline entry point.
    pub ingestor: Arc<DetectionIngestor>,
    /// Verifier, for cache statistics.
    pub verifier: Arc<RegistryVerifier>,
    /// Notification hub.
    pub hub: Arc<NotificationHub>,
    /// Detector collaborator, if configured.
    pub detector: Option<DetectorClient>,
    /// Settings for new sessions.
    pub session: SessionConfig,
    /// Flips to `true` on shutdown.
    pub shutdown: watch::Receiver<bool>,
    /// Service event channel.
    pub events: ServiceEventsSender,
}

/// Build the service router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/detect", post(detect_image))
        .route("/detections", post(submit_detections))
        .route("/ws", get(websocket_handler))
        .route("/stats", get(stats))
        .with_state(state)
}

/// One plate reading pushed by a detector.
#[derive(Debug, Clone, Deserialize)]
pub struct PlateReading {
    /// Plate text.
    pub plate: String,
    /// Detector confidence.
    pub confidence: f64,
}

/// Body of `POST /detections`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionsRequest {
    /// Detector request id; generated when absent.
    #[serde(default, alias = "request_id")]
    pub request_id: Option<String>,
    /// Readings from one detector request.
    pub detections: Vec<PlateReading>,
}

/// Ingestion outcome of one reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestOutcome {
    /// Position in the submitted list.
    pub index: usize,
    /// Whether the reading entered the pipeline.
    pub accepted: bool,
    /// Sequence number of an accepted reading.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
    /// Normalized plate of an accepted reading.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plate: Option<String>,
    /// Why a reading was rejected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl IngestOutcome {
    fn new(index: usize, outcome: Result<Accepted, Rejection>) -> Self {
        match outcome {
            Ok(accepted) => Self {
                index,
                accepted: true,
                sequence: Some(accepted.sequence),
                plate: Some(accepted.plate),
                reason: None,
            },
            Err(rejection) => Self {
                index,
                accepted: false,
                sequence: None,
                plate: None,
                reason: Some(rejection.to_string()),
            },
        }
    }
}

/// Reply of the ingestion endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReply {
    /// Request id the readings were ingested under.
    pub request_id: String,
    /// Per-reading outcome.
    pub outcomes: Vec<IngestOutcome>,
    /// Raw detector reply (`/detect` only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detector: Option<DetectorResponse>,
}

fn ingest_all<'a>(
    ingestor: &DetectionIngestor,
    request_id: &str,
    readings: impl Iterator<Item = (usize, &'a str, f64)>,
) -> Vec<IngestOutcome> {
    readings
        .map(|(index, plate, confidence)| {
            let raw = RawDetection::new(plate, confidence, format!("{request_id}#{index}"));
            IngestOutcome::new(index, ingestor.ingest(raw))
        })
        .collect()
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

async fn submit_detections(
    State(state): State<AppState>,
    Json(request): Json<DetectionsRequest>,
) -> Response {
    let request_id = request
        .request_id
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let outcomes = ingest_all(
        &state.ingestor,
        &request_id,
        request
            .detections
            .iter()
            .enumerate()
            .map(|(i, r)| (i, r.plate.as_str(), r.confidence)),
    );
    debug!(request_id = %request_id, readings = outcomes.len(), "Detections submitted");

    (
        StatusCode::ACCEPTED,
        Json(IngestReply {
            request_id,
            outcomes,
            detector: None,
        }),
    )
        .into_response()
}

async fn detect_image(State(state): State<AppState>, mut multipart: Multipart) -> Response {
    let Some(detector) = state.detector.clone() else {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "No detector configured");
    };

    let mut image = None;
    loop {
        match multipart.next_field().await {
            Ok(Some(field)) if field.name() == Some("image") => {
                let file_name = field.file_name().unwrap_or("image").to_string();
                let content_type = field.content_type().map(str::to_string);
                match field.bytes().await {
                    Ok(bytes) => image = Some((bytes, file_name, content_type)),
                    Err(e) => return error_response(StatusCode::BAD_REQUEST, e.body_text()),
                }
            }
            Ok(Some(_)) => {}
            Ok(None) => break,
            Err(e) => return error_response(StatusCode::BAD_REQUEST, e.body_text()),
        }
    }
    let Some((bytes, file_name, content_type)) = image else {
        return error_response(StatusCode::BAD_REQUEST, "No image uploaded");
    };

    let reply = match detector
        .detect(bytes, &file_name, content_type.as_deref())
        .await
    {
        Ok(reply) => reply,
        Err(e) => {
            warn!(error = %e, "Detector request failed");
            return error_response(StatusCode::BAD_GATEWAY, e.to_string());
        }
    };

    let request_id = uuid::Uuid::new_v4().to_string();
    let outcomes = ingest_all(
        &state.ingestor,
        &request_id,
        reply
            .detections
            .iter()
            .enumerate()
            .filter_map(|(i, d)| d.plate.as_deref().map(|plate| (i, plate, d.confidence))),
    );

    Json(IngestReply {
        request_id,
        outcomes,
        detector: Some(reply),
    })
    .into_response()
}

async fn websocket_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| async move {
        let (sink, stream) = socket.split();
        ClientSession::new(Arc::clone(&state.hub), state.session.clone())
            .with_events(state.events.clone())
            .run(sink, stream, state.shutdown.clone())
            .await;
    })
}

/// Body of `GET /stats`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsReply {
    /// Verification cache counters.
    pub cache: CacheStats,
    /// Fresh and stale hit rate, in percent.
    pub cache_hit_rate: f64,
    /// Cached records.
    pub cache_entries: usize,
    /// Hub counters.
    pub hub: HubStats,
    /// Detections accepted since start.
    pub accepted: u64,
}

async fn stats(State(state): State<AppState>) -> Json<StatsReply> {
    let cache = state.verifier.cache_stats();
    Json(StatsReply {
        cache_hit_rate: cache.hit_rate(),
        cache,
        cache_entries: state.verifier.cache_len(),
        hub: state.hub.stats(),
        accepted: state.ingestor.accepted_count(),
    })
}
