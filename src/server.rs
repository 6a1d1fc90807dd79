//! HTTP surface over the scan pipeline.

use crate::error::{ScanError, Stage};
use crate::pipeline::{QrReport, ScanEngine, ScanReport};
use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;

// Room for multipart framing on top of the file itself
const MULTIPART_OVERHEAD: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    engine: Arc<ScanEngine>,
}

#[derive(Debug, Deserialize)]
pub struct ScanRequest {
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    stage: Option<&'static str>,
    timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    troubleshooting: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

/// Error response with its HTTP status. Logged once when rendered.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    stage: Option<Stage>,
    url: Option<String>,
    troubleshooting: Option<serde_json::Value>,
    detail: Option<String>,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
            stage: Some(Stage::Received),
            url: None,
            troubleshooting: None,
            detail: None,
        }
    }

    fn from_scan(err: ScanError, url: Option<String>, engine: &ScanEngine) -> Self {
        let config = engine.config();
        let production = config.server.production;
        let status = StatusCode::from_u16(err.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let troubleshooting = matches!(err, ScanError::BothSourcesFailed(_)).then(|| {
            json!({
                "step1": "Verify internet connection",
                "step2": "Check VirusTotal API key",
                "step3": format!("Validate AI model server on {}", config.classifier.base_url),
            })
        });

        let message = if production && matches!(err, ScanError::Internal { .. }) {
            "An internal server error occurred. Please try again later.".to_string()
        } else {
            err.to_string()
        };

        Self {
            status,
            message,
            stage: Some(err.stage()),
            url,
            troubleshooting,
            detail: (!production).then(|| format!("{err:?}")),
        }
    }

    fn log_line(&self, timestamp: &str) -> String {
        format!(
            "[{timestamp}] ERROR {}: {} (stage: {}, url: {})",
            self.status.as_u16(),
            self.message,
            self.stage.map(|s| s.as_str()).unwrap_or("-"),
            self.url.as_deref().unwrap_or("-")
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let timestamp = chrono::Utc::now().to_rfc3339();
        log::error!("{}", self.log_line(&timestamp));

        let body = ErrorBody {
            error: self.message,
            stage: self.stage.map(|s| s.as_str()),
            timestamp,
            troubleshooting: self.troubleshooting,
            detail: self.detail,
        };
        (self.status, Json(body)).into_response()
    }
}

pub fn router(engine: Arc<ScanEngine>) -> Router {
    let body_limit = engine.config().upload.max_bytes + MULTIPART_OVERHEAD;
    let state = AppState { engine };

    Router::new()
        .route("/", get(root))
        .route("/scan", get(health).post(scan))
        .route("/check-qr", axum::routing::post(check_qr))
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

pub async fn serve(engine: Arc<ScanEngine>) -> anyhow::Result<()> {
    let listen = engine.config().server.listen.clone();
    let production = engine.config().server.production;
    let listener = TcpListener::bind(&listen).await?;

    log::info!("Server listening on {listen}");
    log::info!("Mode: {}", if production { "production" } else { "development" });
    log::info!(
        "Reputation credential: {}",
        if engine.config().has_reputation_credential() {
            "loaded"
        } else {
            "MISSING, every scan will fall back to the classifier"
        }
    );

    axum::serve(listener, router(engine))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    log::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::warn!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    log::info!("Received shutdown signal, draining connections...");
}

async fn root() -> &'static str {
    "API Server is running."
}

async fn not_found(method: Method, uri: Uri) -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": format!("Not Found: {method} {uri}") })),
    )
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let config = state.engine.config();
    let reputation = if config.has_reputation_credential() {
        "Integrated"
    } else {
        "Missing credential"
    };
    Json(json!({
        "status": "Operational",
        "components": {
            "reputation": reputation,
            "classifier": format!("Active ({})", config.classifier.base_url),
        }
    }))
}

async fn scan(
    State(state): State<AppState>,
    payload: Result<Json<ScanRequest>, JsonRejection>,
) -> Result<Json<ScanReport>, ApiError> {
    let Json(request) = payload.map_err(|e| {
        log::debug!("Rejected scan body: {e}");
        ApiError::bad_request("Invalid request body: expected JSON {\"url\": string}")
    })?;

    let url = request.url.unwrap_or_default();
    log::info!(
        "[Scan Initiated] {} - URL: {url}",
        chrono::Utc::now().to_rfc3339()
    );

    match state.engine.scan_url(&url).await {
        Ok(outcome) => Ok(Json(ScanReport::from(&outcome))),
        Err(e) => Err(ApiError::from_scan(e, Some(url), &state.engine)),
    }
}

struct Upload {
    bytes: Vec<u8>,
    content_type: String,
}

async fn read_upload(
    multipart: Result<Multipart, MultipartRejection>,
    field_name: &str,
    max_bytes: usize,
) -> Result<Upload, ApiError> {
    let missing = || {
        ApiError::bad_request(format!(
            "Please upload a valid image file (max {}MB) under field name \"{field_name}\".",
            max_bytes / (1024 * 1024)
        ))
    };
    let too_large = || {
        ApiError::bad_request(format!(
            "File too large. Maximum size allowed is {}MB.",
            max_bytes / (1024 * 1024)
        ))
    };

    let mut multipart = multipart.map_err(|_| missing())?;
    let mut upload: Option<Upload> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) if e.status() == StatusCode::PAYLOAD_TOO_LARGE => return Err(too_large()),
            Err(e) => {
                log::debug!("Multipart error: {e}");
                return Err(ApiError::bad_request("File upload error."));
            }
        };

        if field.file_name().is_none() {
            continue;
        }
        if field.name() != Some(field_name) {
            return Err(ApiError::bad_request("File upload error."));
        }
        if upload.is_some() {
            return Err(ApiError::bad_request(
                "Too many files uploaded. Only one file allowed.",
            ));
        }

        let content_type = field.content_type().unwrap_or_default().to_string();
        if !content_type.starts_with("image/") {
            return Err(ApiError::bad_request(
                "Invalid file type: Only image files (PNG, JPG, etc.) are allowed.",
            ));
        }

        let bytes = match field.bytes().await {
            Ok(bytes) => bytes,
            Err(e) if e.status() == StatusCode::PAYLOAD_TOO_LARGE => return Err(too_large()),
            Err(e) => {
                log::debug!("Multipart read error: {e}");
                return Err(ApiError::bad_request("File upload error."));
            }
        };
        if bytes.len() > max_bytes {
            return Err(too_large());
        }

        upload = Some(Upload {
            bytes: bytes.to_vec(),
            content_type,
        });
    }

    upload.ok_or_else(missing)
}

async fn check_qr(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<QrReport>, ApiError> {
    let upload_config = &state.engine.config().upload;
    let upload = read_upload(multipart, &upload_config.field_name, upload_config.max_bytes).await?;

    log::info!(
        "[QR Check] {} - {} bytes ({})",
        chrono::Utc::now().to_rfc3339(),
        upload.bytes.len(),
        upload.content_type
    );

    scan_upload(&state.engine, upload).await.map(Json)
}

/// Errors past decoding carry the decoded payload as the offending URL.
async fn scan_upload(engine: &ScanEngine, upload: Upload) -> Result<QrReport, ApiError> {
    let Upload {
        bytes,
        content_type,
    } = upload;

    let payload = engine
        .decode_payload(bytes, &content_type)
        .await
        .map_err(|e| ApiError::from_scan(e, None, engine))?;

    match engine.scan_url(&payload).await {
        Ok(outcome) => Ok(QrReport::from(&outcome)),
        Err(e) => Err(ApiError::from_scan(e, Some(payload), engine)),
    }
}
