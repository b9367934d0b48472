use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use folioscan_core::crm::salesforce::{ConnectionStatus, SalesforceClient};
use folioscan_core::domain::portfolio::{mock_analysis_result, ScanResponse};
use folioscan_core::vision::error::VisionDiagnosticsError;
use folioscan_core::vision::gemini::GeminiClient;
use folioscan_core::vision::{AnalyzeInput, VisionClient};

const SERVICE_NAME: &str = "portfolio-scan-api";
const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");
const SUPPORTED_IMAGE_FORMATS: [&str; 3] = ["image/jpeg", "image/jpg", "image/png"];
const FRONTEND_ORIGINS: [&str; 2] = ["http://localhost:3000", "http://localhost:3001"];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = folioscan_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let vision: Option<Arc<GeminiClient>> = match GeminiClient::from_settings(&settings) {
        Ok(client) => Some(Arc::new(client)),
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(error = %e, "vision client init failed; starting API without portfolio scanning");
            None
        }
    };

    let crm: Option<Arc<SalesforceClient>> = match SalesforceClient::connect(&settings).await {
        Ok(client) => Some(Arc::new(client)),
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            tracing::warn!(error = %e, "Salesforce connect failed; starting API without CRM status");
            None
        }
    };

    let state = AppState {
        vision,
        crm,
        google_api_configured: settings.google_api_key.is_some(),
        max_upload_mb: settings.max_upload_mb,
    };

    // Leave headroom above the upload cap so the size check in the handler
    // owns the 413, not the body-limit middleware.
    let body_limit = (state.max_upload_bytes() as usize) + 1024 * 1024;

    let app = Router::new()
        .route("/api/health", get(health))
        .route("/api/test-connection", get(test_connection))
        .route("/api/salesforce/status", get(salesforce_status))
        .route("/api/portfolio/vision-status", get(vision_status))
        .route("/api/portfolio/test-analysis", get(test_analysis))
        .route("/api/portfolio/analyze-image", post(analyze_image))
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http());

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8000);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

#[derive(Clone)]
struct AppState {
    vision: Option<Arc<GeminiClient>>,
    crm: Option<Arc<SalesforceClient>>,
    google_api_configured: bool,
    max_upload_mb: u64,
}

impl AppState {
    fn max_upload_bytes(&self) -> u64 {
        self.max_upload_mb * 1024 * 1024
    }
}

fn cors_layer() -> CorsLayer {
    let origins = FRONTEND_ORIGINS
        .iter()
        .map(|origin| HeaderValue::from_static(origin));

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
        .allow_credentials(true)
}

/// Error body shared by every failing endpoint.
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    timestamp: DateTime<Utc>,
    error_code: &'static str,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.message,
            timestamp: Utc::now(),
            error_code: self.code,
        };
        (self.status, Json(body)).into_response()
    }
}

#[derive(Debug, Serialize)]
struct HealthBody {
    status: &'static str,
    timestamp: DateTime<Utc>,
    service: &'static str,
    version: &'static str,
    portfolio_scanning_available: bool,
    salesforce_connected: bool,
}

async fn health(State(state): State<AppState>) -> Json<HealthBody> {
    Json(HealthBody {
        status: "healthy",
        timestamp: Utc::now(),
        service: SERVICE_NAME,
        version: SERVICE_VERSION,
        portfolio_scanning_available: state.vision.is_some(),
        salesforce_connected: state.crm.is_some(),
    })
}

#[derive(Debug, Serialize)]
struct TestConnectionBody {
    status: &'static str,
    message: &'static str,
    timestamp: DateTime<Utc>,
}

async fn test_connection() -> Json<TestConnectionBody> {
    Json(TestConnectionBody {
        status: "connected",
        message: "Frontend can reach backend successfully",
        timestamp: Utc::now(),
    })
}

async fn salesforce_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    let Some(crm) = &state.crm else {
        return Json(serde_json::json!(ConnectionStatus::disconnected(
            "Salesforce service not initialized"
        )));
    };

    let status = crm.test_connection().await;
    let mut body = serde_json::json!(status);
    body["message"] = serde_json::Value::from("Salesforce integration is configured and ready");
    body["note"] = serde_json::Value::from(
        "API access must be enabled in the Salesforce org for full functionality",
    );
    Json(body)
}

#[derive(Debug, Serialize)]
struct VisionStatusBody {
    status: &'static str,
    message: &'static str,
    vision_engine_available: bool,
    google_api_configured: bool,
    supported_formats: [&'static str; 3],
    max_file_size_mb: u64,
    timestamp: DateTime<Utc>,
}

async fn vision_status(State(state): State<AppState>) -> Json<VisionStatusBody> {
    let (status, message) = if state.vision.is_some() {
        ("ready", "Portfolio scanning is ready")
    } else if !state.google_api_configured {
        (
            "configuration_required",
            "Google API key required. Set GOOGLE_API_KEY environment variable.",
        )
    } else {
        ("error", "Vision engine initialization failed")
    };

    Json(VisionStatusBody {
        status,
        message,
        vision_engine_available: state.vision.is_some(),
        google_api_configured: state.google_api_configured,
        supported_formats: SUPPORTED_IMAGE_FORMATS,
        max_file_size_mb: state.max_upload_mb,
        timestamp: Utc::now(),
    })
}

async fn test_analysis() -> Result<Json<ScanResponse>, ApiError> {
    let result = mock_analysis_result().map_err(|e| {
        sentry_anyhow::capture_anyhow(&e);
        tracing::error!(error = %e, "mock analysis generation failed");
        ApiError::internal(format!("Mock analysis failed: {e:#}"))
    })?;

    Ok(Json(ScanResponse::ok(
        "Mock portfolio analysis generated successfully",
        result,
    )))
}

struct ImageUpload {
    filename: String,
    content_type: String,
    bytes: Vec<u8>,
}

async fn read_image_field(multipart: &mut Multipart) -> Result<ImageUpload, ApiError> {
    loop {
        let field = multipart.next_field().await.map_err(|e| {
            tracing::error!(error = %e, "failed to read multipart field");
            ApiError::new(
                StatusCode::BAD_REQUEST,
                "FILE_READ_ERROR",
                "Failed to read uploaded file. Please try again.",
            )
        })?;

        let Some(field) = field else {
            return Err(ApiError::new(
                StatusCode::BAD_REQUEST,
                "MISSING_FILE",
                "No file found in upload. Attach the image as the 'file' field.",
            ));
        };

        if field.name() != Some("file") {
            continue;
        }

        let filename = field.file_name().unwrap_or("upload").to_string();
        let content_type = field.content_type().unwrap_or_default().to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "failed to read uploaded file body");
                ApiError::new(
                    StatusCode::BAD_REQUEST,
                    "FILE_READ_ERROR",
                    "Failed to read uploaded file. Please try again.",
                )
            })?
            .to_vec();

        return Ok(ImageUpload {
            filename,
            content_type,
            bytes,
        });
    }
}

fn check_upload(upload: &ImageUpload, max_bytes: u64) -> Result<(), ApiError> {
    if !upload.content_type.starts_with("image/") {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "INVALID_FILE_FORMAT",
            format!(
                "Invalid file format: {}. Please upload PNG, JPG, or JPEG images.",
                upload.content_type
            ),
        ));
    }

    if !SUPPORTED_IMAGE_FORMATS.contains(&upload.content_type.as_str()) {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "UNSUPPORTED_FORMAT",
            format!(
                "Unsupported image format: {}. Supported formats: {}",
                upload.content_type,
                SUPPORTED_IMAGE_FORMATS.join(", ")
            ),
        ));
    }

    if upload.bytes.is_empty() {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "EMPTY_FILE",
            "Empty file uploaded. Please select a valid image.",
        ));
    }

    let size = upload.bytes.len() as u64;
    if size > max_bytes {
        return Err(ApiError::new(
            StatusCode::PAYLOAD_TOO_LARGE,
            "FILE_TOO_LARGE",
            format!(
                "File too large: {:.1}MB. Maximum size: {}MB",
                size as f64 / (1024.0 * 1024.0),
                max_bytes / (1024 * 1024)
            ),
        ));
    }

    Ok(())
}

fn map_vision_error(err: anyhow::Error) -> ApiError {
    if let Some(diag) = err.downcast_ref::<VisionDiagnosticsError>() {
        if matches!(diag.stage, "parse" | "empty_response") {
            tracing::error!(stage = diag.stage, error = %diag, "vision output unusable");
            return ApiError::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                "ANALYSIS_FAILED",
                "Unable to analyze the uploaded image. Please ensure it shows a clear portfolio view.",
            );
        }
    }

    sentry_anyhow::capture_anyhow(&err);
    tracing::error!(error = %err, "vision API call failed");
    ApiError::new(
        StatusCode::BAD_GATEWAY,
        "AI_SERVICE_ERROR",
        "AI analysis service temporarily unavailable. Please try again later.",
    )
}

async fn analyze_image(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<ScanResponse>, ApiError> {
    let started = Instant::now();
    let request_id = Uuid::new_v4();

    let Some(vision) = state.vision.clone() else {
        return Err(ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "VISION_SERVICE_UNAVAILABLE",
            "Portfolio scanning service unavailable. Please check Google API configuration.",
        ));
    };

    let upload = read_image_field(&mut multipart).await?;
    check_upload(&upload, state.max_upload_bytes())?;

    tracing::info!(
        %request_id,
        filename = %upload.filename,
        size_kb = upload.bytes.len() / 1024,
        "analyzing portfolio image"
    );

    let extraction = vision
        .analyze_portfolio_image(AnalyzeInput {
            mime_type: upload.content_type,
            image: upload.bytes,
        })
        .await
        .map_err(map_vision_error)?;

    let processing_time = started.elapsed().as_secs_f64();
    let result = extraction
        .validate_into_result(processing_time, Utc::now())
        .map_err(|e| {
            let cause = format!("{e:#}");
            tracing::error!(%request_id, error = %cause, "vision extraction failed validation");
            ApiError::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                "INVALID_AI_RESPONSE",
                "AI returned invalid analysis. Please try with a clearer portfolio image.",
            )
        })?;

    tracing::info!(
        %request_id,
        holdings = result.extracted_holdings.len(),
        elapsed_secs = processing_time,
        "portfolio analysis completed"
    );

    let message = format!(
        "Successfully analyzed portfolio with {} holdings",
        result.extracted_holdings.len()
    );
    Ok(Json(ScanResponse::ok(message, result)))
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn init_sentry(settings: &folioscan_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
