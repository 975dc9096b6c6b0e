//! Bill Extractor - forwards invoice documents to an OCR model and reshapes
//! the reply into page-wise line items.

mod config;
mod error;
mod gemini;
mod input;
mod normalize;
mod schema;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, FromRequest, Multipart, Request, State},
    http::header::CONTENT_TYPE,
    response::Json,
    routing::{get, post},
    Router,
};
use config::Settings;
use error::ExtractError;
use gemini::GeminiClient;
use input::DocumentInput;
use schema::{ApiResponse, ExtractionResult, TokenUsage};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application state shared across handlers. Everything here is immutable
/// after startup; requests are naturally isolated.
#[derive(Clone)]
struct AppState {
    settings: Arc<Settings>,
    gemini: GeminiClient,
    http: reqwest::Client,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "bill_extractor=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Arc::new(Settings::from_env()?);
    info!("Settings loaded: model={}, port={}", settings.model, settings.port);

    // Shared client for both document fetches and model calls; redirects
    // follow the reqwest default.
    let http = reqwest::Client::builder()
        .timeout(settings.fetch_timeout)
        .build()?;

    let gemini = GeminiClient::new(http.clone(), &settings);
    info!("Gemini client initialized");

    let state = AppState {
        settings: settings.clone(),
        gemini,
        http,
    };

    // Build router. Base64 bodies inflate by 4/3, so the body limit is
    // looser than the document limit enforced downstream.
    let app = Router::new()
        .route("/health", get(health))
        .route("/extract-bill-data", post(extract_bill_data))
        .layer(DefaultBodyLimit::max(settings.max_document_bytes * 2))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", settings.port)).await?;
    info!("Server listening on http://0.0.0.0:{}", settings.port);
    axum::serve(listener, app).await?;

    Ok(())
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint.
async fn health() -> &'static str {
    "ok"
}

/// Extract page-wise bill line items from an uploaded document.
///
/// Always answers 200; failures are signaled in-body via `is_success`.
async fn extract_bill_data(State(state): State<AppState>, req: Request) -> Json<ApiResponse> {
    match run_pipeline(&state, req).await {
        Ok((token_usage, data)) => {
            info!(
                "Extraction complete: {} pages, {} items, {} tokens",
                data.pagewise_line_items.len(),
                data.total_item_count,
                token_usage.total_tokens
            );
            Json(ApiResponse::success(token_usage, data))
        }
        Err(err) => {
            error!("Extraction failed: {}", err);
            Json(ApiResponse::failure(err))
        }
    }
}

/// Single-pass pipeline: parse input -> resolve -> model call -> normalize.
/// The first failing stage short-circuits; nothing is retried.
async fn run_pipeline(
    state: &AppState,
    req: Request,
) -> Result<(TokenUsage, ExtractionResult), ExtractError> {
    let document_input = parse_document_input(req).await?;
    let doc = input::resolve(document_input, &state.http, &state.settings).await?;
    let reply = state.gemini.extract(&doc).await?;
    let data = normalize::normalize(&reply.text)?;
    Ok((reply.usage, data))
}

/// Determine which input variant the request carries: multipart field
/// `file`, or JSON field `document` holding a URL or base64 string.
async fn parse_document_input(req: Request) -> Result<DocumentInput, ExtractError> {
    let is_multipart = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.starts_with("multipart/form-data"))
        .unwrap_or(false);

    if is_multipart {
        let mut multipart = Multipart::from_request(req, &())
            .await
            .map_err(|e| ExtractError::BadRequest(format!("invalid multipart body: {}", e)))?;

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ExtractError::BadRequest(format!("multipart error: {}", e)))?
        {
            if field.name() == Some("file") {
                let declared_type = field.content_type().map(|s| s.to_string());
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ExtractError::BadRequest(format!("failed to read file: {}", e)))?
                    .to_vec();

                if bytes.is_empty() {
                    return Err(ExtractError::BadRequest("no file uploaded".to_string()));
                }

                info!("Received file upload: {} bytes", bytes.len());
                return Ok(DocumentInput::UploadedFile {
                    bytes,
                    declared_type,
                });
            }
        }

        Err(ExtractError::BadRequest("missing `file` field".to_string()))
    } else {
        let body = Bytes::from_request(req, &())
            .await
            .map_err(|e| ExtractError::BadRequest(format!("failed to read body: {}", e)))?;

        let body: serde_json::Value = serde_json::from_slice(&body)
            .map_err(|e| ExtractError::BadRequest(format!("invalid JSON body: {}", e)))?;

        let document = body
            .get("document")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ExtractError::BadRequest("Missing 'document'".to_string()))?;

        Ok(classify_document_string(document))
    }
}

/// Disambiguate the `document` string: a recognized URL scheme means a
/// remote fetch, anything else is treated as base64.
fn classify_document_string(document: &str) -> DocumentInput {
    if document.starts_with("http://") || document.starts_with("https://") {
        DocumentInput::RemoteUrl(document.to_string())
    } else {
        DocumentInput::Base64Payload(document.to_string())
    }
}
