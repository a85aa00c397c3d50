use crate::{
    config::ServerConfig,
    decode::decode_rgb_image,
    engine::CaptionEngine,
    error::CaptionError,
    messages::{CaptionResponse, HealthResponse},
};
use axum::{
    Json, Router,
    body::Bytes,
    extract::{
        DefaultBodyLimit, Multipart, State,
        multipart::MultipartRejection,
    },
    http::{Method, StatusCode},
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

/// Name of the multipart field carrying the image.
pub const IMAGE_FIELD: &str = "image";

/// Builds the service router around an already running engine.
///
/// Cross-origin requests are allowed from any origin so browser clients
/// hosted elsewhere can call the endpoint directly.
pub fn router(engine: Arc<CaptionEngine>, config: &ServerConfig) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/", get(|| async { "Welcome to kornia-caption!" }))
        .route("/health", get(get_health))
        .route("/caption", post(post_caption))
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(cors)
        .with_state(engine)
}

/// Binds the listener and serves until Ctrl+C.
pub async fn serve(config: ServerConfig, engine: CaptionEngine) -> std::io::Result<()> {
    let addr = config.addr();
    let app = router(Arc::new(engine), &config);

    let listener = tokio::net::TcpListener::bind(&addr).await?;

    log::info!("🚀 Starting the server");
    log::info!("🔥 Listening on: {}", addr);
    log::info!("🔧 Press Ctrl+C to stop the server");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    log::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        log::error!("Failed to install Ctrl+C handler: {err}");
        std::future::pending::<()>().await;
    }
    log::info!("Shutdown signal received, draining requests");
}

async fn post_caption(
    State(engine): State<Arc<CaptionEngine>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<CaptionResponse>, CaptionError> {
    let multipart = multipart.map_err(|rejection| {
        log::debug!("Request is not a multipart upload: {rejection}");
        CaptionError::MissingImage
    })?;

    let bytes = read_image_field(multipart)
        .await?
        .ok_or(CaptionError::MissingImage)?;
    log::debug!("Received {} bytes in field `{IMAGE_FIELD}`", bytes.len());

    // decoding is CPU bound, keep it off the async workers
    let image = tokio::task::spawn_blocking(move || decode_rgb_image(&bytes))
        .await
        .map_err(|err| CaptionError::Internal(err.to_string()))??;

    let response = engine.caption(image).await?;

    log::info!(
        "Captioned request {} ({}x{}) in {:?}",
        response.id,
        response.image_size.0,
        response.image_size.1,
        response.duration
    );

    Ok(Json(CaptionResponse {
        caption: response.caption,
    }))
}

/// Returns the bytes of the first `image` field, skipping any other fields.
async fn read_image_field(mut multipart: Multipart) -> Result<Option<Bytes>, CaptionError> {
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => return Ok(None),
            // an oversized body is reported as such, any other malformed
            // stream simply has no readable image in it
            Err(err) if err.status() == StatusCode::PAYLOAD_TOO_LARGE => return Err(err.into()),
            Err(err) => {
                log::debug!("Stopped reading multipart body: {err}");
                return Ok(None);
            }
        };

        if field.name() == Some(IMAGE_FIELD) {
            return Ok(Some(field.bytes().await?));
        }
    }
}

async fn get_health(State(engine): State<Arc<CaptionEngine>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        model: engine.model_id().to_string(),
        engine: engine.state().as_str().to_string(),
        queued: engine.queued(),
        completed: engine.completed(),
    })
}
