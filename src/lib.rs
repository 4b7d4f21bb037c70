pub mod api;
pub mod config;
pub mod infrastructure;
pub mod services;
pub mod utils;

use crate::api::middleware::request_id::{X_REQUEST_ID, request_id_middleware};
use crate::config::StoreConfig;
use crate::services::slot_store::SlotStore;
use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method, header},
    middleware::from_fn,
    routing::{get, post},
};
use std::sync::Arc;
use tower::Layer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Allowance for multipart framing on top of the file itself.
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::images::get_image,
        api::handlers::images::upload_image,
        api::handlers::health::health_check,
    ),
    components(
        schemas(
            api::handlers::images::ImageResponse,
            api::handlers::images::UploadResponse,
            api::handlers::images::ErrorResponse,
            api::handlers::health::HealthResponse,
        )
    ),
    tags(
        (name = "images", description = "Named image slots"),
        (name = "system", description = "Service status")
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<SlotStore>,
    pub config: StoreConfig,
}

pub fn create_app(state: AppState) -> Router {
    // Committed assets at /<slot>.jpg; clients must revalidate after a replace.
    let assets = SetResponseHeaderLayer::overriding(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache"),
    )
    .layer(ServeDir::new(state.store.public_dir()).append_index_html_on_directories(false));

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &axum::http::Request<_>| {
            let request_id = request
                .headers()
                .get(&X_REQUEST_ID)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("unknown");
            tracing::info_span!(
                "http_request",
                method = %request.method(),
                uri = %request.uri(),
                request_id = %request_id,
            )
        })
        .on_request(|request: &axum::http::Request<_>, _span: &tracing::Span| {
            info!("📥 {} {}", request.method(), request.uri());
        })
        .on_response(
            |response: &axum::http::Response<_>,
             latency: std::time::Duration,
             _span: &tracing::Span| {
                info!(
                    "📤 Finished in {:?} with status {}",
                    latency,
                    response.status()
                );
            },
        );

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(api::handlers::health::health_check))
        .route("/api/getImage", get(api::handlers::images::get_image))
        .route(
            "/api/upload",
            post(api::handlers::images::upload_image).layer(DefaultBodyLimit::max(
                state.config.max_file_size + MULTIPART_OVERHEAD,
            )),
        )
        .fallback_service(assets)
        .layer(cors_layer(&state.config.allowed_origins))
        .layer(trace_layer)
        .layer(from_fn(request_id_middleware))
        .with_state(state)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins = if allowed_origins.iter().any(|o| o == "*") {
        AllowOrigin::from(Any)
    } else {
        AllowOrigin::list(
            allowed_origins
                .iter()
                .filter_map(|o| match HeaderValue::from_str(o) {
                    Ok(v) => Some(v),
                    Err(_) => {
                        tracing::warn!("Ignoring invalid CORS origin: {}", o);
                        None
                    }
                }),
        )
    };

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
        .expose_headers([X_REQUEST_ID.clone()])
}
