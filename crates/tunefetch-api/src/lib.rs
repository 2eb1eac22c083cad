// SPDX-License-Identifier: GPL-3.0-or-later
pub mod handlers;

use axum::{
    http::{header::CONTENT_TYPE, Method},
    routing::{get, post},
    Json, Router,
};
use handlers::downloads::{
    direct_download, download_file, download_status, search_and_download, DirectDownloadRequest,
    DownloadStartedResponse, DownloadStatusResponse, ErrorResponse, SearchAndDownloadRequest,
    __path_direct_download, __path_download_file, __path_download_status,
    __path_search_and_download,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tunefetch_application::AppState;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(Serialize, utoipa::ToSchema)]
struct HealthResponse {
    status: &'static str,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    ),
    tag = "system"
)]
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health,
        search_and_download,
        direct_download,
        download_status,
        download_file,
    ),
    components(
        schemas(
            HealthResponse,
            SearchAndDownloadRequest,
            DirectDownloadRequest,
            DownloadStartedResponse,
            DownloadStatusResponse,
            ErrorResponse,
        )
    ),
    tags(
        (name = "system", description = "System health and status endpoints"),
        (name = "downloads", description = "Song search, resolution and download jobs")
    ),
    info(
        title = "Tunefetch API",
        version = "0.1.0",
        description = "Finds songs on music sites and resolves their audio streams",
    )
)]
struct ApiDoc;

pub fn router(state: AppState) -> Router {
    info!(target: "api", "building router");

    let api = Router::new()
        .route("/search-and-download", post(search_and_download))
        .route("/direct-download", post(direct_download))
        .route("/download-status/:id", get(download_status))
        .route("/download-file/:id", get(download_file));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health))
        .nest("/api", api)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(cors)
        .with_state(state)
}
