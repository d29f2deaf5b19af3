use crate::viewer::Viewer;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{Html, Json},
    routing::get,
    Router,
};
use plaque_proto::model::{TokenMeta, ViewerStateData};
use serde::Serialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info};

#[derive(Clone)]
struct HttpState {
    viewer: Arc<Viewer>,
}

#[derive(Serialize)]
struct ActiveToken {
    active_token_meta_id: Option<String>,
}

/// Kiosk page opened by [`crate::display::KioskDisplay`].
const PAGE: &str = include_str!("page.html");

/// The kiosk page at `/` and the local status API it reads.
pub fn router(viewer: Arc<Viewer>) -> Router {
    Router::new()
        .route("/", get(get_page))
        .route("/api/viewer-state", get(get_viewer_state))
        .route("/api/active-token", get(get_active_token))
        .route("/api/token-meta/:id", get(get_token_meta))
        .layer(CorsLayer::permissive())
        .with_state(HttpState { viewer })
}

pub fn start_server(bind_address: String, port: u16, viewer: Arc<Viewer>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app = router(viewer);

        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };

        info!("HTTP API server listening on http://{}", addr);

        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    })
}

async fn get_page() -> Html<&'static str> {
    Html(PAGE)
}

async fn get_viewer_state(State(state): State<HttpState>) -> Json<ViewerStateData> {
    Json(state.viewer.get_viewer_state().await)
}

async fn get_active_token(State(state): State<HttpState>) -> Json<ActiveToken> {
    let data = state.viewer.get_viewer_state().await;
    Json(ActiveToken {
        active_token_meta_id: data.active_token_meta.map(|m| m.document_id),
    })
}

async fn get_token_meta(
    State(state): State<HttpState>,
    Path(id): Path<String>,
) -> Result<Json<TokenMeta>, StatusCode> {
    match state.viewer.cache().read_token_meta(&id).await {
        Ok(meta) => Ok(Json(meta)),
        Err(e) if e.is_not_found() => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            debug!("HTTP API: token meta {}: {}", id, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
