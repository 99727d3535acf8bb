use axum::{
    extract::{State, WebSocketUpgrade},
    http::Method,
    response::{Html, IntoResponse},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing_subscriber::EnvFilter;

mod game;
mod lobby;
mod protocol;
mod shared;
mod transport;

use lobby::Lobby;
use transport::ws_session::handle_socket;

#[derive(Clone)]
struct AppState {
    lobby: Arc<Lobby>,
    web_dir: PathBuf,
}

#[derive(Debug, Serialize)]
struct OkResponse {
    ok: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let port: u16 = env::var("PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(8080);
    let web_dir = env::var("WEB_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./web"));

    let state = AppState {
        lobby: Lobby::new(),
        web_dir: web_dir.clone(),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    let app: Router = Router::new()
        .route("/health", get(health))
        .route("/", get(root))
        .fallback_service(ServeDir::new(web_dir))
        .layer(cors)
        .with_state(state);

    let address = format!("0.0.0.0:{port}");
    tracing::info!("listening on {address}");
    let listener = tokio::net::TcpListener::bind(&address).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health() -> impl IntoResponse {
    Json(OkResponse { ok: true })
}

/// The root serves both faces of the server: WebSocket upgrades join the
/// game, plain GETs receive the bundled web client.
async fn root(
    ws: Option<WebSocketUpgrade>,
    State(state): State<AppState>,
) -> axum::response::Response {
    if let Some(ws) = ws {
        let lobby = Arc::clone(&state.lobby);
        return ws
            .protocols(["websocket"])
            .on_upgrade(move |socket| handle_socket(socket, lobby))
            .into_response();
    }
    let index = state.web_dir.join("index.html");
    match tokio::fs::read_to_string(&index).await {
        Ok(contents) => Html(contents).into_response(),
        Err(_) => Html("<h1>Curve Arena Server Running</h1>".to_string()).into_response(),
    }
}
