use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Path, Query, State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
    Json,
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use ripple_db::Database;
use ripple_hub::connection;
use ripple_hub::hub::Hub;
use ripple_hub::membership::Membership;
use ripple_hub::retention;

#[derive(Clone)]
struct ServerState {
    hub: Hub,
    membership: Membership,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ripple=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let db_path = std::env::var("RIPPLE_DB_PATH").unwrap_or_else(|_| "ripple.db".into());
    let host = std::env::var("RIPPLE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("RIPPLE_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;

    // A working store is a hard startup requirement.
    let db = Arc::new(Database::open(&PathBuf::from(&db_path))?);

    // Hub + membership, constructed once and passed by reference — no globals.
    let membership = Membership::new();
    let hub = Hub::spawn(db.clone(), membership.clone());

    tokio::spawn(retention::run_retention_loop(
        db.clone(),
        retention::SWEEP_INTERVAL,
        retention::default_retention_window(),
    ));

    let state = ServerState { hub, membership };

    let app = Router::new()
        .route("/api/channels", get(list_channels))
        .route("/ws/{channel}", get(ws_attach))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Ripple hub listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let served = axum::serve(listener, app).await;

    // Close the store even when serve bails out with an error.
    db.close()?;
    served?;
    Ok(())
}

/// Reporting query: snapshot of active channel ids.
async fn list_channels(State(state): State<ServerState>) -> impl IntoResponse {
    Json(state.membership.list())
}

#[derive(Debug, Deserialize)]
struct AttachQuery {
    username: String,
}

async fn ws_attach(
    State(state): State<ServerState>,
    Path(channel): Path<String>,
    Query(query): Query<AttachQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        connection::handle_socket(socket, state.hub, channel, query.username)
    })
}
