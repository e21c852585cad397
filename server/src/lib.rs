//! Real-time relay for shared whiteboard sessions, plus the snapshot store
//! the clients persist named boards to.

pub mod config;
pub mod connection;
pub mod error;
pub mod handlers;
pub mod registry;
pub mod relay;
pub mod snapshots;
pub mod state;
pub mod storage;

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::handlers::{ping_handler, root_handler, ws_handler, ws_session_handler};
use crate::snapshots::{
    create_snapshot, delete_snapshot, get_snapshot, list_snapshots, update_snapshot,
};

pub use crate::config::{ServerConfig, StorageConfig};
pub use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/ping", get(ping_handler))
        .route("/ws", get(ws_handler))
        .route("/ws/:session_id", get(ws_session_handler))
        .route("/snapshots", get(list_snapshots).post(create_snapshot))
        .route(
            "/snapshots/:id",
            get(get_snapshot).put(update_snapshot).delete(delete_snapshot),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(listener: TcpListener, state: AppState) -> std::io::Result<()> {
    axum::serve(listener, router(state)).await
}
