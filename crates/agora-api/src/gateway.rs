use axum::{
    Extension,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
};

use agora_gateway::connection;
use agora_types::api::Claims;

use crate::state::AppState;

/// Upgrade to the event gateway. Authentication happened on the upgrade
/// request itself, so the session starts out identified.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let dispatcher = state.dispatcher.clone();
    ws.on_upgrade(move |socket| connection::handle_connection(socket, dispatcher, claims.sub))
}

pub async fn health() -> &'static str {
    "ok"
}
