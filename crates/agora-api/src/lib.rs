pub mod auth;
pub mod error;
pub mod extract;
pub mod gateway;
pub mod messages;
pub mod middleware;
pub mod read;
pub mod rooms;
pub mod state;

use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::{delete, get, post},
};

pub use error::ApiError;
pub use state::{AppState, AppStateInner};

/// All HTTP routes. Everything except `/health` requires a bearer token;
/// REST routes are also rate limited per user and route.
pub fn router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/rooms", post(rooms::create_room).get(rooms::list_rooms))
        .route("/rooms/{room_id}", get(rooms::get_room))
        .route(
            "/rooms/{room_id}/messages",
            get(messages::get_messages).post(messages::send_message),
        )
        .route("/messages/{message_id}", delete(messages::delete_message))
        .route("/read", post(read::mark_read).get(read::get_read_state))
        .route_layer(from_fn_with_state(state.clone(), middleware::rate_limit))
        .route_layer(from_fn_with_state(state.clone(), middleware::require_auth));

    let ws_route = Router::new()
        .route("/gateway", get(gateway::ws_upgrade))
        .route_layer(from_fn_with_state(state.clone(), middleware::require_auth));

    Router::new()
        .merge(protected_routes)
        .merge(ws_route)
        .route("/health", get(gateway::health))
        .with_state(state)
}
