use std::sync::Arc;

use agora_chat::ChatService;
use agora_gateway::Dispatcher;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub chat: ChatService,
    pub dispatcher: Dispatcher,
    pub jwt_secret: String,
    /// Requests allowed per user and route in each one-minute window.
    pub rate_limit_per_minute: u64,
}
