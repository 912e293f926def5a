use axum::Router;

use crate::chat::history;
use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// Build the full axum Router with all chat, presence and history routes.
pub fn build_router(state: AppState) -> Router {
    // WebSocket endpoints (auth via session cookie on the upgrade request)
    let ws_routes = Router::new()
        .route(
            "/chat/private",
            axum::routing::get(ws_handler::private_chat_upgrade),
        )
        .route(
            "/groups/chat",
            axum::routing::get(ws_handler::group_chat_upgrade),
        )
        .route("/ws/online", axum::routing::get(ws_handler::presence_upgrade));

    // REST endpoints backing the chat UI
    let chat_routes = Router::new()
        .route("/chat/history", axum::routing::get(history::get_private_history))
        .route("/chat/online", axum::routing::get(history::get_online_users))
        .route("/chat/friends", axum::routing::get(history::get_friend_statuses))
        .route("/markread", axum::routing::put(history::mark_read))
        .route(
            "/groups/chat/messages",
            axum::routing::get(history::get_group_history),
        );

    let health = Router::new().route("/health", axum::routing::get(health_check));

    Router::new()
        .merge(ws_routes)
        .merge(chat_routes)
        .merge(health)
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
