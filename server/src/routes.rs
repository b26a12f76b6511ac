use axum::{middleware, routing, Router};

use crate::auth::middleware::inject_jwt_secret;
use crate::chat::presence;
use crate::dm::{conversations, messages, read};
use crate::state::AppState;
use crate::users::profile;
use crate::ws::handler as ws_handler;

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    // Public routes (no auth required). GET /api/users is a search and takes
    // Claims like the other user routes.
    let public_routes = Router::new()
        .route(
            "/api/users",
            routing::post(profile::create_user).get(profile::search_users),
        )
        // Sweep trigger for external schedulers; the in-process sweep runs regardless
        .route("/api/users/cleanup", routing::get(presence::cleanup));

    // User routes (JWT required; the Claims extractor validates the token).
    // Note: /api/users/status and /api/users/privacy MUST be registered as static
    // paths so they are not captured by /api/users/{id}.
    let user_routes = Router::new()
        .route("/api/users/status", routing::put(presence::update_status))
        .route("/api/users/privacy", routing::put(profile::update_privacy))
        .route("/api/users/{id}", routing::get(profile::get_user));

    let conversation_routes = Router::new()
        .route(
            "/api/conversations",
            routing::get(conversations::list_conversations).post(conversations::create_conversation),
        )
        .route(
            "/api/conversations/{id}",
            routing::delete(conversations::delete_conversation),
        )
        .route(
            "/api/conversations/{id}/messages",
            routing::get(conversations::list_messages),
        );

    let message_routes = Router::new()
        .route("/api/messages", routing::post(messages::send_message))
        .route(
            "/api/messages/read",
            routing::put(read::mark_read).get(read::read_status),
        )
        .route("/api/messages/unread", routing::get(read::unread_counts));

    // WebSocket endpoint (identity is bound in-band by the authenticate event)
    let ws_routes = Router::new().route("/ws", routing::get(ws_handler::ws_upgrade));

    // Health check
    let health = Router::new().route("/health", routing::get(health_check));

    Router::new()
        .merge(public_routes)
        .merge(user_routes)
        .merge(conversation_routes)
        .merge(message_routes)
        .merge(ws_routes)
        .merge(health)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            inject_jwt_secret,
        ))
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
