pub mod catalog;
pub mod chat;
pub mod error;
pub mod extract;
pub mod feed;
pub mod follows;
pub mod middleware;
pub mod notifications;
pub mod reactions;
pub mod search;
pub mod state;

use axum::{
    Json, Router,
    middleware::from_fn_with_state,
    routing::{get, post},
};

use crate::middleware::require_auth;
use crate::state::AppState;

/// Every route. CORS and tracing layers are added by the binary.
pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/chat/contacts", get(chat::contacts))
        .route("/chat/unread", get(chat::unread_counts))
        .route("/chat/{counterpart_id}/messages", get(chat::get_messages).post(chat::send_message))
        .route("/chat/{counterpart_id}/read", post(chat::mark_read))
        .route("/notifications", get(notifications::get_notifications))
        .route("/feed", get(feed::get_feed))
        .route("/reviews", post(catalog::upsert_review))
        .route("/reviews/{review_id}/reactions", post(reactions::react_to_review))
        .route("/reviews/{review_id}/comments", post(catalog::add_comment))
        .route("/comments/{comment_id}/reactions", post(reactions::react_to_comment))
        .route("/albums", post(catalog::create_album))
        .route("/albums/{album_id}", get(catalog::get_album))
        .route("/albums/{album_id}/clone", post(catalog::clone_album))
        .route("/search", get(search::search))
        .route("/users/{user_id}/follow", post(follows::follow).delete(follows::unfollow))
        .layer(from_fn_with_state(state.clone(), require_auth))
        .with_state(state);

    Router::new()
        .route("/health", get(health))
        .merge(protected)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
