//! REST surface for Plaza: accounts, posts, reactions and comments.
//!
//! Handlers validate input, run the store call off the runtime through
//! [`store`], and publish a [`plaza_types::events::FeedEvent`] for every
//! successful mutation.

pub mod auth;
pub mod comments;
pub mod error;
pub mod extract;
pub mod middleware;
pub mod posts;
pub mod reactions;
mod store;

use axum::{
    Json, Router,
    middleware::from_fn_with_state,
    routing::{get, post},
};
use serde_json::{Value, json};

use crate::auth::AppState;
use crate::middleware::require_auth;

/// All REST routes, with authentication applied to everything except
/// registration, login and the health probe.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/health", get(health));

    let protected_routes = Router::new()
        .route("/auth/profile", get(auth::profile).patch(auth::update_profile))
        .route("/posts", post(posts::create_post))
        .route("/posts/create", post(posts::create_post))
        .route("/posts/feed", get(posts::get_feed))
        .route("/posts/profile", get(posts::get_own_profile))
        .route("/posts/profile/{user_id}", get(posts::get_user_profile))
        .route("/posts/{post_id}", get(posts::get_post).delete(posts::delete_post))
        .route("/posts/{post_id}/reactions", post(reactions::toggle_reaction))
        .route(
            "/posts/{post_id}/comments",
            get(comments::list_comments).post(comments::add_comment),
        )
        .layer(from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "success": true, "status": "ok" }))
}
