use axum::{
    Extension, Json,
    extract::State,
};
use tracing::debug;
use uuid::Uuid;

use plaza_auth::Identity;
use plaza_types::Emoji;
use plaza_types::api::{ToggleReactionRequest, ToggleReactionResponse};
use plaza_types::events::FeedEvent;

use crate::auth::AppState;
use crate::error::{ApiError, ApiResult};
use crate::extract::{JsonBody, PathParam};
use crate::store::blocking;

pub async fn toggle_reaction(
    State(state): State<AppState>,
    PathParam(post_id): PathParam<Uuid>,
    Extension(identity): Extension<Identity>,
    JsonBody(req): JsonBody<ToggleReactionRequest>,
) -> ApiResult<Json<ToggleReactionResponse>> {
    // Reject unknown reactions before touching the store
    let emoji: Emoji = req.emoji.parse()?;

    let user_id = identity.user_id;
    let (outcome, reactions) = blocking(&state, move |db| {
        db.toggle_reaction(post_id, user_id, emoji)
    })
    .await?
    .ok_or(ApiError::NotFound("Post not found"))?;

    debug!("User {} on post {}: {:?}", identity.user_id, post_id, outcome);
    state.dispatcher.publish(FeedEvent::ReactionUpdate {
        post_id,
        user_id,
        reactions: reactions.clone(),
    });

    Ok(Json(ToggleReactionResponse {
        success: true,
        outcome,
        total: reactions.total(),
        user_reaction: outcome.current(),
        reactions,
    }))
}
