use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use plaza_auth::Identity;
use plaza_types::api::{AddCommentRequest, CommentResponse, CommentsResponse};
use plaza_types::events::FeedEvent;
use plaza_types::feed;
use plaza_types::validate::CommentDraft;

use crate::auth::AppState;
use crate::error::{ApiError, ApiResult};
use crate::extract::{JsonBody, PathParam};
use crate::store::blocking;

pub async fn add_comment(
    State(state): State<AppState>,
    PathParam(post_id): PathParam<Uuid>,
    Extension(identity): Extension<Identity>,
    JsonBody(req): JsonBody<AddCommentRequest>,
) -> ApiResult<impl IntoResponse> {
    let draft = CommentDraft::new(&req.content)?;

    // Token claims carry the name at login time; renames since then only
    // show up in the store.
    let author = identity.user_id;
    let (comment, author_name) = blocking(&state, move |db| {
        let Some(comment) = db.append_comment(post_id, author, &draft)? else {
            return Ok(None);
        };
        let name = db
            .user_names(&[author])?
            .remove(&author)
            .unwrap_or_else(|| feed::UNKNOWN_AUTHOR.to_string());
        Ok(Some((comment, name)))
    })
    .await?
    .ok_or(ApiError::NotFound("Post not found"))?;

    state.dispatcher.publish(FeedEvent::CommentCreate {
        comment: comment.clone(),
        author_name,
    });

    Ok((
        StatusCode::CREATED,
        Json(CommentResponse {
            success: true,
            comment,
        }),
    ))
}

pub async fn list_comments(
    State(state): State<AppState>,
    PathParam(post_id): PathParam<Uuid>,
) -> ApiResult<Json<CommentsResponse>> {
    let comments = blocking(&state, move |db| db.list_comments(post_id))
        .await?
        .ok_or(ApiError::NotFound("Post not found"))?;

    Ok(Json(CommentsResponse {
        success: true,
        comments,
    }))
}
