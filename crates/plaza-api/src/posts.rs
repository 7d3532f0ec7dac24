use std::collections::BTreeSet;

use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{debug, info};
use uuid::Uuid;

use plaza_auth::Identity;
use plaza_db::{Database, DeleteOutcome};
use plaza_types::api::{
    CreatePostRequest, FeedResponse, MessageResponse, PostResponse, UserPostsResponse,
};
use plaza_types::events::FeedEvent;
use plaza_types::feed::{self, FeedItem};
use plaza_types::models::Post;
use plaza_types::validate::PostDraft;

use crate::auth::AppState;
use crate::error::{ApiError, ApiResult};
use crate::extract::{JsonBody, PathParam};
use crate::store::blocking;

/// Join display names for every author and commenter, then annotate.
pub(crate) fn assemble(db: &Database, posts: Vec<Post>, requester: Uuid) -> anyhow::Result<Vec<FeedItem>> {
    let ids: BTreeSet<Uuid> = posts
        .iter()
        .flat_map(|p| std::iter::once(p.author_id).chain(p.comments.iter().map(|c| c.author_id)))
        .collect();
    let names = db.user_names(&ids.into_iter().collect::<Vec<_>>())?;
    Ok(feed::build_feed(posts, &names, requester))
}

pub async fn create_post(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    JsonBody(req): JsonBody<CreatePostRequest>,
) -> ApiResult<impl IntoResponse> {
    let draft = PostDraft::new(&req.content, req.image.as_deref())?;

    let author = identity.user_id;
    let item = blocking(&state, move |db| {
        let post = db.create_post(author, &draft)?;
        Ok(assemble(db, vec![post], author)?.remove(0))
    })
    .await?;

    info!("{} published post {}", item.author_name, item.post.id);
    state.dispatcher.publish(FeedEvent::PostCreate {
        post: item.post.clone(),
        author_name: item.author_name.clone(),
    });

    Ok((
        StatusCode::CREATED,
        Json(PostResponse {
            success: true,
            post: item,
        }),
    ))
}

pub async fn get_feed(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> ApiResult<Json<FeedResponse>> {
    let requester = identity.user_id;
    let posts = blocking(&state, move |db| {
        let posts = db.list_all_posts()?;
        assemble(db, posts, requester)
    })
    .await?;

    debug!("Feed for {}: {} posts", identity.user_id, posts.len());
    Ok(Json(FeedResponse {
        success: true,
        posts,
    }))
}

pub async fn get_post(
    State(state): State<AppState>,
    PathParam(post_id): PathParam<Uuid>,
    Extension(identity): Extension<Identity>,
) -> ApiResult<Json<PostResponse>> {
    let requester = identity.user_id;
    let item = blocking(&state, move |db| match db.get_post(post_id)? {
        Some(post) => Ok(assemble(db, vec![post], requester)?.pop()),
        None => Ok(None),
    })
    .await?
    .ok_or(ApiError::NotFound("Post not found"))?;

    Ok(Json(PostResponse {
        success: true,
        post: item,
    }))
}

pub async fn get_own_profile(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> ApiResult<Json<UserPostsResponse>> {
    user_posts(&state, identity.user_id, identity.user_id).await
}

pub async fn get_user_profile(
    State(state): State<AppState>,
    PathParam(user_id): PathParam<Uuid>,
    Extension(identity): Extension<Identity>,
) -> ApiResult<Json<UserPostsResponse>> {
    user_posts(&state, user_id, identity.user_id).await
}

async fn user_posts(
    state: &AppState,
    user_id: Uuid,
    requester: Uuid,
) -> ApiResult<Json<UserPostsResponse>> {
    let found = blocking(state, move |db| {
        let Some(row) = db.get_user_by_id(user_id)? else {
            return Ok(None);
        };
        let posts = db.list_posts_by_author(user_id)?;
        Ok(Some((row.profile()?, assemble(db, posts, requester)?)))
    })
    .await?;

    let (user, posts) = found.ok_or(ApiError::NotFound("User not found"))?;
    Ok(Json(UserPostsResponse {
        success: true,
        user,
        posts,
    }))
}

pub async fn delete_post(
    State(state): State<AppState>,
    PathParam(post_id): PathParam<Uuid>,
    Extension(identity): Extension<Identity>,
) -> ApiResult<Json<MessageResponse>> {
    let requester = identity.user_id;
    let outcome = blocking(&state, move |db| db.delete_post(post_id, requester)).await?;

    match outcome {
        DeleteOutcome::NotFound => Err(ApiError::NotFound("Post not found")),
        DeleteOutcome::Forbidden => Err(ApiError::Forbidden(
            "You are not authorized to delete this post",
        )),
        DeleteOutcome::Deleted => {
            info!("User {} deleted post {}", requester, post_id);
            state.dispatcher.publish(FeedEvent::PostDelete { post_id });
            Ok(Json(MessageResponse {
                success: true,
                message: "Post deleted successfully".into(),
            }))
        }
    }
}
