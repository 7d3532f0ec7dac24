use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::feed::FeedItem;
use crate::models::{Comment, UserProfile};
use crate::reactions::{Emoji, ReactionMap, Toggle};

// -- JWT Claims --

/// JWT claims shared by the REST middleware and the gateway handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub name: String,
    pub iat: usize,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub bio: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Returned by both register and login.
#[derive(Debug, Serialize, Deserialize)]
pub struct AuthResponse {
    pub success: bool,
    pub token: String,
    pub user: UserProfile,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProfileResponse {
    pub success: bool,
    pub user: UserProfile,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct UpdateProfileRequest {
    pub name: Option<String>,
    pub bio: Option<String>,
}

// -- Posts --

#[derive(Debug, Serialize, Deserialize)]
pub struct CreatePostRequest {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub image: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PostResponse {
    pub success: bool,
    pub post: FeedItem,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FeedResponse {
    pub success: bool,
    pub posts: Vec<FeedItem>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserPostsResponse {
    pub success: bool,
    pub user: UserProfile,
    pub posts: Vec<FeedItem>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

// -- Reactions --

/// `emoji` is kept as a raw string so unknown reactions reach validation
/// and come back as a typed error instead of a deserialization failure.
#[derive(Debug, Serialize, Deserialize)]
pub struct ToggleReactionRequest {
    pub emoji: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ToggleReactionResponse {
    pub success: bool,
    pub outcome: Toggle,
    pub reactions: ReactionMap,
    pub total: usize,
    pub user_reaction: Option<Emoji>,
}

// -- Comments --

#[derive(Debug, Serialize, Deserialize)]
pub struct AddCommentRequest {
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CommentResponse {
    pub success: bool,
    pub comment: Comment,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CommentsResponse {
    pub success: bool,
    pub comments: Vec<Comment>,
}

/// Body of every non-2xx response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
}
