use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Comment, Post};
use crate::reactions::ReactionMap;

/// Events sent over the WebSocket gateway after an authoritative mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum FeedEvent {
    /// Server confirms successful authentication
    Ready { user_id: Uuid, name: String },

    /// A post was published
    PostCreate { post: Post, author_name: String },

    /// A post and everything attached to it was removed
    PostDelete { post_id: Uuid },

    /// A user's reaction on a post changed; carries the full new map
    ReactionUpdate {
        post_id: Uuid,
        user_id: Uuid,
        reactions: ReactionMap,
    },

    /// A comment was appended
    CommentCreate { comment: Comment, author_name: String },
}

impl FeedEvent {
    /// The post this event concerns, if any.
    pub fn post_id(&self) -> Option<Uuid> {
        match self {
            Self::PostCreate { post, .. } => Some(post.id),
            Self::PostDelete { post_id } => Some(*post_id),
            Self::ReactionUpdate { post_id, .. } => Some(*post_id),
            Self::CommentCreate { comment, .. } => Some(comment.post_id),
            Self::Ready { .. } => None,
        }
    }
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },
}
