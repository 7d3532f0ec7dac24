use std::future::Future;
use std::time::Duration;

use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use uuid::Uuid;

use plaza_types::api::{
    AddCommentRequest, AuthResponse, CommentResponse, CreatePostRequest, ErrorResponse,
    FeedResponse, LoginRequest, MessageResponse, PostResponse, ToggleReactionRequest,
    ToggleReactionResponse,
};
use plaza_types::feed::FeedItem;
use plaza_types::models::{Comment, UserProfile};
use plaza_types::validate::{CommentDraft, PostDraft};
use plaza_types::{Emoji, ReactionMap, Toggle};

use crate::error::ClientError;

/// The authoritative store as seen from a client.
pub trait Authority {
    fn feed(&self) -> impl Future<Output = Result<Vec<FeedItem>, ClientError>> + Send;

    fn create_post(
        &self,
        draft: &PostDraft,
    ) -> impl Future<Output = Result<FeedItem, ClientError>> + Send;

    fn toggle_reaction(
        &self,
        post_id: Uuid,
        emoji: Emoji,
    ) -> impl Future<Output = Result<(Toggle, ReactionMap), ClientError>> + Send;

    fn add_comment(
        &self,
        post_id: Uuid,
        draft: &CommentDraft,
    ) -> impl Future<Output = Result<Comment, ClientError>> + Send;

    fn delete_post(&self, post_id: Uuid) -> impl Future<Output = Result<(), ClientError>> + Send;
}

/// Default bound on a single request to the server.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// [`Authority`] backed by the Plaza REST API.
#[derive(Clone)]
pub struct HttpAuthority {
    client: Client,
    base_url: String,
    token: String,
}

impl HttpAuthority {
    pub fn new(base_url: &str, token: String, timeout: Duration) -> Result<Self, ClientError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    /// Log in and return an authority carrying the issued token.
    pub async fn login(
        base_url: &str,
        email: &str,
        password: &str,
        timeout: Duration,
    ) -> Result<(Self, UserProfile), ClientError> {
        let mut authority = Self::new(base_url, String::new(), timeout)?;
        let body = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        let resp: AuthResponse = authority
            .execute(authority.client.post(authority.url("/auth/login")).json(&body))
            .await?;

        authority.token = resp.token;
        Ok((authority, resp.user))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        req.bearer_auth(&self.token)
    }

    async fn execute<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, ClientError> {
        let resp = req.send().await?;
        let status = resp.status();

        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.message)
                .unwrap_or(body);
            warn!("Request failed ({}): {}", status, message);
            return Err(ClientError::from_status(status, message));
        }

        Ok(resp.json::<T>().await?)
    }
}

impl Authority for HttpAuthority {
    async fn feed(&self) -> Result<Vec<FeedItem>, ClientError> {
        let resp: FeedResponse = self
            .execute(self.authed(self.client.get(self.url("/posts/feed"))))
            .await?;
        debug!("Fetched {} posts", resp.posts.len());
        Ok(resp.posts)
    }

    async fn create_post(&self, draft: &PostDraft) -> Result<FeedItem, ClientError> {
        let body = CreatePostRequest {
            content: draft.content().to_string(),
            image: draft.image().map(str::to_string),
        };
        let resp: PostResponse = self
            .execute(self.authed(self.client.post(self.url("/posts"))).json(&body))
            .await?;
        Ok(resp.post)
    }

    async fn toggle_reaction(
        &self,
        post_id: Uuid,
        emoji: Emoji,
    ) -> Result<(Toggle, ReactionMap), ClientError> {
        let body = ToggleReactionRequest {
            emoji: emoji.name().to_string(),
        };
        let url = self.url(&format!("/posts/{post_id}/reactions"));
        let resp: ToggleReactionResponse = self
            .execute(self.authed(self.client.post(url)).json(&body))
            .await?;
        Ok((resp.outcome, resp.reactions))
    }

    async fn add_comment(&self, post_id: Uuid, draft: &CommentDraft) -> Result<Comment, ClientError> {
        let body = AddCommentRequest {
            content: draft.content().to_string(),
        };
        let url = self.url(&format!("/posts/{post_id}/comments"));
        let resp: CommentResponse = self
            .execute(self.authed(self.client.post(url)).json(&body))
            .await?;
        Ok(resp.comment)
    }

    async fn delete_post(&self, post_id: Uuid) -> Result<(), ClientError> {
        let url = self.url(&format!("/posts/{post_id}"));
        let _: MessageResponse = self.execute(self.authed(self.client.delete(url))).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_server_is_store_unavailable() {
        // Port 9 (discard) on localhost is not expected to accept connections
        let authority =
            HttpAuthority::new("http://127.0.0.1:9/", "token".into(), Duration::from_millis(500))
                .unwrap();
        assert_eq!(authority.url("/posts/feed"), "http://127.0.0.1:9/posts/feed");

        let err = authority.feed().await.unwrap_err();
        assert!(matches!(err, ClientError::StoreUnavailable(_)), "{err:?}");
    }
}
