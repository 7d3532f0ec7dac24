use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info, warn};
use uuid::Uuid;

use plaza_types::events::FeedEvent;
use plaza_types::feed::{self, FeedItem};
use plaza_types::models::{Comment, Post};
use plaza_types::validate::{CommentDraft, PostDraft};
use plaza_types::{Emoji, Toggle};

use crate::authority::Authority;
use crate::error::ClientError;

const EVENT_CAPACITY: usize = 256;

/// What changed in the cache. Views re-render from [`ClientCache::feed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheEvent {
    /// The whole mirror was reloaded from the authority.
    Refreshed { posts: usize },
    Inserted { post_id: Uuid },
    Updated { post_id: Uuid },
    Evicted { post_id: Uuid },
    /// An optimistic change was undone after the authority refused it.
    RolledBack { post_id: Uuid },
    /// The entry may disagree with the authority until the next refresh.
    Stale { post_id: Uuid },
}

struct Entry {
    post: Post,
    /// Changes on every local or external write to this entry.
    version: u64,
    stale: bool,
}

/// Pre-image of an optimistic write.
struct Pending {
    snapshot: Post,
    version: u64,
}

#[derive(Default)]
struct State {
    posts: HashMap<Uuid, Entry>,
    names: HashMap<Uuid, String>,
    next_version: u64,
    /// Bumped by every refresh.
    generation: u64,
}

impl State {
    fn bump(&mut self) -> u64 {
        self.next_version += 1;
        self.next_version
    }

    fn insert(&mut self, post: Post) {
        let version = self.bump();
        self.posts.insert(
            post.id,
            Entry {
                post,
                version,
                stale: false,
            },
        );
    }

    fn learn_names(&mut self, item: &FeedItem) {
        self.names
            .insert(item.post.author_id, item.author_name.clone());
        self.names.extend(
            item.comment_authors
                .iter()
                .map(|(id, name)| (*id, name.clone())),
        );
    }

    fn apply(&mut self, post_id: Uuid, f: impl FnOnce(&mut Post)) -> Option<Pending> {
        let version = self.bump();
        let entry = self.posts.get_mut(&post_id)?;
        let snapshot = entry.post.clone();
        f(&mut entry.post);
        entry.version = version;
        Some(Pending { snapshot, version })
    }
}

/// Local mirror of the feed for instant feedback.
///
/// Every mutation goes through to the [`Authority`]; the cache never holds
/// the only record of a change that claimed success. Reactions, comments and
/// deletes are applied locally before dispatch and then either reconciled
/// with the authoritative result or rolled back. When another write touched
/// the entry in the meantime a rollback would clobber it, so the entry is
/// marked stale instead.
pub struct ClientCache<A> {
    authority: A,
    user_id: Uuid,
    state: Mutex<State>,
    events: broadcast::Sender<CacheEvent>,
}

impl<A: Authority> ClientCache<A> {
    pub fn new(authority: A, user_id: Uuid, user_name: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let mut state = State::default();
        state.names.insert(user_id, user_name.into());

        Self {
            authority,
            user_id,
            state: Mutex::new(state),
            events,
        }
    }

    pub fn authority(&self) -> &A {
        &self.authority
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: CacheEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Replace the mirror with the authority's feed. Clears every stale mark.
    pub async fn refresh(&self) -> Result<usize, ClientError> {
        let items = self.authority.feed().await?;
        let count = items.len();

        let mut state = self.state.lock().await;
        state.generation += 1;
        state.posts.clear();
        for item in &items {
            state.learn_names(item);
        }
        for item in items {
            state.insert(item.post);
        }
        drop(state);

        info!("Cache refreshed with {} posts", count);
        self.emit(CacheEvent::Refreshed { posts: count });
        Ok(count)
    }

    /// The mirrored feed, annotated for this user.
    pub async fn feed(&self) -> Vec<FeedItem> {
        let state = self.state.lock().await;
        let posts = state.posts.values().map(|e| e.post.clone()).collect();
        feed::build_feed(posts, &state.names, self.user_id)
    }

    pub async fn is_stale(&self, post_id: Uuid) -> bool {
        let state = self.state.lock().await;
        state.posts.get(&post_id).is_some_and(|e| e.stale)
    }

    pub async fn stale_posts(&self) -> Vec<Uuid> {
        let state = self.state.lock().await;
        state
            .posts
            .iter()
            .filter(|(_, e)| e.stale)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Publish a post. The server assigns the id, so nothing is inserted
    /// until the authority confirms.
    pub async fn create_post(
        &self,
        content: &str,
        image: Option<&str>,
    ) -> Result<FeedItem, ClientError> {
        let draft = PostDraft::new(content, image)?;
        let item = self.authority.create_post(&draft).await?;

        let mut state = self.state.lock().await;
        state.learn_names(&item);
        state.insert(item.post.clone());
        drop(state);

        self.emit(CacheEvent::Inserted {
            post_id: item.post.id,
        });
        Ok(item)
    }

    pub async fn toggle_reaction(&self, post_id: Uuid, emoji: Emoji) -> Result<Toggle, ClientError> {
        let user_id = self.user_id;
        let pending = self.begin(post_id, |post| {
            post.reactions.toggle(user_id, emoji);
        })
        .await;

        match self.authority.toggle_reaction(post_id, emoji).await {
            Ok((outcome, reactions)) => {
                self.confirm(post_id, |post| post.reactions = reactions).await;
                Ok(outcome)
            }
            Err(e) => {
                self.settle_failure(post_id, pending, &e, |_| {}).await;
                Err(e)
            }
        }
    }

    pub async fn add_comment(&self, post_id: Uuid, content: &str) -> Result<Comment, ClientError> {
        let draft = CommentDraft::new(content)?;

        let provisional = Uuid::new_v4();
        let user_id = self.user_id;
        let pending = self.begin(post_id, |post| {
            let seq = post.comments.last().map_or(0, |c| c.seq) + 1;
            post.comments.push(Comment {
                id: provisional,
                post_id,
                author_id: user_id,
                content: draft.content().to_string(),
                created_at: Utc::now(),
                seq,
            });
        })
        .await;

        match self.authority.add_comment(post_id, &draft).await {
            Ok(comment) => {
                let confirmed = comment.clone();
                self.confirm(post_id, move |post| {
                    if post.comments.iter().any(|c| c.id == confirmed.id) {
                        post.comments.retain(|c| c.id != provisional);
                    } else if let Some(slot) =
                        post.comments.iter_mut().find(|c| c.id == provisional)
                    {
                        *slot = confirmed;
                    } else {
                        post.comments.push(confirmed);
                    }
                })
                .await;
                Ok(comment)
            }
            Err(e) => {
                self.settle_failure(post_id, pending, &e, |post| {
                    post.comments.retain(|c| c.id != provisional);
                })
                .await;
                Err(e)
            }
        }
    }

    pub async fn delete_post(&self, post_id: Uuid) -> Result<(), ClientError> {
        let removed = {
            let mut state = self.state.lock().await;
            let generation = state.generation;
            state.posts.remove(&post_id).map(|e| (e, generation))
        };
        if removed.is_some() {
            self.emit(CacheEvent::Evicted { post_id });
        }

        let Err(e) = self.authority.delete_post(post_id).await else {
            return Ok(());
        };

        let Some((entry, generation)) = removed else {
            return Err(e);
        };
        if matches!(e, ClientError::NotFound(_)) {
            return Err(e);
        }

        let mut state = self.state.lock().await;
        if let Some(current) = state.posts.get_mut(&post_id) {
            current.stale = true;
            drop(state);
            self.emit(CacheEvent::Stale { post_id });
        } else if state.generation == generation {
            state.insert(entry.post);
            drop(state);
            warn!("Delete of {} failed, restored: {}", post_id, e);
            self.emit(CacheEvent::RolledBack { post_id });
        }
        Err(e)
    }

    /// Fold a change notification from the gateway into the mirror.
    ///
    /// Returns whether anything changed.
    pub async fn on_external_change(&self, event: &FeedEvent) -> bool {
        let mut state = self.state.lock().await;

        let change = match event {
            FeedEvent::Ready { .. } => None,
            FeedEvent::PostCreate { post, author_name } => {
                state.names.insert(post.author_id, author_name.clone());
                if state.posts.contains_key(&post.id) {
                    None
                } else {
                    state.insert(post.clone());
                    Some(CacheEvent::Inserted { post_id: post.id })
                }
            }
            FeedEvent::PostDelete { post_id } => state
                .posts
                .remove(post_id)
                .map(|_| CacheEvent::Evicted { post_id: *post_id }),
            FeedEvent::ReactionUpdate {
                post_id, reactions, ..
            } => state
                .apply(*post_id, |post| post.reactions = reactions.clone())
                .map(|_| CacheEvent::Updated { post_id: *post_id }),
            FeedEvent::CommentCreate {
                comment,
                author_name,
            } => {
                state
                    .names
                    .insert(comment.author_id, author_name.clone());
                state
                    .apply(comment.post_id, |post| {
                        if !post.comments.iter().any(|c| c.id == comment.id) {
                            post.comments.push(comment.clone());
                        }
                    })
                    .map(|_| CacheEvent::Updated {
                        post_id: comment.post_id,
                    })
            }
        };
        drop(state);

        match change {
            Some(change) => {
                debug!("External change: {:?}", change);
                self.emit(change);
                true
            }
            None => false,
        }
    }

    async fn begin(&self, post_id: Uuid, f: impl FnOnce(&mut Post)) -> Option<Pending> {
        let pending = self.state.lock().await.apply(post_id, f);
        if pending.is_some() {
            self.emit(CacheEvent::Updated { post_id });
        }
        pending
    }

    async fn confirm(&self, post_id: Uuid, f: impl FnOnce(&mut Post)) {
        if self.state.lock().await.apply(post_id, f).is_some() {
            self.emit(CacheEvent::Updated { post_id });
        }
    }

    /// Undo a refused optimistic write. `NotFound` evicts; an entry another
    /// write touched since keeps that write, loses `undo`, and goes stale.
    async fn settle_failure(
        &self,
        post_id: Uuid,
        pending: Option<Pending>,
        error: &ClientError,
        undo: impl FnOnce(&mut Post),
    ) {
        let mut state = self.state.lock().await;

        if matches!(error, ClientError::NotFound(_)) {
            if state.posts.remove(&post_id).is_some() {
                drop(state);
                self.emit(CacheEvent::Evicted { post_id });
            }
            return;
        }

        let Some(pending) = pending else {
            return;
        };
        let version = state.bump();
        let Some(entry) = state.posts.get_mut(&post_id) else {
            return;
        };

        let event = if entry.version == pending.version {
            entry.post = pending.snapshot;
            entry.version = version;
            CacheEvent::RolledBack { post_id }
        } else {
            undo(&mut entry.post);
            entry.version = version;
            entry.stale = true;
            CacheEvent::Stale { post_id }
        };
        drop(state);

        warn!("Write to {} failed ({}): {:?}", post_id, error, event);
        self.emit(event);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::Mutex as StdMutex;

    use chrono::DateTime;
    use tokio::sync::Notify;

    use super::*;
    use plaza_types::ReactionMap;

    /// In-process authority applying the same rules as the server.
    struct Fake {
        requester: Uuid,
        posts: StdMutex<Vec<Post>>,
        names: HashMap<Uuid, String>,
        fail: StdMutex<Option<ClientError>>,
        gate: Option<Arc<Notify>>,
    }

    impl Fake {
        fn new(requester: Uuid, names: &[(Uuid, &str)]) -> Self {
            Self {
                requester,
                posts: StdMutex::new(Vec::new()),
                names: names.iter().map(|(id, n)| (*id, n.to_string())).collect(),
                fail: StdMutex::new(None),
                gate: None,
            }
        }

        fn seed(&self, author: Uuid, content: &str) -> Uuid {
            let mut posts = self.posts.lock().unwrap();
            let seq = posts.len() as i64 + 1;
            let post = Post {
                id: Uuid::new_v4(),
                author_id: author,
                content: content.into(),
                image: None,
                created_at: DateTime::from_timestamp(seq, 0).unwrap(),
                seq,
                reactions: ReactionMap::new(),
                comments: vec![],
            };
            let id = post.id;
            posts.push(post);
            id
        }

        fn fail_next(&self, error: ClientError) {
            *self.fail.lock().unwrap() = Some(error);
        }

        fn check(&self) -> Result<(), ClientError> {
            match self.fail.lock().unwrap().take() {
                Some(e) => Err(e),
                None => Ok(()),
            }
        }

        fn post(&self, id: Uuid) -> Option<Post> {
            self.posts.lock().unwrap().iter().find(|p| p.id == id).cloned()
        }
    }

    impl Authority for Fake {
        async fn feed(&self) -> Result<Vec<FeedItem>, ClientError> {
            let posts = self.posts.lock().unwrap().clone();
            Ok(feed::build_feed(posts, &self.names, self.requester))
        }

        async fn create_post(&self, draft: &PostDraft) -> Result<FeedItem, ClientError> {
            self.check()?;
            let id = self.seed(self.requester, draft.content());
            let post = self.post(id).unwrap();
            Ok(feed::annotate(post, &self.names, self.requester))
        }

        async fn toggle_reaction(
            &self,
            post_id: Uuid,
            emoji: Emoji,
        ) -> Result<(Toggle, ReactionMap), ClientError> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            self.check()?;
            let mut posts = self.posts.lock().unwrap();
            let post = posts
                .iter_mut()
                .find(|p| p.id == post_id)
                .ok_or_else(|| ClientError::NotFound("Post not found".into()))?;
            let outcome = post.reactions.toggle(self.requester, emoji);
            Ok((outcome, post.reactions.clone()))
        }

        async fn add_comment(
            &self,
            post_id: Uuid,
            draft: &CommentDraft,
        ) -> Result<Comment, ClientError> {
            self.check()?;
            let mut posts = self.posts.lock().unwrap();
            let post = posts
                .iter_mut()
                .find(|p| p.id == post_id)
                .ok_or_else(|| ClientError::NotFound("Post not found".into()))?;
            let comment = Comment {
                id: Uuid::new_v4(),
                post_id,
                author_id: self.requester,
                content: draft.content().to_string(),
                created_at: Utc::now(),
                seq: 100 + post.comments.len() as i64,
            };
            post.comments.push(comment.clone());
            Ok(comment)
        }

        async fn delete_post(&self, post_id: Uuid) -> Result<(), ClientError> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            self.check()?;
            let mut posts = self.posts.lock().unwrap();
            let before = posts.len();
            posts.retain(|p| p.id != post_id);
            if posts.len() == before {
                return Err(ClientError::NotFound("Post not found".into()));
            }
            Ok(())
        }
    }

    fn unavailable() -> ClientError {
        ClientError::StoreUnavailable("timed out".into())
    }

    /// A cache for `me` over a fake holding one post by `author`.
    async fn setup(gate: Option<Arc<Notify>>) -> (ClientCache<Fake>, Uuid, Uuid) {
        let me = Uuid::new_v4();
        let author = Uuid::new_v4();
        let mut fake = Fake::new(me, &[(me, "Me"), (author, "Ada")]);
        fake.gate = gate;
        let post_id = fake.seed(author, "hello");

        let cache = ClientCache::new(fake, me, "Me");
        assert_eq!(cache.refresh().await.unwrap(), 1);
        (cache, me, post_id)
    }

    #[tokio::test]
    async fn refresh_mirrors_the_authority() {
        let (cache, _, post_id) = setup(None).await;
        let author = cache.authority().post(post_id).unwrap().author_id;
        cache.authority().seed(author, "later");
        cache.refresh().await.unwrap();

        let feed = cache.feed().await;
        let contents: Vec<_> = feed.iter().map(|i| i.post.content.as_str()).collect();
        assert_eq!(contents, ["later", "hello"]);
        assert_eq!(feed[1].author_name, "Ada");
        assert_eq!(feed[1].total_reactions, 0);
    }

    #[tokio::test]
    async fn toggle_is_reconciled_with_the_authority() {
        let (cache, me, post_id) = setup(None).await;
        let mut events = cache.subscribe();

        assert_eq!(
            cache.toggle_reaction(post_id, Emoji::Love).await.unwrap(),
            Toggle::Added { emoji: Emoji::Love }
        );
        let item = cache.feed().await.remove(0);
        assert_eq!(item.user_reaction, Some(Emoji::Love));
        assert_eq!(item.total_reactions, 1);
        assert_eq!(
            cache.authority().post(post_id).unwrap().reactions.reaction_of(me),
            Some(Emoji::Love)
        );

        assert_eq!(events.recv().await.unwrap(), CacheEvent::Updated { post_id });
        assert_eq!(events.recv().await.unwrap(), CacheEvent::Updated { post_id });
    }

    #[tokio::test]
    async fn failed_toggle_rolls_back() {
        let (cache, _, post_id) = setup(None).await;
        cache.toggle_reaction(post_id, Emoji::Like).await.unwrap();

        let mut events = cache.subscribe();
        cache.authority().fail_next(unavailable());
        let err = cache.toggle_reaction(post_id, Emoji::Wow).await.unwrap_err();
        assert_eq!(err, unavailable());

        let item = cache.feed().await.remove(0);
        assert_eq!(item.user_reaction, Some(Emoji::Like));
        assert!(!cache.is_stale(post_id).await);
        assert_eq!(events.recv().await.unwrap(), CacheEvent::Updated { post_id });
        assert_eq!(events.recv().await.unwrap(), CacheEvent::RolledBack { post_id });
    }

    #[tokio::test]
    async fn failure_after_concurrent_change_marks_stale() {
        let gate = Arc::new(Notify::new());
        let (cache, _, post_id) = setup(Some(gate.clone())).await;
        cache.authority().fail_next(unavailable());

        let other = Uuid::new_v4();
        let external: ReactionMap = [(Emoji::Wow, other)].into_iter().collect();

        let (result, changed) = tokio::join!(cache.toggle_reaction(post_id, Emoji::Like), async {
            let changed = cache
                .on_external_change(&FeedEvent::ReactionUpdate {
                    post_id,
                    user_id: other,
                    reactions: external.clone(),
                })
                .await;
            gate.notify_one();
            changed
        });

        assert!(changed);
        assert!(result.is_err());
        assert!(cache.is_stale(post_id).await);
        assert_eq!(cache.stale_posts().await, vec![post_id]);

        // The external write survives
        let item = cache.feed().await.remove(0);
        assert_eq!(item.post.reactions, external);

        cache.refresh().await.unwrap();
        assert!(!cache.is_stale(post_id).await);
    }

    #[tokio::test]
    async fn not_found_evicts() {
        let (cache, _, post_id) = setup(None).await;
        cache.authority().posts.lock().unwrap().clear();

        let err = cache.toggle_reaction(post_id, Emoji::Sad).await.unwrap_err();
        assert!(matches!(err, ClientError::NotFound(_)));
        assert!(cache.feed().await.is_empty());
    }

    #[tokio::test]
    async fn comment_replaces_the_provisional_entry() {
        let (cache, me, post_id) = setup(None).await;

        let comment = cache.add_comment(post_id, "  first!  ").await.unwrap();
        assert_eq!(comment.content, "first!");

        let item = cache.feed().await.remove(0);
        assert_eq!(item.comment_count, 1);
        assert_eq!(item.post.comments[0].id, comment.id);
        assert_eq!(item.comment_authors.get(&me).map(String::as_str), Some("Me"));

        // The same comment echoed by the gateway is not duplicated
        cache
            .on_external_change(&FeedEvent::CommentCreate {
                comment: comment.clone(),
                author_name: "Me".into(),
            })
            .await;
        assert_eq!(cache.feed().await[0].comment_count, 1);
    }

    #[tokio::test]
    async fn failed_comment_leaves_no_trace() {
        let (cache, _, post_id) = setup(None).await;
        cache.authority().fail_next(unavailable());

        assert!(cache.add_comment(post_id, "lost").await.is_err());
        assert_eq!(cache.feed().await[0].comment_count, 0);

        let err = cache.add_comment(post_id, &"x".repeat(201)).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Validation(plaza_types::ValidationError::ContentTooLong { .. })
        ));
    }

    #[tokio::test]
    async fn failed_delete_restores_the_post() {
        let (cache, _, post_id) = setup(None).await;
        cache.authority().fail_next(ClientError::Forbidden("not yours".into()));

        let err = cache.delete_post(post_id).await.unwrap_err();
        assert!(matches!(err, ClientError::Forbidden(_)));
        assert_eq!(cache.feed().await.len(), 1);

        cache.delete_post(post_id).await.unwrap();
        assert!(cache.feed().await.is_empty());
        assert!(cache.authority().post(post_id).is_none());
    }

    #[tokio::test]
    async fn failed_delete_stays_evicted_after_a_refresh_without_it() {
        let gate = Arc::new(Notify::new());
        let (cache, _, post_id) = setup(Some(gate.clone())).await;
        cache.authority().fail_next(ClientError::Forbidden("not yours".into()));

        let (result, refreshed) = tokio::join!(cache.delete_post(post_id), async {
            cache.authority().posts.lock().unwrap().clear();
            let refreshed = cache.refresh().await.unwrap();
            gate.notify_one();
            refreshed
        });

        assert_eq!(refreshed, 0);
        assert!(matches!(result, Err(ClientError::Forbidden(_))));
        assert!(cache.feed().await.is_empty());
        assert!(!cache.is_stale(post_id).await);
    }

    #[tokio::test]
    async fn failed_delete_marks_a_refreshed_post_stale() {
        let gate = Arc::new(Notify::new());
        let (cache, _, post_id) = setup(Some(gate.clone())).await;
        cache.authority().fail_next(unavailable());
        let mut events = cache.subscribe();

        let (result, _) = tokio::join!(cache.delete_post(post_id), async {
            cache.refresh().await.unwrap();
            gate.notify_one();
        });

        assert_eq!(result.unwrap_err(), unavailable());
        assert_eq!(cache.feed().await.len(), 1);
        assert!(cache.is_stale(post_id).await);

        assert_eq!(events.recv().await.unwrap(), CacheEvent::Evicted { post_id });
        assert_eq!(events.recv().await.unwrap(), CacheEvent::Refreshed { posts: 1 });
        assert_eq!(events.recv().await.unwrap(), CacheEvent::Stale { post_id });
    }

    #[tokio::test]
    async fn create_waits_for_the_authority() {
        let (cache, me, _) = setup(None).await;

        let err = cache.create_post(&"x".repeat(2001), None).await.unwrap_err();
        assert!(matches!(err, ClientError::Validation(_)));
        assert_eq!(cache.authority().posts.lock().unwrap().len(), 1);

        cache.authority().fail_next(unavailable());
        assert!(cache.create_post("nope", None).await.is_err());
        assert_eq!(cache.feed().await.len(), 1);

        let item = cache.create_post("mine", None).await.unwrap();
        let feed = cache.feed().await;
        assert_eq!(feed.len(), 2);
        assert_eq!(feed[0].post.id, item.post.id);
        assert_eq!(feed[0].post.author_id, me);
        assert_eq!(feed[0].author_name, "Me");
    }

    #[tokio::test]
    async fn external_changes_are_folded_in() {
        let (cache, _, post_id) = setup(None).await;
        let stranger = Uuid::new_v4();
        let post = Post {
            id: Uuid::new_v4(),
            author_id: stranger,
            content: "from elsewhere".into(),
            image: None,
            created_at: Utc::now(),
            seq: 99,
            reactions: ReactionMap::new(),
            comments: vec![],
        };

        assert!(!cache.on_external_change(&FeedEvent::Ready {
            user_id: stranger,
            name: "Zed".into(),
        })
        .await);
        assert!(cache.on_external_change(&FeedEvent::PostCreate {
            post: post.clone(),
            author_name: "Zed".into(),
        })
        .await);

        let feed = cache.feed().await;
        assert_eq!(feed[0].author_name, "Zed");

        assert!(cache.on_external_change(&FeedEvent::PostDelete { post_id }).await);
        assert!(!cache.on_external_change(&FeedEvent::PostDelete { post_id }).await);
        assert_eq!(cache.feed().await.len(), 1);
    }
}
