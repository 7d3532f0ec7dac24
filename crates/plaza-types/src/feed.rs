use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::models::Post;
use crate::reactions::Emoji;

pub const UNKNOWN_AUTHOR: &str = "Unknown User";

/// A post annotated for display from one requester's point of view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedItem {
    #[serde(flatten)]
    pub post: Post,
    pub author_name: String,
    /// Display names of everyone who commented, keyed by user id.
    pub comment_authors: BTreeMap<Uuid, String>,
    pub reaction_counts: BTreeMap<Emoji, usize>,
    pub total_reactions: usize,
    pub user_reaction: Option<Emoji>,
    pub comment_count: usize,
}

/// Newest first; equal timestamps fall back to the later insert first.
pub fn feed_order(a: &Post, b: &Post) -> Ordering {
    b.created_at
        .cmp(&a.created_at)
        .then_with(|| b.seq.cmp(&a.seq))
}

pub fn sort_posts(posts: &mut [Post]) {
    posts.sort_by(feed_order);
}

/// Order `posts` for display and annotate each for `requester`.
///
/// `authors` maps user ids to display names for post and comment authors.
pub fn build_feed(
    mut posts: Vec<Post>,
    authors: &HashMap<Uuid, String>,
    requester: Uuid,
) -> Vec<FeedItem> {
    sort_posts(&mut posts);
    posts
        .into_iter()
        .map(|post| annotate(post, authors, requester))
        .collect()
}

pub fn annotate(post: Post, authors: &HashMap<Uuid, String>, requester: Uuid) -> FeedItem {
    let author_name = resolve(authors, post.author_id);
    let comment_authors = post
        .comments
        .iter()
        .map(|c| (c.author_id, resolve(authors, c.author_id)))
        .collect();

    let reaction_counts = post.reactions.counts();
    let total_reactions = reaction_counts.values().sum();
    let user_reaction = post.reactions.reaction_of(requester);
    let comment_count = post.comments.len();

    FeedItem {
        post,
        author_name,
        comment_authors,
        reaction_counts,
        total_reactions,
        user_reaction,
        comment_count,
    }
}

fn resolve(authors: &HashMap<Uuid, String>, id: Uuid) -> String {
    authors.get(&id).cloned().unwrap_or_else(|| {
        warn!("No display name for author {}", id);
        UNKNOWN_AUTHOR.to_string()
    })
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};

    use super::*;
    use crate::models::Comment;
    use crate::reactions::ReactionMap;

    fn at(ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(ms).unwrap()
    }

    fn post(author: Uuid, content: &str, ms: i64, seq: i64) -> Post {
        Post {
            id: Uuid::new_v4(),
            author_id: author,
            content: content.into(),
            image: None,
            created_at: at(ms),
            seq,
            reactions: ReactionMap::new(),
            comments: vec![],
        }
    }

    #[test]
    fn newest_first_and_stable() {
        let a = Uuid::new_v4();
        let names = HashMap::from([(a, "Ada".to_string())]);
        let posts = vec![
            post(a, "t1", 1_000, 1),
            post(a, "t3", 3_000, 3),
            post(a, "t2", 2_000, 2),
        ];

        for _ in 0..3 {
            let feed = build_feed(posts.clone(), &names, a);
            let order: Vec<_> = feed.iter().map(|f| f.post.content.as_str()).collect();
            assert_eq!(order, ["t3", "t2", "t1"]);
        }
    }

    #[test]
    fn same_millisecond_never_swaps() {
        let a = Uuid::new_v4();
        let names = HashMap::new();
        let first = post(a, "first", 5_000, 10);
        let second = post(a, "second", 5_000, 11);

        let one = build_feed(vec![first.clone(), second.clone()], &names, a);
        let two = build_feed(vec![second, first], &names, a);
        fn order(feed: &[FeedItem]) -> Vec<String> {
            feed.iter().map(|f| f.post.content.clone()).collect()
        }
        assert_eq!(order(&one), ["second", "first"]);
        assert_eq!(order(&one), order(&two));
    }

    #[test]
    fn annotations() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        let names = HashMap::from([(a, "Ada".to_string()), (b, "Bob".to_string())]);

        let mut p = post(a, "hello", 1_000, 1);
        p.reactions.toggle(b, Emoji::Love);
        p.reactions.toggle(c, Emoji::Love);
        p.reactions.toggle(a, Emoji::Haha);
        p.comments.push(Comment {
            id: Uuid::new_v4(),
            post_id: p.id,
            author_id: c,
            content: "hi".into(),
            created_at: at(2_000),
            seq: 1,
        });

        let item = annotate(p, &names, b);
        assert_eq!(item.author_name, "Ada");
        assert_eq!(item.total_reactions, 3);
        assert_eq!(
            item.reaction_counts,
            BTreeMap::from([(Emoji::Love, 2), (Emoji::Haha, 1)])
        );
        assert_eq!(item.user_reaction, Some(Emoji::Love));
        assert_eq!(item.comment_count, 1);
        assert_eq!(item.comment_authors[&c], UNKNOWN_AUTHOR);
    }

    #[test]
    fn empty_post_summary() {
        let a = Uuid::new_v4();
        let item = annotate(post(a, "hello", 0, 1), &HashMap::new(), a);
        assert_eq!(item.total_reactions, 0);
        assert!(item.reaction_counts.is_empty());
        assert_eq!(item.user_reaction, None);
        assert_eq!(item.comment_count, 0);

        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["content"], "hello");
        let back: FeedItem = serde_json::from_value(json).unwrap();
        assert_eq!(back, item);
    }
}
