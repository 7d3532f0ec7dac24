use std::collections::HashMap;

use anyhow::Result;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, warn};
use uuid::Uuid;

use plaza_types::models::{Comment, Post};
use plaza_types::reactions::{Emoji, ReactionMap, Toggle};
use plaza_types::validate::{CommentDraft, PostDraft};

use crate::Database;
use crate::models::{CommentRow, PostRow, ReactionRow, parse_id, timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
    Forbidden,
}

impl Database {
    // -- Posts --

    /// Store a validated post. The timestamp is taken from the server clock.
    pub fn create_post(&self, author_id: Uuid, draft: &PostDraft) -> Result<Post> {
        let id = Uuid::new_v4();
        let created_ms = Utc::now().timestamp_millis();

        let seq = self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO posts (id, author_id, content, image, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    id.to_string(),
                    author_id.to_string(),
                    draft.content(),
                    draft.image(),
                    created_ms
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })?;

        Ok(Post {
            id,
            author_id,
            content: draft.content().to_string(),
            image: draft.image().map(str::to_string),
            created_at: timestamp(created_ms)?,
            seq,
            reactions: ReactionMap::new(),
            comments: vec![],
        })
    }

    pub fn get_post(&self, id: Uuid) -> Result<Option<Post>> {
        self.with_conn(|conn| {
            let rows = query_posts(conn, "WHERE id = ?1", &[id.to_string()])?;
            Ok(hydrate(conn, rows)?.pop())
        })
    }

    /// The raw feed, newest first.
    pub fn list_all_posts(&self) -> Result<Vec<Post>> {
        self.with_conn(|conn| {
            let rows = query_posts(conn, "", &[])?;
            hydrate(conn, rows)
        })
    }

    pub fn list_posts_by_author(&self, author_id: Uuid) -> Result<Vec<Post>> {
        self.with_conn(|conn| {
            let rows = query_posts(conn, "WHERE author_id = ?1", &[author_id.to_string()])?;
            hydrate(conn, rows)
        })
    }

    /// Remove a post together with its comments and reactions, in one transaction.
    pub fn delete_post(&self, id: Uuid, requester: Uuid) -> Result<DeleteOutcome> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let pid = id.to_string();

            let author: Option<String> = tx
                .query_row("SELECT author_id FROM posts WHERE id = ?1", [&pid], |row| row.get(0))
                .optional()?;

            let Some(author) = author else {
                return Ok(DeleteOutcome::NotFound);
            };
            if parse_id(&author, "user")? != requester {
                return Ok(DeleteOutcome::Forbidden);
            }

            let comments = tx.execute("DELETE FROM comments WHERE post_id = ?1", [&pid])?;
            let reactions = tx.execute("DELETE FROM reactions WHERE post_id = ?1", [&pid])?;
            tx.execute("DELETE FROM posts WHERE id = ?1", [&pid])?;
            tx.commit()?;

            debug!(
                "Deleted post {} ({} comments, {} reactions)",
                id, comments, reactions
            );
            Ok(DeleteOutcome::Deleted)
        })
    }

    // -- Reactions --

    /// Toggle `user_id`'s reaction on a post and persist the resulting map.
    ///
    /// The existence check, read, and write share one transaction. All of the
    /// user's rows are rewritten, which also repairs rows left by an older,
    /// non-exclusive writer. Returns `None` if the post does not exist.
    pub fn toggle_reaction(
        &self,
        post_id: Uuid,
        user_id: Uuid,
        emoji: Emoji,
    ) -> Result<Option<(Toggle, ReactionMap)>> {
        let now = Utc::now().timestamp_millis();

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let pid = post_id.to_string();
            let uid = user_id.to_string();

            if !post_exists(&tx, &pid)? {
                return Ok(None);
            }

            let mut map = load_reactions(&tx, &pid)?;
            let toggle = map.toggle(user_id, emoji);

            tx.execute(
                "DELETE FROM reactions WHERE post_id = ?1 AND user_id = ?2",
                (&pid, &uid),
            )?;
            if let Some(current) = toggle.current() {
                tx.execute(
                    "INSERT INTO reactions (post_id, user_id, emoji, created_at) VALUES (?1, ?2, ?3, ?4)",
                    rusqlite::params![pid, uid, current.name(), now],
                )?;
            }
            tx.commit()?;

            Ok(Some((toggle, map)))
        })
    }

    // -- Comments --

    /// Append a comment. Returns `None` if the post does not exist at the
    /// moment of the append.
    pub fn append_comment(
        &self,
        post_id: Uuid,
        author_id: Uuid,
        draft: &CommentDraft,
    ) -> Result<Option<Comment>> {
        let id = Uuid::new_v4();
        let created_ms = Utc::now().timestamp_millis();

        let seq = self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let pid = post_id.to_string();

            if !post_exists(&tx, &pid)? {
                return Ok(None);
            }

            tx.execute(
                "INSERT INTO comments (id, post_id, author_id, content, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![id.to_string(), pid, author_id.to_string(), draft.content(), created_ms],
            )?;
            let seq = tx.last_insert_rowid();
            tx.commit()?;
            Ok(Some(seq))
        })?;

        let Some(seq) = seq else {
            return Ok(None);
        };

        Ok(Some(Comment {
            id,
            post_id,
            author_id,
            content: draft.content().to_string(),
            created_at: timestamp(created_ms)?,
            seq,
        }))
    }

    /// Comments in insertion order, or `None` if the post does not exist.
    pub fn list_comments(&self, post_id: Uuid) -> Result<Option<Vec<Comment>>> {
        self.with_conn(|conn| {
            let pid = post_id.to_string();
            if !post_exists(conn, &pid)? {
                return Ok(None);
            }
            let rows = query_comments(conn, &[pid])?;
            let comments = rows.iter().map(comment_from_row).collect::<Result<Vec<_>>>()?;
            Ok(Some(comments))
        })
    }
}

fn post_exists(conn: &Connection, pid: &str) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM posts WHERE id = ?1", [pid], |row| row.get(0))
        .optional()?;
    Ok(found.is_some())
}

fn query_posts(conn: &Connection, filter: &str, args: &[String]) -> Result<Vec<PostRow>> {
    let sql = format!(
        "SELECT seq, id, author_id, content, image, created_at
         FROM posts
         {}
         ORDER BY created_at DESC, seq DESC",
        filter
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(args.iter()), |row| {
            Ok(PostRow {
                seq: row.get(0)?,
                id: row.get(1)?,
                author_id: row.get(2)?,
                content: row.get(3)?,
                image: row.get(4)?,
                created_at: row.get(5)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn placeholders(n: usize) -> String {
    (1..=n).map(|i| format!("?{}", i)).collect::<Vec<_>>().join(", ")
}

fn query_reactions(conn: &Connection, post_ids: &[String]) -> Result<Vec<ReactionRow>> {
    if post_ids.is_empty() {
        return Ok(vec![]);
    }

    let sql = format!(
        "SELECT post_id, user_id, emoji FROM reactions WHERE post_id IN ({})",
        placeholders(post_ids.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(post_ids.iter()), |row| {
            Ok(ReactionRow {
                post_id: row.get(0)?,
                user_id: row.get(1)?,
                emoji: row.get(2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn query_comments(conn: &Connection, post_ids: &[String]) -> Result<Vec<CommentRow>> {
    if post_ids.is_empty() {
        return Ok(vec![]);
    }

    let sql = format!(
        "SELECT seq, id, post_id, author_id, content, created_at
         FROM comments
         WHERE post_id IN ({})
         ORDER BY seq ASC",
        placeholders(post_ids.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(post_ids.iter()), |row| {
            Ok(CommentRow {
                seq: row.get(0)?,
                id: row.get(1)?,
                post_id: row.get(2)?,
                author_id: row.get(3)?,
                content: row.get(4)?,
                created_at: row.get(5)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn load_reactions(conn: &Connection, pid: &str) -> Result<ReactionMap> {
    let rows = query_reactions(conn, &[pid.to_string()])?;
    let mut map = ReactionMap::new();
    for row in &rows {
        if let Some((emoji, user_id)) = reaction_from_row(row)? {
            map.insert_raw(emoji, user_id);
        }
    }
    Ok(map)
}

/// Rows with an emoji outside the supported set are skipped.
fn reaction_from_row(row: &ReactionRow) -> Result<Option<(Emoji, Uuid)>> {
    let user_id = parse_id(&row.user_id, "user")?;
    match row.emoji.parse::<Emoji>() {
        Ok(emoji) => Ok(Some((emoji, user_id))),
        Err(e) => {
            warn!("Skipping stored reaction on post {}: {}", row.post_id, e);
            Ok(None)
        }
    }
}

fn comment_from_row(row: &CommentRow) -> Result<Comment> {
    Ok(Comment {
        id: parse_id(&row.id, "comment")?,
        post_id: parse_id(&row.post_id, "post")?,
        author_id: parse_id(&row.author_id, "user")?,
        content: row.content.clone(),
        created_at: timestamp(row.created_at)?,
        seq: row.seq,
    })
}

/// Attach reactions and comments to post rows, preserving row order.
fn hydrate(conn: &Connection, rows: Vec<PostRow>) -> Result<Vec<Post>> {
    let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();

    let mut reactions: HashMap<String, ReactionMap> = HashMap::new();
    for row in query_reactions(conn, &ids)? {
        if let Some((emoji, user_id)) = reaction_from_row(&row)? {
            reactions
                .entry(row.post_id)
                .or_default()
                .insert_raw(emoji, user_id);
        }
    }

    let mut comments: HashMap<String, Vec<Comment>> = HashMap::new();
    for row in query_comments(conn, &ids)? {
        let comment = comment_from_row(&row)?;
        comments.entry(row.post_id).or_default().push(comment);
    }

    rows.into_iter()
        .map(|row| -> Result<Post> {
            Ok(Post {
                id: parse_id(&row.id, "post")?,
                author_id: parse_id(&row.author_id, "user")?,
                content: row.content,
                image: row.image,
                created_at: timestamp(row.created_at)?,
                seq: row.seq,
                reactions: reactions.remove(&row.id).unwrap_or_default(),
                comments: comments.remove(&row.id).unwrap_or_default(),
            })
        })
        .collect()
}
