//! Database row types. These map directly to SQLite rows.
//! Distinct from plaza-types models to keep the DB layer independent.

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use plaza_types::models::UserProfile;

pub struct UserRow {
    pub id: String,
    pub name: String,
    pub email: String,
    pub password: String,
    pub bio: Option<String>,
    pub created_at: i64,
}

impl UserRow {
    pub fn user_id(&self) -> Result<Uuid> {
        parse_id(&self.id, "user")
    }

    pub fn profile(&self) -> Result<UserProfile> {
        Ok(UserProfile {
            id: self.user_id()?,
            name: self.name.clone(),
            email: self.email.clone(),
            bio: self.bio.clone(),
            created_at: timestamp(self.created_at)?,
        })
    }
}

pub struct PostRow {
    pub seq: i64,
    pub id: String,
    pub author_id: String,
    pub content: String,
    pub image: Option<String>,
    pub created_at: i64,
}

pub struct ReactionRow {
    pub post_id: String,
    pub user_id: String,
    pub emoji: String,
}

pub struct CommentRow {
    pub seq: i64,
    pub id: String,
    pub post_id: String,
    pub author_id: String,
    pub content: String,
    pub created_at: i64,
}

pub(crate) fn parse_id(raw: &str, what: &str) -> Result<Uuid> {
    raw.parse()
        .map_err(|e| anyhow!("Corrupt {} id '{}': {}", what, raw, e))
}

/// Timestamps are stored as Unix milliseconds.
pub(crate) fn timestamp(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| anyhow!("Corrupt timestamp {}", ms))
}
