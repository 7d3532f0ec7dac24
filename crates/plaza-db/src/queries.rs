use std::collections::HashMap;

use anyhow::Result;
use rusqlite::{Connection, ErrorCode, OptionalExtension};
use uuid::Uuid;

use crate::Database;
use crate::models::{UserRow, parse_id};

/// Fields accepted when creating a user. Values are already validated.
pub struct NewUser<'a> {
    pub id: Uuid,
    pub name: &'a str,
    pub email: &'a str,
    pub password_hash: &'a str,
    pub bio: Option<&'a str>,
}

impl Database {
    // -- Users --

    /// Returns `false` when the email is already registered.
    pub fn create_user(&self, user: &NewUser<'_>) -> Result<bool> {
        let now = chrono::Utc::now().timestamp_millis();
        self.with_conn_mut(|conn| {
            let inserted = conn.execute(
                "INSERT INTO users (id, name, email, password, bio, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    user.id.to_string(),
                    user.name,
                    user.email,
                    user.password_hash,
                    user.bio,
                    now
                ],
            );

            match inserted {
                Ok(_) => Ok(true),
                Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                    Ok(false)
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email", email))
    }

    pub fn get_user_by_id(&self, id: Uuid) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", &id.to_string()))
    }

    /// Update mutable profile fields. `bio: Some(None)` clears the bio.
    /// Returns the updated row, or `None` if the user does not exist.
    pub fn update_profile(
        &self,
        id: Uuid,
        name: Option<&str>,
        bio: Option<Option<&str>>,
    ) -> Result<Option<UserRow>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let id = id.to_string();

            if let Some(name) = name {
                tx.execute("UPDATE users SET name = ?1 WHERE id = ?2", (name, &id))?;
            }
            if let Some(bio) = bio {
                tx.execute("UPDATE users SET bio = ?1 WHERE id = ?2", (bio, &id))?;
            }

            let row = query_user(&tx, "id", &id)?;
            tx.commit()?;
            Ok(row)
        })
    }

    /// Batch-resolve display names. Unknown ids are simply absent.
    pub fn user_names(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, String>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        self.with_conn(|conn| query_user_names(conn, ids))
    }
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let sql = format!(
        "SELECT id, name, email, password, bio, created_at FROM users WHERE {} = ?1",
        column
    );
    let mut stmt = conn.prepare(&sql)?;

    let row = stmt
        .query_row([value], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                name: row.get(1)?,
                email: row.get(2)?,
                password: row.get(3)?,
                bio: row.get(4)?,
                created_at: row.get(5)?,
            })
        })
        .optional()?;

    Ok(row)
}

pub(crate) fn query_user_names(conn: &Connection, ids: &[Uuid]) -> Result<HashMap<Uuid, String>> {
    let ids: Vec<String> = ids.iter().map(Uuid::to_string).collect();
    let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{}", i)).collect();
    let sql = format!(
        "SELECT id, name FROM users WHERE id IN ({})",
        placeholders.join(", ")
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(ids.iter()), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(id, name)| -> Result<(Uuid, String)> { Ok((parse_id(&id, "user")?, name)) })
        .collect()
}
