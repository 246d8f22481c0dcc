use anyhow::Result;
use rusqlite::Connection;
use stride_types::api::UpdateProfileRequest;
use stride_types::models::UserProfile;
use uuid::Uuid;

use super::OptionalExt;
use crate::models::UserRow;
use crate::{Database, now};

const USER_COLUMNS: &str =
    "id, username, password, display_name, bio, fitness_level, interests, onboarded, created_at";

impl Database {
    // -- Users --

    pub fn create_user(
        &self,
        id: Uuid,
        username: &str,
        password_hash: &str,
        display_name: &str,
    ) -> Result<UserProfile> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, password, display_name, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                (id.to_string(), username, password_hash, display_name, now()),
            )?;
            query_user(conn, "id", &id.to_string())?
                .ok_or_else(|| anyhow::anyhow!("User vanished after insert: {}", id))?
                .into_profile()
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username", username))
    }

    pub fn get_user_by_id(&self, id: Uuid) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", &id.to_string()))
    }

    pub fn get_profile(&self, id: Uuid) -> Result<Option<UserProfile>> {
        self.get_user_by_id(id)?.map(UserRow::into_profile).transpose()
    }

    /// Applies the provided fields and marks the user as onboarded.
    pub fn update_profile(&self, id: Uuid, req: &UpdateProfileRequest) -> Result<Option<UserProfile>> {
        self.with_conn_mut(|conn| {
            let Some(row) = query_user(conn, "id", &id.to_string())? else {
                return Ok(None);
            };
            let mut profile = row.into_profile()?;

            if let Some(display_name) = &req.display_name {
                profile.display_name = display_name.trim().to_string();
            }
            if let Some(bio) = &req.bio {
                profile.bio = bio.clone();
            }
            if let Some(level) = req.fitness_level {
                profile.fitness_level = level;
            }
            if let Some(interests) = &req.interests {
                profile.interests = normalize_interests(interests);
            }
            profile.onboarded = true;

            conn.execute(
                "UPDATE users SET display_name = ?2, bio = ?3, fitness_level = ?4,
                        interests = ?5, onboarded = 1
                 WHERE id = ?1",
                rusqlite::params![
                    id.to_string(),
                    profile.display_name,
                    profile.bio,
                    profile.fitness_level.as_str(),
                    serde_json::to_string(&profile.interests)?,
                ],
            )?;
            Ok(Some(profile))
        })
    }

    pub fn user_exists(&self, id: Uuid) -> Result<bool> {
        self.with_conn(|conn| user_exists(conn, id))
    }
}

/// Lowercased, trimmed, deduplicated interest tags in first-seen order.
fn normalize_interests(raw: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(raw.len());
    for tag in raw {
        let tag = tag.trim().to_lowercase();
        if !tag.is_empty() && !out.contains(&tag) {
            out.push(tag);
        }
    }
    out
}

pub(crate) fn user_exists(conn: &Connection, id: Uuid) -> Result<bool> {
    Ok(conn
        .query_row("SELECT 1 FROM users WHERE id = ?1", [id.to_string()], |_| Ok(()))
        .optional()?
        .is_some())
}

pub(crate) fn read_user_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        password: row.get(2)?,
        display_name: row.get(3)?,
        bio: row.get(4)?,
        fitness_level: row.get(5)?,
        interests: row.get(6)?,
        onboarded: row.get(7)?,
        created_at: row.get(8)?,
    })
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let sql = format!("SELECT {} FROM users WHERE {} = ?1", USER_COLUMNS, column);
    let mut stmt = conn.prepare(&sql)?;
    stmt.query_row([value], read_user_row).optional()
}

pub(crate) fn user_columns(alias: &str) -> String {
    USER_COLUMNS
        .split(", ")
        .map(|c| format!("{}.{}", alias, c))
        .collect::<Vec<_>>()
        .join(", ")
}
