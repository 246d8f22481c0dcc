use anyhow::Result;
use rusqlite::Connection;
use stride_types::models::{Comment, MediaDescriptor, Post};
use uuid::Uuid;

use super::OptionalExt;
use crate::models::{CommentRow, PostRow};
use crate::{Database, now};

/// `?1` is the viewing user (or NULL), used for `liked_by_me`.
const POST_SELECT: &str = "
    SELECT p.id, p.author_id, u.username, p.content, p.category, p.media,
           (SELECT COUNT(*) FROM post_likes l WHERE l.post_id = p.id),
           (SELECT COUNT(*) FROM comments c WHERE c.post_id = p.id),
           EXISTS (SELECT 1 FROM post_likes l WHERE l.post_id = p.id AND l.user_id = ?1),
           p.created_at
    FROM posts p
    JOIN users u ON u.id = p.author_id";

impl Database {
    // -- Posts --

    pub fn create_post(
        &self,
        author_id: Uuid,
        content: &str,
        category: &str,
        media: Option<&MediaDescriptor>,
    ) -> Result<Post> {
        let id = Uuid::new_v4();
        let media = media.map(serde_json::to_string).transpose()?;
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO posts (id, author_id, content, category, media, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    id.to_string(),
                    author_id.to_string(),
                    content.trim(),
                    category.trim(),
                    media,
                    now(),
                ],
            )?;
            query_post(conn, Some(author_id), id)?
                .ok_or_else(|| anyhow::anyhow!("Post vanished after insert: {}", id))
        })
    }

    /// Newest posts first, optionally restricted to one category.
    pub fn list_posts(&self, viewer: Uuid, category: Option<&str>, limit: u32) -> Result<Vec<Post>> {
        self.with_conn(|conn| {
            let sql = format!(
                "{} WHERE (?2 IS NULL OR p.category = ?2)
                 ORDER BY p.created_at DESC, p.rowid DESC
                 LIMIT ?3",
                POST_SELECT
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(
                    rusqlite::params![viewer.to_string(), category, limit],
                    read_post_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.into_iter().map(PostRow::into_post).collect()
        })
    }

    /// `viewer = None` renders the post as seen by nobody in particular, as
    /// used for broadcasts.
    pub fn get_post(&self, viewer: Option<Uuid>, post_id: Uuid) -> Result<Option<Post>> {
        self.with_conn(|conn| query_post(conn, viewer, post_id))
    }

    /// Deletes a post if `author_id` wrote it.
    pub fn delete_post(&self, author_id: Uuid, post_id: Uuid) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "DELETE FROM posts WHERE id = ?1 AND author_id = ?2",
                (post_id.to_string(), author_id.to_string()),
            )?;
            Ok(n > 0)
        })
    }

    /// Toggle a like: removes if exists, inserts if not.
    /// Returns `None` if the post does not exist, otherwise whether the post is
    /// now liked and its refreshed state.
    pub fn toggle_like(&self, user_id: Uuid, post_id: Uuid) -> Result<Option<(bool, Post)>> {
        self.with_conn_mut(|conn| {
            if !post_exists(conn, post_id)? {
                return Ok(None);
            }

            let removed = conn.execute(
                "DELETE FROM post_likes WHERE post_id = ?1 AND user_id = ?2",
                (post_id.to_string(), user_id.to_string()),
            )?;
            let liked = removed == 0;
            if liked {
                conn.execute(
                    "INSERT INTO post_likes (post_id, user_id, created_at) VALUES (?1, ?2, ?3)",
                    (post_id.to_string(), user_id.to_string(), now()),
                )?;
            }

            let post = query_post(conn, Some(user_id), post_id)?
                .ok_or_else(|| anyhow::anyhow!("Post vanished during like: {}", post_id))?;
            Ok(Some((liked, post)))
        })
    }

    // -- Comments --

    pub fn add_comment(&self, author_id: Uuid, post_id: Uuid, content: &str) -> Result<Option<Comment>> {
        self.with_conn_mut(|conn| {
            if !post_exists(conn, post_id)? {
                return Ok(None);
            }
            let id = Uuid::new_v4();
            conn.execute(
                "INSERT INTO comments (id, post_id, author_id, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                (id.to_string(), post_id.to_string(), author_id.to_string(), content.trim(), now()),
            )?;
            query_comments(conn, post_id, Some(id))?
                .pop()
                .map(Some)
                .ok_or_else(|| anyhow::anyhow!("Comment vanished after insert: {}", id))
        })
    }

    /// Comments on a post, oldest first.
    pub fn list_comments(&self, post_id: Uuid) -> Result<Vec<Comment>> {
        self.with_conn(|conn| query_comments(conn, post_id, None))
    }
}

fn post_exists(conn: &Connection, post_id: Uuid) -> Result<bool> {
    Ok(conn
        .query_row("SELECT 1 FROM posts WHERE id = ?1", [post_id.to_string()], |_| Ok(()))
        .optional()?
        .is_some())
}

fn read_post_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PostRow> {
    Ok(PostRow {
        id: row.get(0)?,
        author_id: row.get(1)?,
        author_username: row.get(2)?,
        content: row.get(3)?,
        category: row.get(4)?,
        media: row.get(5)?,
        like_count: row.get(6)?,
        comment_count: row.get(7)?,
        liked_by_me: row.get(8)?,
        created_at: row.get(9)?,
    })
}

fn query_post(conn: &Connection, viewer: Option<Uuid>, post_id: Uuid) -> Result<Option<Post>> {
    let sql = format!("{} WHERE p.id = ?2", POST_SELECT);
    let mut stmt = conn.prepare(&sql)?;
    stmt.query_row(
        (viewer.map(|v| v.to_string()), post_id.to_string()),
        read_post_row,
    )
    .optional()?
    .map(PostRow::into_post)
    .transpose()
}

fn query_comments(conn: &Connection, post_id: Uuid, only: Option<Uuid>) -> Result<Vec<Comment>> {
    let mut stmt = conn.prepare(
        "SELECT c.id, c.post_id, c.author_id, u.username, c.content, c.created_at
         FROM comments c
         JOIN users u ON u.id = c.author_id
         WHERE c.post_id = ?1 AND (?2 IS NULL OR c.id = ?2)
         ORDER BY c.created_at, c.rowid",
    )?;
    let rows = stmt
        .query_map((post_id.to_string(), only.map(|id| id.to_string())), |row| {
            Ok(CommentRow {
                id: row.get(0)?,
                post_id: row.get(1)?,
                author_id: row.get(2)?,
                author_username: row.get(3)?,
                content: row.get(4)?,
                created_at: row.get(5)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    rows.into_iter().map(CommentRow::into_comment).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::test_support::{db, user};

    #[test]
    fn new_post_lands_on_top_with_zero_counters() {
        let db = db();
        let author = user(&db, "lena");
        db.create_post(author, "Leg day", "Strength", None).unwrap();
        let post = db.create_post(author, "Morning run done!", "Running", None).unwrap();

        assert_eq!(post.like_count, 0);
        assert_eq!(post.comment_count, 0);
        assert_eq!(post.author_username, "lena");

        let feed = db.list_posts(author, None, 20).unwrap();
        assert_eq!(feed.len(), 2);
        assert_eq!(feed[0].id, post.id);
        assert_eq!(feed[0].content, "Morning run done!");
        assert_eq!(feed[0].category, "Running");
    }

    #[test]
    fn category_filter_and_limit() {
        let db = db();
        let author = user(&db, "lena");
        for i in 0..3 {
            db.create_post(author, &format!("run {}", i), "Running", None).unwrap();
        }
        db.create_post(author, "squats", "Strength", None).unwrap();

        assert_eq!(db.list_posts(author, Some("Running"), 20).unwrap().len(), 3);
        assert_eq!(db.list_posts(author, Some("Strength"), 20).unwrap().len(), 1);
        assert_eq!(db.list_posts(author, None, 2).unwrap().len(), 2);
    }

    #[test]
    fn like_toggles_and_tracks_viewer() {
        let db = db();
        let author = user(&db, "lena");
        let fan = user(&db, "omar");
        let post = db.create_post(author, "PR on deadlift", "Strength", None).unwrap();

        let (liked, after) = db.toggle_like(fan, post.id).unwrap().unwrap();
        assert!(liked);
        assert_eq!(after.like_count, 1);
        assert!(after.liked_by_me);

        let as_author = db.get_post(Some(author), post.id).unwrap().unwrap();
        assert!(!as_author.liked_by_me);
        assert_eq!(as_author.like_count, 1);

        let (liked, after) = db.toggle_like(fan, post.id).unwrap().unwrap();
        assert!(!liked);
        assert_eq!(after.like_count, 0);

        assert!(db.toggle_like(fan, Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn comments_count_and_order() {
        let db = db();
        let author = user(&db, "lena");
        let fan = user(&db, "omar");
        let post = db.create_post(author, "5k", "Running", None).unwrap();

        let first = db.add_comment(fan, post.id, "nice").unwrap().unwrap();
        db.add_comment(author, post.id, "thanks").unwrap().unwrap();

        let comments = db.list_comments(post.id).unwrap();
        assert_eq!(comments.len(), 2);
        assert_eq!(comments[0].id, first.id);
        assert_eq!(comments[0].author_username, "omar");
        assert_eq!(db.get_post(None, post.id).unwrap().unwrap().comment_count, 2);
        assert!(db.add_comment(fan, Uuid::new_v4(), "?").unwrap().is_none());
    }

    #[test]
    fn only_author_deletes() {
        let db = db();
        let author = user(&db, "lena");
        let other = user(&db, "omar");
        let post = db.create_post(author, "rest day", "", None).unwrap();
        assert!(!db.delete_post(other, post.id).unwrap());
        assert!(db.delete_post(author, post.id).unwrap());
        assert!(db.get_post(None, post.id).unwrap().is_none());
    }
}
