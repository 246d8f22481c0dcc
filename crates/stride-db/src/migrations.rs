use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id              TEXT PRIMARY KEY,
            username        TEXT NOT NULL UNIQUE,
            password        TEXT NOT NULL,
            display_name    TEXT NOT NULL,
            bio             TEXT NOT NULL DEFAULT '',
            fitness_level   TEXT NOT NULL DEFAULT 'beginner',
            interests       TEXT NOT NULL DEFAULT '[]',
            onboarded       INTEGER NOT NULL DEFAULT 0,
            created_at      TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS goals (
            id                  TEXT PRIMARY KEY,
            owner_id            TEXT NOT NULL REFERENCES users(id),
            title               TEXT NOT NULL,
            description         TEXT NOT NULL DEFAULT '',
            category            TEXT NOT NULL DEFAULT '',
            frequency           TEXT NOT NULL,
            target_check_ins    INTEGER NOT NULL,
            completed_check_ins INTEGER NOT NULL DEFAULT 0,
            status              TEXT NOT NULL DEFAULT 'active',
            created_at          TEXT NOT NULL,
            completed_at        TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_goals_owner
            ON goals(owner_id, status);

        CREATE TABLE IF NOT EXISTS check_ins (
            id          TEXT PRIMARY KEY,
            goal_id     TEXT NOT NULL REFERENCES goals(id) ON DELETE CASCADE,
            user_id     TEXT NOT NULL REFERENCES users(id),
            period      TEXT NOT NULL,
            note        TEXT,
            created_at  TEXT NOT NULL,
            UNIQUE(goal_id, period)
        );

        CREATE TABLE IF NOT EXISTS posts (
            id          TEXT PRIMARY KEY,
            author_id   TEXT NOT NULL REFERENCES users(id),
            content     TEXT NOT NULL,
            category    TEXT NOT NULL DEFAULT '',
            media       TEXT,
            created_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_posts_created
            ON posts(created_at);

        CREATE TABLE IF NOT EXISTS post_likes (
            post_id     TEXT NOT NULL REFERENCES posts(id) ON DELETE CASCADE,
            user_id     TEXT NOT NULL REFERENCES users(id),
            created_at  TEXT NOT NULL,
            PRIMARY KEY (post_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS comments (
            id          TEXT PRIMARY KEY,
            post_id     TEXT NOT NULL REFERENCES posts(id) ON DELETE CASCADE,
            author_id   TEXT NOT NULL REFERENCES users(id),
            content     TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS partner_connections (
            id              TEXT PRIMARY KEY,
            requester_id    TEXT NOT NULL REFERENCES users(id),
            recipient_id    TEXT NOT NULL REFERENCES users(id),
            status          TEXT NOT NULL DEFAULT 'PENDING',
            created_at      TEXT NOT NULL,
            responded_at    TEXT,
            CHECK (requester_id != recipient_id)
        );

        CREATE INDEX IF NOT EXISTS idx_partners_recipient
            ON partner_connections(recipient_id, status);

        CREATE TABLE IF NOT EXISTS conversations (
            id          TEXT PRIMARY KEY,
            kind        TEXT NOT NULL,
            name        TEXT NOT NULL DEFAULT '',
            created_by  TEXT NOT NULL REFERENCES users(id),
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS conversation_members (
            conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
            user_id         TEXT NOT NULL REFERENCES users(id),
            pinned          INTEGER NOT NULL DEFAULT 0,
            muted           INTEGER NOT NULL DEFAULT 0,
            last_read_at    TEXT,
            joined_at       TEXT NOT NULL,
            PRIMARY KEY (conversation_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_members_user
            ON conversation_members(user_id);

        CREATE TABLE IF NOT EXISTS messages (
            id              TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
            sender_id       TEXT NOT NULL REFERENCES users(id),
            text            TEXT,
            media           TEXT,
            status          TEXT NOT NULL DEFAULT 'sent',
            created_at      TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, created_at);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
