use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id            TEXT PRIMARY KEY,
            username      TEXT NOT NULL UNIQUE,
            display_name  TEXT NOT NULL,
            avatar        TEXT,
            password      TEXT NOT NULL,
            created_at    TEXT NOT NULL
        );

        -- pair_key is set for direct conversations: the two user ids, sorted,
        -- joined with ':'. Its UNIQUE constraint arbitrates create races.
        CREATE TABLE IF NOT EXISTS conversations (
            id               TEXT PRIMARY KEY,
            pair_key         TEXT UNIQUE,
            created_at       TEXT NOT NULL,
            last_message_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS participants (
            conversation_id  TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
            user_id          TEXT NOT NULL REFERENCES users(id),
            role             TEXT NOT NULL DEFAULT 'member',
            joined_at        TEXT NOT NULL,
            PRIMARY KEY (conversation_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_participants_user
            ON participants(user_id);

        -- forwarded_from_id is deliberately not a foreign key: forwarded
        -- copies outlive the original.
        CREATE TABLE IF NOT EXISTS messages (
            id                 TEXT PRIMARY KEY,
            conversation_id    TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
            sender_id          TEXT NOT NULL REFERENCES users(id),
            content            TEXT NOT NULL,
            image              TEXT,
            edited             INTEGER NOT NULL DEFAULT 0,
            forwarded_from_id  TEXT,
            created_at         TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, created_at);

        CREATE TABLE IF NOT EXISTS message_seen (
            message_id  TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
            user_id     TEXT NOT NULL REFERENCES users(id),
            seen_at     TEXT NOT NULL,
            PRIMARY KEY (message_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS reactions (
            id          TEXT PRIMARY KEY,
            message_id  TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
            user_id     TEXT NOT NULL REFERENCES users(id),
            emoji       TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            UNIQUE(message_id, user_id, emoji)
        );

        CREATE INDEX IF NOT EXISTS idx_reactions_message
            ON reactions(message_id);

        CREATE TABLE IF NOT EXISTS pinned_messages (
            id               TEXT PRIMARY KEY,
            conversation_id  TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
            message_id       TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
            pinned_by_id     TEXT NOT NULL REFERENCES users(id),
            created_at       TEXT NOT NULL,
            UNIQUE(conversation_id, message_id)
        );
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
