use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (social graph, messages, read state)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                username        TEXT NOT NULL UNIQUE,
                display_name    TEXT NOT NULL DEFAULT '',
                avatar_url      TEXT NOT NULL DEFAULT '',
                created_at      TEXT NOT NULL
            );

            CREATE TABLE follows (
                follower_id     INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                followee_id     INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                created_at      TEXT NOT NULL,
                PRIMARY KEY (follower_id, followee_id),
                CHECK (follower_id <> followee_id)
            );

            CREATE INDEX idx_follows_followee
                ON follows(followee_id, created_at);

            -- AUTOINCREMENT: ids are never reused, so `id > after` is a
            -- complete new-since filter.
            CREATE TABLE messages (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                sender_id       INTEGER NOT NULL REFERENCES users(id),
                receiver_id     INTEGER NOT NULL REFERENCES users(id),
                content         TEXT NOT NULL,
                created_at      TEXT NOT NULL
            );

            CREATE INDEX idx_messages_inbox
                ON messages(receiver_id, sender_id, id);
            CREATE INDEX idx_messages_outbox
                ON messages(sender_id, receiver_id, id);

            CREATE TABLE read_states (
                owner_id                INTEGER NOT NULL REFERENCES users(id),
                counterpart_id          INTEGER NOT NULL REFERENCES users(id),
                last_read_message_id    INTEGER NOT NULL REFERENCES messages(id),
                last_read_at            TEXT NOT NULL,
                PRIMARY KEY (owner_id, counterpart_id)
            );

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    if version < 2 {
        info!("Running migration v2 (catalog, reactions, activity)");
        conn.execute_batch(
            "
            CREATE TABLE albums (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                owner_id        INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                title           TEXT NOT NULL,
                artist          TEXT NOT NULL,
                cover_url       TEXT NOT NULL DEFAULT '',
                created_at      TEXT NOT NULL
            );

            CREATE INDEX idx_albums_signature
                ON albums(lower(title), lower(artist));

            CREATE TABLE reviews (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id         INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                album_id        INTEGER NOT NULL REFERENCES albums(id) ON DELETE CASCADE,
                rating          INTEGER NOT NULL CHECK (rating BETWEEN 1 AND 5),
                content         TEXT NOT NULL,
                created_at      TEXT NOT NULL,
                updated_at      TEXT NOT NULL,
                UNIQUE (user_id, album_id)
            );

            CREATE INDEX idx_reviews_album
                ON reviews(album_id, created_at);

            CREATE TABLE comments (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                review_id       INTEGER NOT NULL REFERENCES reviews(id) ON DELETE CASCADE,
                user_id         INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                content         TEXT NOT NULL,
                created_at      TEXT NOT NULL
            );

            CREATE TABLE reactions (
                target_type     TEXT NOT NULL CHECK (target_type IN ('review', 'comment')),
                target_id       INTEGER NOT NULL,
                user_id         INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                value           INTEGER NOT NULL CHECK (value IN (1, -1)),
                updated_at      TEXT NOT NULL,
                PRIMARY KEY (target_type, target_id, user_id)
            );

            CREATE TABLE activities (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                actor_id        INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                verb            TEXT NOT NULL,
                object_type     TEXT NOT NULL,
                object_id       INTEGER NOT NULL,
                target_user_id  INTEGER REFERENCES users(id) ON DELETE SET NULL,
                created_at      TEXT NOT NULL
            );

            CREATE INDEX idx_activities_actor
                ON activities(actor_id, created_at, id);

            INSERT INTO schema_version (version) VALUES (2);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
