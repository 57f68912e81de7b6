//! Database row types. These map directly to SQLite rows and are kept
//! distinct from the wire types in `retro-types::api`.

use chrono::{DateTime, Utc};
use rusqlite::Row;

use retro_types::api::AlbumResponse;
use retro_types::models::{FeedCursor, MessageId, ObjectType, UserId, UserSummary, Verb};

use crate::time::parse_time_lossy;

pub struct UserRow {
    pub id: UserId,
    pub username: String,
    pub display_name: String,
    pub avatar_url: String,
    pub created_at: DateTime<Utc>,
}

impl UserRow {
    pub fn summary(&self) -> UserSummary {
        UserSummary {
            id: self.id,
            username: self.username.clone(),
            display_name: self.display_name.clone(),
            avatar_url: self.avatar_url.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl MessageRow {
    /// Columns: id, sender_id, receiver_id, content, created_at.
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let id: MessageId = row.get(0)?;
        let created_at: String = row.get(4)?;
        Ok(Self {
            id,
            sender_id: row.get(1)?,
            receiver_id: row.get(2)?,
            content: row.get(3)?,
            created_at: parse_time_lossy(&created_at, &format!("message {}", id)),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadStateRow {
    pub owner_id: UserId,
    pub counterpart_id: UserId,
    pub last_read_message_id: MessageId,
    pub last_read_at: DateTime<Utc>,
}

pub struct AlbumRow {
    pub id: i64,
    pub owner_id: UserId,
    pub title: String,
    pub artist: String,
    pub cover_url: String,
    pub created_at: DateTime<Utc>,
}

impl AlbumRow {
    /// Columns: id, owner_id, title, artist, cover_url, created_at.
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let id: i64 = row.get(0)?;
        let created_at: String = row.get(5)?;
        Ok(Self {
            id,
            owner_id: row.get(1)?,
            title: row.get(2)?,
            artist: row.get(3)?,
            cover_url: row.get(4)?,
            created_at: parse_time_lossy(&created_at, &format!("album {}", id)),
        })
    }

    pub fn to_response(&self) -> AlbumResponse {
        AlbumResponse {
            id: self.id,
            owner_id: self.owner_id,
            title: self.title.clone(),
            artist: self.artist.clone(),
            cover_url: self.cover_url.clone(),
            created_at: self.created_at,
        }
    }
}

pub struct ReviewRow {
    pub id: i64,
    pub user_id: UserId,
    pub album_id: i64,
    pub rating: i64,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

pub struct CommentRow {
    pub id: i64,
    pub review_id: i64,
    pub user_id: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

pub struct ActivityRow {
    pub id: i64,
    pub actor: UserSummary,
    pub verb: Verb,
    pub object_type: ObjectType,
    pub object_id: i64,
    pub target_user_id: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

/// One page of activity. `next_cursor` comes from the last row the query
/// returned, so rows skipped while decoding never end a walk early.
pub struct ActivityPage {
    pub rows: Vec<ActivityRow>,
    pub next_cursor: Option<FeedCursor>,
}

pub struct FollowerRow {
    pub user: UserSummary,
    pub followed_at: DateTime<Utc>,
}

/// Read `id, username, display_name, avatar_url` starting at `offset`.
pub(crate) fn user_summary_at(row: &Row<'_>, offset: usize) -> rusqlite::Result<UserSummary> {
    Ok(UserSummary {
        id: row.get(offset)?,
        username: row.get(offset + 1)?,
        display_name: row.get(offset + 2)?,
        avatar_url: row.get(offset + 3)?,
    })
}

/// Most recent message a sender has sent to the inbox owner.
pub struct InboxHeadRow {
    pub sender: UserSummary,
    pub message: MessageRow,
}
