use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::debug;

use retro_types::error::{AppError, AppResult};
use retro_types::models::{MessageId, UserId};

use crate::models::{InboxHeadRow, MessageRow, user_summary_at};
use crate::social::are_connected;
use crate::time::{format_time, now_text, parse_time_lossy};
use crate::users::user_exists;
use crate::{Database, OptionalExt};

pub const DEFAULT_MAX_MESSAGE_LEN: usize = 2000;

/// Rules applied to every direct-message exchange.
#[derive(Debug, Clone, Copy)]
pub struct MessagePolicy {
    /// Maximum content length in characters, after trimming.
    pub max_len: usize,
    /// Whether a user may hold a conversation with themself.
    pub allow_self: bool,
}

impl Default for MessagePolicy {
    fn default() -> Self {
        Self {
            max_len: DEFAULT_MAX_MESSAGE_LEN,
            allow_self: true,
        }
    }
}

impl Database {
    /// Append a message to the log. Content is trimmed; validation happens
    /// before anything is written.
    pub fn append_message(
        &self,
        sender: UserId,
        receiver: UserId,
        content: &str,
        policy: &MessagePolicy,
    ) -> AppResult<MessageRow> {
        let content = content.trim();
        if content.is_empty() {
            return Err(AppError::validation("message content is empty"));
        }
        if content.chars().count() > policy.max_len {
            return Err(AppError::validation(format!(
                "message content exceeds {} characters",
                policy.max_len
            )));
        }

        self.with_conn_mut(|conn| {
            check_pair(conn, sender, receiver, policy)?;
            Ok(insert_message(conn, sender, receiver, content)?)
        })
    }

    /// Fails unless `user` may exchange messages with `counterpart`.
    pub fn authorize_conversation(
        &self,
        user: UserId,
        counterpart: UserId,
        policy: &MessagePolicy,
    ) -> AppResult<()> {
        self.with_conn(|conn| check_pair(conn, user, counterpart, policy))
    }

    /// All messages between the pair with `id > after` (everything when
    /// `after` is `None`), ascending by id.
    pub fn messages_since(
        &self,
        a: UserId,
        b: UserId,
        after: Option<MessageId>,
    ) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, sender_id, receiver_id, content, created_at
                 FROM messages
                 WHERE ((sender_id = ?1 AND receiver_id = ?2)
                     OR (sender_id = ?2 AND receiver_id = ?1))
                   AND (?3 IS NULL OR id > ?3)
                 ORDER BY id ASC",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![a, b, after], MessageRow::from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Newest message in the conversation, optionally no later than `at`.
    pub fn latest_message_id(
        &self,
        a: UserId,
        b: UserId,
        at_or_before: Option<DateTime<Utc>>,
    ) -> Result<Option<MessageId>> {
        let at_or_before = at_or_before.map(format_time);
        self.with_conn(|conn| {
            let id = conn
                .query_row(
                    "SELECT MAX(id) FROM messages
                     WHERE ((sender_id = ?1 AND receiver_id = ?2)
                         OR (sender_id = ?2 AND receiver_id = ?1))
                       AND (?3 IS NULL OR created_at <= ?3)",
                    rusqlite::params![a, b, at_or_before],
                    |row| row.get::<_, Option<MessageId>>(0),
                )?;
            Ok(id)
        })
    }

    /// For every other user who messaged `owner` after `since`, their most
    /// recent such message. Newest first.
    pub fn inbox_heads(&self, owner: UserId, since: Option<DateTime<Utc>>) -> Result<Vec<InboxHeadRow>> {
        let since = since.map(format_time);
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT m.id, m.sender_id, m.receiver_id, m.content, m.created_at,
                        u.id, u.username, u.display_name, u.avatar_url
                 FROM messages m
                 JOIN (
                     SELECT sender_id, MAX(id) AS head_id
                     FROM messages
                     WHERE receiver_id = ?1
                       AND sender_id <> ?1
                       AND (?2 IS NULL OR created_at > ?2)
                     GROUP BY sender_id
                 ) heads ON heads.head_id = m.id
                 JOIN users u ON u.id = m.sender_id
                 ORDER BY m.created_at DESC, m.id DESC",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![owner, since], |row| {
                    Ok(InboxHeadRow {
                        message: MessageRow::from_row(row)?,
                        sender: user_summary_at(row, 5)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn check_pair(conn: &Connection, user: UserId, counterpart: UserId, policy: &MessagePolicy) -> AppResult<()> {
    if user == counterpart {
        return if policy.allow_self {
            Ok(())
        } else {
            Err(AppError::unauthorized("messaging yourself is disabled"))
        };
    }

    if !user_exists(conn, counterpart)? {
        return Err(AppError::not_found(format!("user {}", counterpart)));
    }

    if !are_connected(conn, user, counterpart)? {
        return Err(AppError::unauthorized(
            "messages are only allowed between followers and followees",
        ));
    }

    Ok(())
}

fn insert_message(conn: &Connection, sender: UserId, receiver: UserId, content: &str) -> Result<MessageRow> {
    // Timestamp taken under the writer lock, so time order matches id order.
    let created_at = now_text();
    conn.execute(
        "INSERT INTO messages (sender_id, receiver_id, content, created_at) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![sender, receiver, content, created_at],
    )?;
    let id = conn.last_insert_rowid();
    debug!("Message {} appended ({} -> {})", id, sender, receiver);

    Ok(MessageRow {
        id,
        sender_id: sender,
        receiver_id: receiver,
        content: content.to_string(),
        created_at: parse_time_lossy(&created_at, "new message"),
    })
}

/// The message, if it belongs to the conversation between `a` and `b`.
pub(crate) fn message_in_conversation(
    conn: &Connection,
    id: MessageId,
    a: UserId,
    b: UserId,
) -> Result<Option<MessageRow>> {
    conn.query_row(
        "SELECT id, sender_id, receiver_id, content, created_at
         FROM messages
         WHERE id = ?1
           AND ((sender_id = ?2 AND receiver_id = ?3)
             OR (sender_id = ?3 AND receiver_id = ?2))",
        rusqlite::params![id, a, b],
        MessageRow::from_row,
    )
    .optional()
}
