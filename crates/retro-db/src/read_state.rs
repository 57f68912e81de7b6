use std::collections::BTreeMap;

use anyhow::Result;
use rusqlite::types::ToSql;
use tracing::debug;

use retro_types::models::{MessageId, UserId};

use crate::messages::message_in_conversation;
use crate::models::ReadStateRow;
use crate::time::{format_time, parse_time_lossy};
use crate::{Database, OptionalExt, placeholders};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkReadOutcome {
    /// The watermark moved forward (or was created).
    Advanced,
    /// Unknown message, foreign conversation, or not past the watermark.
    Noop,
}

impl Database {
    /// Advance `owner`'s watermark in the conversation with `counterpart`
    /// to `message_id`.
    ///
    /// The watermark only ever moves forward: the update is a single upsert
    /// guarded by `excluded.id > current.id`, so duplicate, stale or
    /// reordered calls converge on the maximum. The recorded read time is
    /// the message's own timestamp.
    pub fn mark_read(
        &self,
        owner: UserId,
        counterpart: UserId,
        message_id: MessageId,
    ) -> Result<MarkReadOutcome> {
        self.with_conn_mut(|conn| {
            let Some(message) = message_in_conversation(conn, message_id, owner, counterpart)? else {
                debug!(
                    "mark_read ignored: message {} is not in conversation {}<->{}",
                    message_id, owner, counterpart
                );
                return Ok(MarkReadOutcome::Noop);
            };

            let changed = conn.execute(
                "INSERT INTO read_states (owner_id, counterpart_id, last_read_message_id, last_read_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (owner_id, counterpart_id) DO UPDATE SET
                     last_read_message_id = excluded.last_read_message_id,
                     last_read_at = excluded.last_read_at
                 WHERE excluded.last_read_message_id > read_states.last_read_message_id",
                rusqlite::params![owner, counterpart, message.id, format_time(message.created_at)],
            )?;

            Ok(if changed > 0 {
                MarkReadOutcome::Advanced
            } else {
                MarkReadOutcome::Noop
            })
        })
    }

    pub fn watermark(&self, owner: UserId, counterpart: UserId) -> Result<Option<ReadStateRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT owner_id, counterpart_id, last_read_message_id, last_read_at
                 FROM read_states WHERE owner_id = ?1 AND counterpart_id = ?2",
                [owner, counterpart],
                |row| {
                    let last_read_at: String = row.get(3)?;
                    Ok(ReadStateRow {
                        owner_id: row.get(0)?,
                        counterpart_id: row.get(1)?,
                        last_read_message_id: row.get(2)?,
                        last_read_at: parse_time_lossy(&last_read_at, "read state"),
                    })
                },
            )
            .optional()
        })
    }

    /// Unread messages per counterpart: messages the counterpart sent to
    /// `owner` above the owner's watermark (all of them when no watermark
    /// exists).
    ///
    /// With `counterparts`, exactly those ids are reported, zero-filled.
    /// Without, every user who ever messaged `owner` is reported.
    pub fn unread_counts(
        &self,
        owner: UserId,
        counterparts: Option<&[UserId]>,
    ) -> Result<BTreeMap<UserId, i64>> {
        if counterparts.is_some_and(|ids| ids.is_empty()) {
            return Ok(BTreeMap::new());
        }

        let filter = match counterparts {
            Some(ids) => format!("AND m.sender_id IN ({})", placeholders(2, ids.len())),
            None => String::new(),
        };
        let sql = format!(
            "SELECT m.sender_id,
                    SUM(CASE WHEN m.id > COALESCE(r.last_read_message_id, 0) THEN 1 ELSE 0 END)
             FROM messages m
             LEFT JOIN read_states r
                 ON r.owner_id = m.receiver_id AND r.counterpart_id = m.sender_id
             WHERE m.receiver_id = ?1
               AND m.sender_id <> ?1
               {}
             GROUP BY m.sender_id",
            filter
        );

        let mut counts = self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let mut params: Vec<&dyn ToSql> = vec![&owner as &dyn ToSql];
            if let Some(ids) = counterparts {
                params.extend(ids.iter().map(|id| id as &dyn ToSql));
            }

            let rows = stmt
                .query_map(params.as_slice(), |row| Ok((row.get::<_, UserId>(0)?, row.get::<_, i64>(1)?)))?
                .collect::<std::result::Result<BTreeMap<_, _>, _>>()?;
            Ok::<_, anyhow::Error>(rows)
        })?;

        if let Some(ids) = counterparts {
            for id in ids {
                counts.entry(*id).or_insert(0);
            }
        }

        Ok(counts)
    }

    /// Sum of [`Database::unread_counts`] over every counterpart.
    pub fn total_unread(&self, owner: UserId) -> Result<i64> {
        self.with_conn(|conn| {
            let total = conn.query_row(
                "SELECT COUNT(*)
                 FROM messages m
                 LEFT JOIN read_states r
                     ON r.owner_id = m.receiver_id AND r.counterpart_id = m.sender_id
                 WHERE m.receiver_id = ?1
                   AND m.sender_id <> ?1
                   AND m.id > COALESCE(r.last_read_message_id, 0)",
                [owner],
                |row| row.get(0),
            )?;
            Ok(total)
        })
    }
}
