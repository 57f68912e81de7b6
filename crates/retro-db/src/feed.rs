use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::warn;

use retro_types::api::{FeedEntry, FeedPage};
use retro_types::error::{AppError, AppResult};
use retro_types::models::{FeedCursor, ObjectType, TargetType, UserId, Verb};

use crate::Database;
use crate::models::{ActivityPage, ActivityRow, user_summary_at};
use crate::time::{format_time, parse_time_lossy};

pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const MAX_PAGE_SIZE: usize = 100;

/// Append an entry to the activity log. Called inside the transaction that
/// writes the object itself, with the same timestamp.
pub(crate) fn record_activity(
    conn: &Connection,
    actor: UserId,
    verb: Verb,
    object_type: ObjectType,
    object_id: i64,
    target_user: Option<UserId>,
    created_at: &str,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO activities (actor_id, verb, object_type, object_id, target_user_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            actor,
            verb.as_db_str(),
            object_type.as_db_str(),
            object_id,
            target_user,
            created_at
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Build a cursor from the two query parameters. Both or neither must be
/// present.
pub fn parse_cursor(cursor_time: Option<&str>, cursor_id: Option<i64>) -> AppResult<Option<FeedCursor>> {
    match (cursor_time, cursor_id) {
        (None, None) => Ok(None),
        (Some(time), Some(id)) => {
            let created_at = DateTime::parse_from_rfc3339(time)
                .map_err(|e| AppError::validation(format!("invalid cursor_time '{}': {}", time, e)))?
                .with_timezone(&Utc);
            Ok(Some(FeedCursor { created_at, id }))
        }
        _ => Err(AppError::validation("cursor_time and cursor_id must be given together")),
    }
}

pub fn page_size(limit: Option<u32>) -> usize {
    limit
        .map(|l| (l as usize).clamp(1, MAX_PAGE_SIZE))
        .unwrap_or(DEFAULT_PAGE_SIZE)
}

/// Raw row before the verb/object columns are decoded.
struct RawActivity {
    id: i64,
    verb: String,
    object_type: String,
    object_id: i64,
    target_user_id: Option<UserId>,
    created_at: String,
    actor: retro_types::models::UserSummary,
}

impl Database {
    /// One page of `viewer`'s feed: activity by everyone they follow plus
    /// their own, newest first by `(created_at, id)`.
    ///
    /// Pagination is keyset-based. With a cursor only entries strictly
    /// below it in tuple order are returned, so inserts made while a client
    /// walks the pages never shift or repeat entries.
    pub fn activity_page(&self, viewer: UserId, cursor: Option<FeedCursor>, limit: usize) -> Result<ActivityPage> {
        let cursor_time = cursor.map(|c| format_time(c.created_at));
        let cursor_id = cursor.map(|c| c.id);

        let raw = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT a.id, a.verb, a.object_type, a.object_id, a.target_user_id, a.created_at,
                        u.id, u.username, u.display_name, u.avatar_url
                 FROM activities a
                 JOIN users u ON u.id = a.actor_id
                 WHERE a.actor_id IN (
                     SELECT followee_id FROM follows WHERE follower_id = ?1
                     UNION
                     SELECT ?1
                 )
                   AND (?2 IS NULL OR (a.created_at, a.id) < (?2, ?3))
                 ORDER BY a.created_at DESC, a.id DESC
                 LIMIT ?4",
            )?;
            let rows = stmt
                .query_map(
                    rusqlite::params![viewer, cursor_time, cursor_id, limit as i64],
                    |row| {
                        Ok(RawActivity {
                            id: row.get(0)?,
                            verb: row.get(1)?,
                            object_type: row.get(2)?,
                            object_id: row.get(3)?,
                            target_user_id: row.get(4)?,
                            created_at: row.get(5)?,
                            actor: user_summary_at(row, 6)?,
                        })
                    },
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok::<_, anyhow::Error>(rows)
        })?;

        let next_cursor = if raw.len() == limit {
            raw.last().map(|r| FeedCursor {
                created_at: parse_time_lossy(&r.created_at, &format!("activity {}", r.id)),
                id: r.id,
            })
        } else {
            None
        };

        Ok(ActivityPage {
            rows: raw.into_iter().filter_map(decode_activity).collect(),
            next_cursor,
        })
    }

    /// [`Database::activity_page`] with reaction totals attached: one
    /// batched tally per target type for the whole page.
    pub fn feed(&self, viewer: UserId, cursor: Option<FeedCursor>, limit: usize) -> Result<FeedPage> {
        let ActivityPage { rows, next_cursor } = self.activity_page(viewer, cursor, limit)?;

        let mut targets: HashMap<TargetType, Vec<i64>> = HashMap::new();
        for row in &rows {
            if let Some(target) = row.object_type.reaction_target() {
                targets.entry(target).or_default().push(row.object_id);
            }
        }

        let mut tallies = HashMap::new();
        for (target, ids) in &targets {
            tallies.insert(*target, self.reaction_summaries(*target, ids, Some(viewer))?);
        }

        let entries = rows
            .into_iter()
            .map(|row| {
                let reactions = row
                    .object_type
                    .reaction_target()
                    .and_then(|t| tallies.get(&t))
                    .and_then(|m| m.get(&row.object_id))
                    .copied();
                FeedEntry {
                    id: row.id,
                    actor: row.actor,
                    verb: row.verb,
                    object_type: row.object_type,
                    object_id: row.object_id,
                    target_user_id: row.target_user_id,
                    created_at: row.created_at,
                    reactions,
                }
            })
            .collect();

        Ok(FeedPage { entries, next_cursor })
    }
}

fn decode_activity(raw: RawActivity) -> Option<ActivityRow> {
    let verb = raw
        .verb
        .parse::<Verb>()
        .map_err(|e| warn!("Skipping activity {}: {}", raw.id, e))
        .ok()?;
    let object_type = raw
        .object_type
        .parse::<ObjectType>()
        .map_err(|e| warn!("Skipping activity {}: {}", raw.id, e))
        .ok()?;

    Some(ActivityRow {
        id: raw.id,
        actor: raw.actor,
        verb,
        object_type,
        object_id: raw.object_id,
        target_user_id: raw.target_user_id,
        created_at: parse_time_lossy(&raw.created_at, &format!("activity {}", raw.id)),
    })
}
