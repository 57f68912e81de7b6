use std::collections::HashMap;

use anyhow::Result;
use rusqlite::Connection;
use rusqlite::types::ToSql;
use tracing::debug;

use retro_types::api::ReactionSummary;
use retro_types::error::{AppError, AppResult};
use retro_types::models::{ReactionKind, TargetType, UserId};

use crate::time::now_text;
use crate::{Database, OptionalExt, placeholders};

impl Database {
    /// Toggle `user`'s reaction on a target.
    ///
    /// Submitting the value already stored clears it; anything else upserts,
    /// which also flips an opposite reaction in place. The read and the
    /// write run in one transaction under the writer lock, so double
    /// submissions on the same key are serialized and the table keeps at
    /// most one row per (target, user).
    ///
    /// Returns the user's reaction after the toggle.
    pub fn set_reaction(
        &self,
        target_type: TargetType,
        target_id: i64,
        user: UserId,
        kind: ReactionKind,
    ) -> AppResult<Option<ReactionKind>> {
        self.with_conn_mut(|conn| {
            if !target_exists(conn, target_type, target_id)? {
                return Err(AppError::not_found(format!("{} {}", target_type, target_id)));
            }
            Ok(toggle(conn, target_type, target_id, user, kind)?)
        })
    }

    /// Like/dislike totals for every id in `target_ids`, recomputed from the
    /// reactions table in one grouped query. Ids without reactions come back
    /// as zeroes. `viewer`'s own reaction is filled in when given.
    pub fn reaction_summaries(
        &self,
        target_type: TargetType,
        target_ids: &[i64],
        viewer: Option<UserId>,
    ) -> Result<HashMap<i64, ReactionSummary>> {
        if target_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let sql = format!(
            "SELECT target_id,
                    SUM(CASE WHEN value = 1 THEN 1 ELSE 0 END),
                    SUM(CASE WHEN value = -1 THEN 1 ELSE 0 END),
                    MAX(CASE WHEN user_id = ?2 THEN value END)
             FROM reactions
             WHERE target_type = ?1 AND target_id IN ({})
             GROUP BY target_id",
            placeholders(3, target_ids.len())
        );

        let mut summaries = self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let kind = target_type.as_db_str();
            let mut params: Vec<&dyn ToSql> = vec![&kind as &dyn ToSql, &viewer as &dyn ToSql];
            params.extend(target_ids.iter().map(|id| id as &dyn ToSql));

            let rows = stmt
                .query_map(params.as_slice(), |row| {
                    let own: Option<i64> = row.get(3)?;
                    Ok((
                        row.get::<_, i64>(0)?,
                        ReactionSummary {
                            likes: row.get(1)?,
                            dislikes: row.get(2)?,
                            user_reaction: own.and_then(ReactionKind::from_value),
                        },
                    ))
                })?
                .collect::<std::result::Result<HashMap<_, _>, _>>()?;
            Ok::<_, anyhow::Error>(rows)
        })?;

        for id in target_ids {
            summaries.entry(*id).or_default();
        }

        Ok(summaries)
    }

    pub fn reaction_summary(
        &self,
        target_type: TargetType,
        target_id: i64,
        viewer: Option<UserId>,
    ) -> Result<ReactionSummary> {
        let mut summaries = self.reaction_summaries(target_type, &[target_id], viewer)?;
        Ok(summaries.remove(&target_id).unwrap_or_default())
    }
}

fn target_exists(conn: &Connection, target_type: TargetType, target_id: i64) -> Result<bool> {
    let sql = format!("SELECT 1 FROM {} WHERE id = ?1", target_type.table());
    let found = conn.query_row(&sql, [target_id], |_| Ok(())).optional()?;
    Ok(found.is_some())
}

fn toggle(
    conn: &Connection,
    target_type: TargetType,
    target_id: i64,
    user: UserId,
    kind: ReactionKind,
) -> Result<Option<ReactionKind>> {
    let tx = conn.unchecked_transaction()?;

    let current: Option<i64> = tx
        .query_row(
            "SELECT value FROM reactions WHERE target_type = ?1 AND target_id = ?2 AND user_id = ?3",
            rusqlite::params![target_type.as_db_str(), target_id, user],
            |row| row.get(0),
        )
        .optional()?;

    let result = if current == Some(kind.value()) {
        tx.execute(
            "DELETE FROM reactions WHERE target_type = ?1 AND target_id = ?2 AND user_id = ?3",
            rusqlite::params![target_type.as_db_str(), target_id, user],
        )?;
        None
    } else {
        tx.execute(
            "INSERT INTO reactions (target_type, target_id, user_id, value, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (target_type, target_id, user_id) DO UPDATE SET
                 value = excluded.value,
                 updated_at = excluded.updated_at",
            rusqlite::params![target_type.as_db_str(), target_id, user, kind.value(), now_text()],
        )?;
        Some(kind)
    };

    tx.commit()?;
    debug!("Reaction on {} {} by {} -> {:?}", target_type, target_id, user, result);
    Ok(result)
}
