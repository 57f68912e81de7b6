use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::debug;

use retro_types::error::{AppError, AppResult};
use retro_types::models::{ObjectType, UserId, UserSummary, Verb};

use crate::feed::record_activity;
use crate::models::{FollowerRow, user_summary_at};
use crate::time::{format_time, now_text, parse_time_lossy};
use crate::users::user_exists;
use crate::{Database, OptionalExt};

impl Database {
    /// Create the `follower -> followee` edge. Returns `false` when the edge
    /// already existed. The first follow of a pair also lands in the feed;
    /// unfollow/refollow cycles do not repeat it.
    pub fn follow(&self, follower: UserId, followee: UserId) -> AppResult<bool> {
        if follower == followee {
            return Err(AppError::validation("cannot follow yourself"));
        }

        self.with_conn_mut(|conn| {
            if !user_exists(conn, followee)? {
                return Err(AppError::not_found(format!("user {}", followee)));
            }
            Ok(insert_follow(conn, follower, followee)?)
        })
    }

    /// Remove the edge. Returns `false` when there was nothing to remove.
    pub fn unfollow(&self, follower: UserId, followee: UserId) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let removed = conn.execute(
                "DELETE FROM follows WHERE follower_id = ?1 AND followee_id = ?2",
                [follower, followee],
            )?;
            Ok(removed > 0)
        })
    }

    /// Users `user` follows.
    pub fn following(&self, user: UserId) -> Result<Vec<UserId>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT followee_id FROM follows WHERE follower_id = ?1 ORDER BY followee_id",
            )?;
            let ids = stmt
                .query_map([user], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(ids)
        })
    }

    /// Users following `user`.
    pub fn followers(&self, user: UserId) -> Result<Vec<UserId>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT follower_id FROM follows WHERE followee_id = ?1 ORDER BY follower_id",
            )?;
            let ids = stmt
                .query_map([user], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(ids)
        })
    }

    /// True when an edge exists in either direction.
    pub fn are_connected(&self, a: UserId, b: UserId) -> Result<bool> {
        self.with_conn(|conn| are_connected(conn, a, b))
    }

    /// Edges pointing at `user` created strictly after `since`, newest
    /// first. Without a checkpoint every follower is returned.
    pub fn new_followers(&self, user: UserId, since: Option<DateTime<Utc>>) -> Result<Vec<FollowerRow>> {
        let since = since.map(format_time);
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT u.id, u.username, u.display_name, u.avatar_url, f.created_at
                 FROM follows f
                 JOIN users u ON u.id = f.follower_id
                 WHERE f.followee_id = ?1
                   AND (?2 IS NULL OR f.created_at > ?2)
                 ORDER BY f.created_at DESC, u.id DESC",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![user, since], |row| {
                    let followed_at: String = row.get(4)?;
                    Ok(FollowerRow {
                        user: user_summary_at(row, 0)?,
                        followed_at: parse_time_lossy(&followed_at, "follow edge"),
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Everyone `user` may message: followers and followees, by username.
    pub fn contacts(&self, user: UserId) -> Result<Vec<UserSummary>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT u.id, u.username, u.display_name, u.avatar_url
                 FROM users u
                 WHERE u.id IN (
                     SELECT followee_id FROM follows WHERE follower_id = ?1
                     UNION
                     SELECT follower_id FROM follows WHERE followee_id = ?1
                 )
                 ORDER BY lower(u.username)",
            )?;
            let rows = stmt
                .query_map([user], |row| user_summary_at(row, 0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn insert_follow(conn: &Connection, follower: UserId, followee: UserId) -> Result<bool> {
    let tx = conn.unchecked_transaction()?;
    let now = now_text();

    let inserted = tx.execute(
        "INSERT OR IGNORE INTO follows (follower_id, followee_id, created_at) VALUES (?1, ?2, ?3)",
        rusqlite::params![follower, followee, now],
    )? == 1;

    if inserted {
        let announced = tx
            .query_row(
                "SELECT 1 FROM activities
                 WHERE actor_id = ?1 AND verb = ?2 AND target_user_id = ?3",
                rusqlite::params![follower, Verb::Follow.as_db_str(), followee],
                |_| Ok(()),
            )
            .optional()?
            .is_some();

        if !announced {
            record_activity(&tx, follower, Verb::Follow, ObjectType::User, followee, Some(followee), &now)?;
        }
        debug!("{} now follows {}", follower, followee);
    }

    tx.commit()?;
    Ok(inserted)
}

pub(crate) fn are_connected(conn: &Connection, a: UserId, b: UserId) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM follows
             WHERE (follower_id = ?1 AND followee_id = ?2)
                OR (follower_id = ?2 AND followee_id = ?1)
             LIMIT 1",
            [a, b],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}
