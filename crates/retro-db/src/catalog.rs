use std::collections::HashSet;

use anyhow::Result;
use rusqlite::Connection;
use rusqlite::types::ToSql;
use tracing::{debug, info};

use retro_types::api::{AlbumOverview, ReviewView};
use retro_types::error::{AppError, AppResult};
use retro_types::models::{ObjectType, TargetType, UserId, Verb};

use crate::feed::record_activity;
use crate::models::{AlbumRow, CommentRow, ReviewRow, user_summary_at};
use crate::time::{now_text, parse_time_lossy};
use crate::{Database, OptionalExt, placeholders};

const MAX_TITLE_LEN: usize = 200;
const MAX_REVIEW_LEN: usize = 4000;
const MAX_COMMENT_LEN: usize = 600;

fn required_text<'a>(raw: &'a str, what: &str, max: usize) -> AppResult<&'a str> {
    let text = raw.trim();
    if text.is_empty() {
        return Err(AppError::validation(format!("{} is empty", what)));
    }
    if text.chars().count() > max {
        return Err(AppError::validation(format!("{} exceeds {} characters", what, max)));
    }
    Ok(text)
}

impl Database {
    pub fn create_album(&self, owner: UserId, title: &str, artist: &str, cover_url: &str) -> AppResult<AlbumRow> {
        let title = required_text(title, "title", MAX_TITLE_LEN)?;
        let artist = required_text(artist, "artist", MAX_TITLE_LEN)?;

        self.with_conn_mut(|conn| {
            let created_at = now_text();
            conn.execute(
                "INSERT INTO albums (owner_id, title, artist, cover_url, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![owner, title, artist, cover_url.trim(), created_at],
            )
            .map_err(anyhow::Error::from)?;

            Ok(AlbumRow {
                id: conn.last_insert_rowid(),
                owner_id: owner,
                title: title.to_string(),
                artist: artist.to_string(),
                cover_url: cover_url.trim().to_string(),
                created_at: parse_time_lossy(&created_at, "new album"),
            })
        })
    }

    /// Publish or rewrite `user`'s review of an album from their own
    /// collection. One review per (user, album); only the first publication
    /// lands in the feed. Returns the review and whether it was created.
    pub fn upsert_review(
        &self,
        user: UserId,
        album_id: i64,
        rating: i64,
        content: &str,
    ) -> AppResult<(ReviewRow, bool)> {
        if !(1..=5).contains(&rating) {
            return Err(AppError::validation("rating must be between 1 and 5"));
        }
        let content = required_text(content, "review", MAX_REVIEW_LEN)?;

        self.with_conn_mut(|conn| {
            let album = query_album(conn, album_id)?
                .ok_or_else(|| AppError::not_found(format!("album {}", album_id)))?;
            if album.owner_id != user {
                return Err(AppError::unauthorized("reviews are written for albums in your own collection"));
            }
            Ok(write_review(conn, user, album_id, rating, content)?)
        })
    }

    /// Copy another owner's album into `user`'s collection. When `user`
    /// already owns an album with the same (title, artist) signature, the
    /// source itself included, that copy is returned and nothing is written.
    /// Returns the copy and whether it was created.
    pub fn clone_album(&self, user: UserId, album_id: i64) -> AppResult<(AlbumRow, bool)> {
        self.with_conn_mut(|conn| {
            let source = query_album(conn, album_id)?
                .ok_or_else(|| AppError::not_found(format!("album {}", album_id)))?;
            if let Some(existing) = query_owned_copy(conn, user, &source.title, &source.artist)? {
                debug!("Album {} already in collection of {} as {}", album_id, user, existing.id);
                return Ok((existing, false));
            }

            let created_at = now_text();
            conn.execute(
                "INSERT INTO albums (owner_id, title, artist, cover_url, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![user, source.title, source.artist, source.cover_url, created_at],
            )
            .map_err(anyhow::Error::from)?;
            let id = conn.last_insert_rowid();
            info!("Album {} copied into collection of {} as {}", album_id, user, id);

            Ok((
                AlbumRow {
                    id,
                    owner_id: user,
                    title: source.title,
                    artist: source.artist,
                    cover_url: source.cover_url,
                    created_at: parse_time_lossy(&created_at, "cloned album"),
                },
                true,
            ))
        })
    }

    pub fn add_comment(&self, user: UserId, review_id: i64, content: &str) -> AppResult<CommentRow> {
        let content = required_text(content, "comment", MAX_COMMENT_LEN)?;

        self.with_conn_mut(|conn| {
            let author: Option<UserId> = conn
                .query_row("SELECT user_id FROM reviews WHERE id = ?1", [review_id], |row| row.get(0))
                .optional()?;
            let Some(author) = author else {
                return Err(AppError::not_found(format!("review {}", review_id)));
            };
            Ok(write_comment(conn, user, review_id, author, content)?)
        })
    }

    /// Cross-owner view of an album.
    ///
    /// Every per-owner copy sharing the album's case-insensitive
    /// (title, artist) signature collapses into the earliest-created copy.
    /// Reviews of all copies are pooled for the rating statistics, and their
    /// reaction totals are fetched in one batch. With a viewer, their own
    /// copy and review among the matches are picked out.
    pub fn album_overview(&self, album_id: i64, viewer: Option<UserId>) -> AppResult<AlbumOverview> {
        let (copies, reviews) = self.with_conn(|conn| {
            let album = query_album(conn, album_id)?
                .ok_or_else(|| AppError::not_found(format!("album {}", album_id)))?;
            let copies = query_copies(conn, &album)?;
            let ids: Vec<i64> = copies.iter().map(|a| a.id).collect();
            let reviews = query_reviews_for(conn, &ids)?;
            Ok::<_, AppError>((copies, reviews))
        })?;

        let canonical = copies
            .first()
            .ok_or_else(|| AppError::not_found(format!("album {}", album_id)))?;
        let requested = copies.iter().find(|a| a.id == album_id).unwrap_or(canonical);
        let cover_url = if requested.cover_url.is_empty() {
            copies
                .iter()
                .map(|a| a.cover_url.clone())
                .find(|c| !c.is_empty())
                .unwrap_or_default()
        } else {
            requested.cover_url.clone()
        };

        let review_ids: Vec<i64> = reviews.iter().map(|r| r.id).collect();
        let mut reactions = self.reaction_summaries(TargetType::Review, &review_ids, viewer)?;

        let avg_rating = if reviews.is_empty() {
            None
        } else {
            let sum: i64 = reviews.iter().map(|r| r.rating).sum();
            let avg = sum as f64 / reviews.len() as f64;
            Some((avg * 10.0).round() / 10.0)
        };
        let unique_reviewer_count = reviews.iter().map(|r| r.author.id).collect::<HashSet<_>>().len();

        let reviews: Vec<ReviewView> = reviews
            .into_iter()
            .map(|mut r| {
                r.reactions = reactions.remove(&r.id).unwrap_or_default();
                r
            })
            .collect();

        let user_album = viewer
            .and_then(|v| copies.iter().find(|a| a.owner_id == v))
            .map(AlbumRow::to_response);
        let user_review = viewer.and_then(|v| reviews.iter().find(|r| r.author.id == v)).cloned();

        Ok(AlbumOverview {
            album: canonical.to_response(),
            requested_album_id: album_id,
            copies: copies.len(),
            cover_url,
            avg_rating,
            review_count: reviews.len(),
            unique_reviewer_count,
            reviews,
            user_album,
            user_review,
        })
    }
}

fn query_album(conn: &Connection, id: i64) -> Result<Option<AlbumRow>> {
    conn.query_row(
        "SELECT id, owner_id, title, artist, cover_url, created_at FROM albums WHERE id = ?1",
        [id],
        AlbumRow::from_row,
    )
    .optional()
}

/// `owner`'s earliest album with the given signature.
fn query_owned_copy(conn: &Connection, owner: UserId, title: &str, artist: &str) -> Result<Option<AlbumRow>> {
    conn.query_row(
        "SELECT id, owner_id, title, artist, cover_url, created_at
         FROM albums
         WHERE owner_id = ?1 AND lower(title) = lower(?2) AND lower(artist) = lower(?3)
         ORDER BY created_at ASC, id ASC
         LIMIT 1",
        rusqlite::params![owner, title, artist],
        AlbumRow::from_row,
    )
    .optional()
}

/// All copies sharing the album's signature, earliest first.
fn query_copies(conn: &Connection, album: &AlbumRow) -> Result<Vec<AlbumRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, owner_id, title, artist, cover_url, created_at
         FROM albums
         WHERE lower(title) = lower(?1) AND lower(artist) = lower(?2)
         ORDER BY created_at ASC, id ASC",
    )?;
    let rows = stmt
        .query_map([&album.title, &album.artist], AlbumRow::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Reviews of the given albums with their authors, newest first.
/// Reaction totals are left zeroed for the caller to fill in.
fn query_reviews_for(conn: &Connection, album_ids: &[i64]) -> Result<Vec<ReviewView>> {
    let sql = format!(
        "SELECT r.id, r.album_id, r.rating, r.content, r.created_at,
                u.id, u.username, u.display_name, u.avatar_url
         FROM reviews r
         JOIN users u ON u.id = r.user_id
         WHERE r.album_id IN ({})
         ORDER BY r.created_at DESC, r.id DESC",
        placeholders(1, album_ids.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let params: Vec<&dyn ToSql> = album_ids.iter().map(|id| id as &dyn ToSql).collect();

    let rows = stmt
        .query_map(params.as_slice(), |row| {
            let id: i64 = row.get(0)?;
            let created_at: String = row.get(4)?;
            Ok(ReviewView {
                id,
                album_id: row.get(1)?,
                rating: row.get(2)?,
                content: row.get(3)?,
                created_at: parse_time_lossy(&created_at, &format!("review {}", id)),
                author: user_summary_at(row, 5)?,
                reactions: Default::default(),
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn write_review(conn: &Connection, user: UserId, album_id: i64, rating: i64, content: &str) -> Result<(ReviewRow, bool)> {
    let tx = conn.unchecked_transaction()?;
    let now = now_text();

    let existing: Option<(i64, String)> = tx
        .query_row(
            "SELECT id, created_at FROM reviews WHERE user_id = ?1 AND album_id = ?2",
            [user, album_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let (id, created_at, created) = match existing {
        Some((id, created_at)) => {
            tx.execute(
                "UPDATE reviews SET rating = ?1, content = ?2, updated_at = ?3 WHERE id = ?4",
                rusqlite::params![rating, content, now, id],
            )?;
            (id, created_at, false)
        }
        None => {
            tx.execute(
                "INSERT INTO reviews (user_id, album_id, rating, content, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                rusqlite::params![user, album_id, rating, content, now],
            )?;
            let id = tx.last_insert_rowid();
            record_activity(&tx, user, Verb::Review, ObjectType::Review, id, None, &now)?;
            (id, now.clone(), true)
        }
    };

    tx.commit()?;
    debug!("Review {} by {} ({})", id, user, if created { "created" } else { "updated" });

    Ok((
        ReviewRow {
            id,
            user_id: user,
            album_id,
            rating,
            content: content.to_string(),
            created_at: parse_time_lossy(&created_at, "review"),
        },
        created,
    ))
}

fn write_comment(conn: &Connection, user: UserId, review_id: i64, review_author: UserId, content: &str) -> Result<CommentRow> {
    let tx = conn.unchecked_transaction()?;
    let now = now_text();

    tx.execute(
        "INSERT INTO comments (review_id, user_id, content, created_at) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![review_id, user, content, now],
    )?;
    let id = tx.last_insert_rowid();
    record_activity(&tx, user, Verb::Comment, ObjectType::Comment, id, Some(review_author), &now)?;
    tx.commit()?;

    Ok(CommentRow {
        id,
        review_id,
        user_id: user,
        content: content.to_string(),
        created_at: parse_time_lossy(&now, "comment"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use retro_types::models::ReactionKind;

    #[test]
    fn review_validation_happens_before_writes() {
        let db = testing::db();
        let ana = testing::user(&db, "ana");
        let bia = testing::user(&db, "bia");
        let album = db.create_album(ana, "Construção", "Chico Buarque", "").unwrap();

        assert!(matches!(db.upsert_review(ana, album.id, 6, "ok"), Err(AppError::Validation(_))));
        assert!(matches!(db.upsert_review(ana, album.id, 3, "  "), Err(AppError::Validation(_))));
        assert!(matches!(db.upsert_review(bia, album.id, 3, "ok"), Err(AppError::Unauthorized(_))));
        assert!(matches!(db.upsert_review(ana, 999, 3, "ok"), Err(AppError::NotFound(_))));
        assert!(matches!(db.create_album(ana, "", "x", ""), Err(AppError::Validation(_))));
    }

    #[test]
    fn second_review_updates_in_place() {
        let db = testing::db();
        let ana = testing::user(&db, "ana");
        let album = db.create_album(ana, "Construção", "Chico Buarque", "").unwrap();

        let (first, created) = db.upsert_review(ana, album.id, 3, "bom").unwrap();
        assert!(created);
        let (second, created) = db.upsert_review(ana, album.id, 5, "genial").unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);
        assert_eq!(second.created_at, first.created_at);

        let overview = db.album_overview(album.id, None).unwrap();
        assert_eq!(overview.review_count, 1);
        assert_eq!(overview.reviews[0].content, "genial");
    }

    #[test]
    fn comments_need_an_existing_review() {
        let db = testing::db();
        let ana = testing::user(&db, "ana");
        assert!(matches!(db.add_comment(ana, 1, "hm"), Err(AppError::NotFound(_))));

        let album = db.create_album(ana, "Tropicália", "Vários", "").unwrap();
        let (review, _) = db.upsert_review(ana, album.id, 4, "histórico").unwrap();
        let long = "x".repeat(601);
        assert!(matches!(db.add_comment(ana, review.id, &long), Err(AppError::Validation(_))));
        assert_eq!(db.add_comment(ana, review.id, " legal ").unwrap().content, "legal");
    }

    #[test]
    fn overview_collapses_copies_to_earliest() {
        let db = testing::db();
        let ana = testing::user(&db, "ana");
        let bia = testing::user(&db, "bia");
        let caio = testing::user(&db, "caio");

        let original = db.create_album(ana, "Transa", "Caetano Veloso", "").unwrap();
        let copy = db.create_album(bia, "TRANSA", "caetano veloso", "covers/transa.jpg").unwrap();
        let other = db.create_album(caio, "Transa", "Someone Else", "").unwrap();

        let (r1, _) = db.upsert_review(ana, original.id, 4, "lindo").unwrap();
        db.upsert_review(bia, copy.id, 5, "perfeito").unwrap();
        db.upsert_review(caio, other.id, 1, "different record").unwrap();
        db.set_reaction(TargetType::Review, r1.id, bia, ReactionKind::Like).unwrap();

        let overview = db.album_overview(copy.id, Some(bia)).unwrap();
        assert_eq!(overview.album.id, original.id);
        assert_eq!(overview.requested_album_id, copy.id);
        assert_eq!(overview.copies, 2);
        assert_eq!(overview.cover_url, "covers/transa.jpg");
        assert_eq!(overview.review_count, 2);
        assert_eq!(overview.unique_reviewer_count, 2);
        assert_eq!(overview.avg_rating, Some(4.5));

        let liked = overview.reviews.iter().find(|r| r.id == r1.id).unwrap();
        assert_eq!(liked.reactions.likes, 1);
        assert_eq!(liked.reactions.user_reaction, Some(ReactionKind::Like));

        // Requested from the canonical copy, the cover falls back to the first copy with one.
        let from_original = db.album_overview(original.id, None).unwrap();
        assert_eq!(from_original.cover_url, "covers/transa.jpg");
    }

    #[test]
    fn overview_picks_out_the_viewers_copy_and_review() {
        let db = testing::db();
        let ana = testing::user(&db, "ana");
        let bia = testing::user(&db, "bia");
        let caio = testing::user(&db, "caio");

        let original = db.create_album(ana, "Fa-Tal", "Gal Costa", "").unwrap();
        db.upsert_review(ana, original.id, 5, "ao vivo").unwrap();
        let (copy, _) = db.clone_album(bia, original.id).unwrap();
        let (review, _) = db.upsert_review(bia, copy.id, 4, "lindo").unwrap();

        let overview = db.album_overview(original.id, Some(bia)).unwrap();
        assert_eq!(overview.user_album.as_ref().map(|a| a.id), Some(copy.id));
        assert_eq!(overview.user_review.as_ref().map(|r| r.id), Some(review.id));

        let outsider = db.album_overview(original.id, Some(caio)).unwrap();
        assert!(outsider.user_album.is_none());
        assert!(outsider.user_review.is_none());
        assert!(db.album_overview(original.id, None).unwrap().user_album.is_none());
    }

    #[test]
    fn clone_copies_once_per_signature() {
        let db = testing::db();
        let ana = testing::user(&db, "ana");
        let bia = testing::user(&db, "bia");
        let source = db.create_album(ana, "Refavela", "Gilberto Gil", "covers/refavela.jpg").unwrap();

        let (copy, created) = db.clone_album(bia, source.id).unwrap();
        assert!(created);
        assert_eq!(copy.owner_id, bia);
        assert_eq!((copy.title.as_str(), copy.cover_url.as_str()), ("Refavela", "covers/refavela.jpg"));

        let (again, created) = db.clone_album(bia, source.id).unwrap();
        assert!(!created);
        assert_eq!(again.id, copy.id);

        // Own album, and a differently-cased signature already owned.
        let (own, created) = db.clone_album(ana, source.id).unwrap();
        assert!(!created);
        assert_eq!(own.id, source.id);
        let shouting = db.create_album(ana, "REFAVELA", "GILBERTO GIL", "").unwrap();
        assert!(!db.clone_album(bia, shouting.id).unwrap().1);

        assert_eq!(db.album_overview(source.id, None).unwrap().copies, 3);
        assert!(matches!(db.clone_album(bia, 999), Err(AppError::NotFound(_))));
    }

    #[test]
    fn overview_of_unreviewed_album() {
        let db = testing::db();
        let ana = testing::user(&db, "ana");
        let album = db.create_album(ana, "Secos & Molhados", "Secos & Molhados", "").unwrap();

        let overview = db.album_overview(album.id, None).unwrap();
        assert_eq!(overview.avg_rating, None);
        assert_eq!(overview.review_count, 0);
        assert!(matches!(db.album_overview(album.id + 10, None), Err(AppError::NotFound(_))));
    }
}
