use anyhow::Result;
use rusqlite::Connection;

use retro_types::api::{AlbumSearchHit, SearchResults, SearchScope};
use retro_types::models::{UserId, UserSummary};

use crate::Database;
use crate::models::{AlbumRow, user_summary_at};

pub const SEARCH_LIMIT: usize = 20;

impl Database {
    /// Case-insensitive substring search over people and albums.
    ///
    /// Users match on username or display name and never include the
    /// caller. Albums match on title or artist and come back one per
    /// (title, artist) signature, newest copy first, each flagged when the
    /// caller already owns that signature. A blank query matches nothing.
    pub fn search(&self, viewer: UserId, query: &str, scope: SearchScope) -> Result<SearchResults> {
        let term = query.trim();
        if term.is_empty() {
            return Ok(SearchResults::default());
        }

        self.with_conn(|conn| {
            let users = match scope {
                SearchScope::All | SearchScope::Users => search_users(conn, viewer, term)?,
                SearchScope::Albums => Vec::new(),
            };
            let albums = match scope {
                SearchScope::All | SearchScope::Albums => search_albums(conn, viewer, term)?,
                SearchScope::Users => Vec::new(),
            };
            Ok(SearchResults { users, albums })
        })
    }
}

fn search_users(conn: &Connection, viewer: UserId, term: &str) -> Result<Vec<UserSummary>> {
    let mut stmt = conn.prepare(
        "SELECT id, username, display_name, avatar_url
         FROM users
         WHERE id <> ?1
           AND (instr(lower(username), lower(?2)) > 0 OR instr(lower(display_name), lower(?2)) > 0)
         ORDER BY username ASC
         LIMIT ?3",
    )?;
    let rows = stmt
        .query_map(rusqlite::params![viewer, term, SEARCH_LIMIT as i64], |row| {
            user_summary_at(row, 0)
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn search_albums(conn: &Connection, viewer: UserId, term: &str) -> Result<Vec<AlbumSearchHit>> {
    let mut stmt = conn.prepare(
        "SELECT a.id, a.owner_id, a.title, a.artist, a.cover_url, a.created_at,
                u.id, u.username, u.display_name, u.avatar_url,
                EXISTS (
                    SELECT 1 FROM albums m
                    WHERE m.owner_id = ?1
                      AND lower(m.title) = lower(a.title)
                      AND lower(m.artist) = lower(a.artist)
                )
         FROM albums a
         JOIN users u ON u.id = a.owner_id
         WHERE (instr(lower(a.title), lower(?2)) > 0 OR instr(lower(a.artist), lower(?2)) > 0)
           AND a.id = (
               SELECT b.id FROM albums b
               WHERE lower(b.title) = lower(a.title) AND lower(b.artist) = lower(a.artist)
               ORDER BY b.created_at DESC, b.id DESC
               LIMIT 1
           )
         ORDER BY a.created_at DESC, a.id DESC
         LIMIT ?3",
    )?;
    let rows = stmt
        .query_map(rusqlite::params![viewer, term, SEARCH_LIMIT as i64], |row| {
            Ok(AlbumSearchHit {
                album: AlbumRow::from_row(row)?.to_response(),
                owner: user_summary_at(row, 6)?,
                in_collection: row.get(10)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[test]
    fn albums_collapse_to_newest_copy_per_signature() {
        let db = testing::db();
        let ana = testing::user(&db, "ana");
        let bia = testing::user(&db, "bia");
        let caio = testing::user(&db, "caio");

        let first = db.create_album(ana, "Clube da Esquina", "Milton Nascimento", "").unwrap();
        let (newest, _) = db.clone_album(bia, first.id).unwrap();
        let other = db.create_album(ana, "Milagre dos Peixes", "Milton Nascimento", "").unwrap();

        let hits = db.search(caio, "milton", SearchScope::Albums).unwrap().albums;
        let ids: Vec<i64> = hits.iter().map(|h| h.album.id).collect();
        assert_eq!(ids, vec![other.id, newest.id]);
        assert_eq!(hits[1].owner.username, "bia");
        assert!(hits.iter().all(|h| !h.in_collection));

        // Bia's copy is the one shown, but Ana owns the signature.
        let hits = db.search(ana, "ESQUINA", SearchScope::All).unwrap().albums;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].album.id, newest.id);
        assert!(hits[0].in_collection);
    }

    #[test]
    fn users_match_name_but_not_the_caller() {
        let db = testing::db();
        let marina = db.create_user("marina", "Marina Lima", "").unwrap();
        let mari = db.create_user("mari", "Mariana", "").unwrap();
        db.create_user("lima", "Lima Barreto", "").unwrap();

        let found = db.search(marina, "mari", SearchScope::Users).unwrap();
        assert_eq!(found.users.iter().map(|u| u.id).collect::<Vec<_>>(), vec![mari]);
        assert!(found.albums.is_empty());

        let found = db.search(mari, "LIMA", SearchScope::All).unwrap();
        let names: Vec<_> = found.users.iter().map(|u| u.username.as_str()).collect();
        assert_eq!(names, vec!["lima", "marina"]);
    }

    #[test]
    fn blank_and_wildcard_queries() {
        let db = testing::db();
        let ana = testing::user(&db, "ana");
        db.create_album(ana, "100% Samba", "Vários", "").unwrap();
        db.create_album(ana, "Samba", "Vários", "").unwrap();

        assert!(db.search(ana, "   ", SearchScope::All).unwrap().albums.is_empty());
        let hits = db.search(ana, "%", SearchScope::Albums).unwrap().albums;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].album.title, "100% Samba");
    }
}
