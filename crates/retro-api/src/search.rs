use axum::{Extension, extract::State, response::IntoResponse};

use retro_poll::store::blocking;
use retro_types::api::{Claims, SearchQuery};

use crate::error::ApiResult;
use crate::extract::{Json, Query};
use crate::state::AppState;

/// `GET /search?q=&type=all|users|albums`.
pub async fn search(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let viewer = claims.sub;
    let results = blocking(&state.db, move |db| Ok(db.search(viewer, &query.q, query.scope)?)).await?;
    Ok(Json(results))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;

    use crate::testing::{self, Client};

    #[tokio::test]
    async fn search_marks_albums_already_owned() {
        let (app, db) = testing::setup();
        let ana = db.create_user("ana", "Ana", "").unwrap();
        let bia = db.create_user("bia", "Bia", "").unwrap();
        let album = db.create_album(ana, "Falso Brilhante", "Elis Regina", "").unwrap();
        db.clone_album(bia, album.id).unwrap();
        db.create_album(ana, "Elis", "Elis Regina", "").unwrap();
        let client = Client::new(app, bia);

        let (status, found) = client.get("/search?q=elis&type=albums").await;
        assert_eq!(status, StatusCode::OK);
        let albums = found["albums"].as_array().unwrap();
        assert_eq!(albums.len(), 2);
        assert_eq!(albums[0]["album"]["title"], "Elis");
        assert_eq!(albums[0]["in_collection"], false);
        assert_eq!(albums[1]["owner"]["username"], "bia");
        assert_eq!(albums[1]["in_collection"], true);
        assert!(found["users"].as_array().unwrap().is_empty());

        let (_, people) = client.get("/search?q=an&type=users").await;
        assert_eq!(people["users"][0]["username"], "ana");
    }

    #[tokio::test]
    async fn unknown_search_type_is_rejected() {
        let (app, db) = testing::setup();
        let ana = db.create_user("ana", "Ana", "").unwrap();

        let (status, body) = Client::new(app, ana).get("/search?q=x&type=songs").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
    }
}
