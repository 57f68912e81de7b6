use axum::{Extension, extract::State, response::IntoResponse};
use tracing::debug;

use retro_poll::store::blocking;
use retro_types::api::{Claims, ReactionRequest, ReactionResponse};
use retro_types::models::TargetType;

use crate::error::ApiResult;
use crate::extract::{Json, Path};
use crate::state::AppState;

pub async fn react_to_review(
    State(state): State<AppState>,
    Path(review_id): Path<i64>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ReactionRequest>,
) -> ApiResult<impl IntoResponse> {
    toggle(&state, TargetType::Review, review_id, &claims, req).await
}

pub async fn react_to_comment(
    State(state): State<AppState>,
    Path(comment_id): Path<i64>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ReactionRequest>,
) -> ApiResult<impl IntoResponse> {
    toggle(&state, TargetType::Comment, comment_id, &claims, req).await
}

/// Toggle, then report fresh totals so the client can redraw both buttons.
async fn toggle(
    state: &AppState,
    target_type: TargetType,
    target_id: i64,
    claims: &Claims,
    req: ReactionRequest,
) -> ApiResult<Json<ReactionResponse>> {
    let user = claims.sub;

    let summary = blocking(&state.db, move |db| {
        let current = db.set_reaction(target_type, target_id, user, req.action)?;
        debug!("{} {} reaction by {} is now {:?}", target_type, target_id, user, current);
        Ok(db.reaction_summary(target_type, target_id, Some(user))?)
    })
    .await?;

    Ok(Json(ReactionResponse {
        target_type,
        target_id,
        likes: summary.likes,
        dislikes: summary.dislikes,
        user_reaction: summary.user_reaction,
    }))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use crate::testing::{self, Client};

    #[tokio::test]
    async fn like_twice_then_dislike() {
        let (app, db) = testing::setup();
        let ana = db.create_user("ana", "Ana", "").unwrap();
        let album = db.create_album(ana, "Clube da Esquina", "Milton Nascimento", "").unwrap();
        let (review, _) = db.upsert_review(ana, album.id, 5, "obra-prima").unwrap();
        let client = Client::new(app, ana);
        let uri = format!("/reviews/{}/reactions", review.id);

        let (status, body) = client.post(&uri, json!({ "action": "like" })).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!((body["likes"].clone(), body["dislikes"].clone()), (json!(1), json!(0)));
        assert_eq!(body["user_reaction"], "like");

        let (_, body) = client.post(&uri, json!({ "action": "like" })).await;
        assert_eq!((body["likes"].clone(), body["dislikes"].clone()), (json!(0), json!(0)));
        assert!(body["user_reaction"].is_null());

        let (_, body) = client.post(&uri, json!({ "action": "dislike" })).await;
        assert_eq!((body["likes"].clone(), body["dislikes"].clone()), (json!(0), json!(1)));
        assert_eq!(body["target_type"], "review");
    }

    #[tokio::test]
    async fn comments_share_the_engine() {
        let (app, db) = testing::setup();
        let ana = db.create_user("ana", "Ana", "").unwrap();
        let bia = db.create_user("bia", "Bia", "").unwrap();
        let album = db.create_album(ana, "Acabou Chorare", "Novos Baianos", "").unwrap();
        let (review, _) = db.upsert_review(ana, album.id, 5, "clássico").unwrap();
        let comment = db.add_comment(bia, review.id, "concordo").unwrap();

        let (status, body) = Client::new(app, ana)
            .post(&format!("/comments/{}/reactions", comment.id), json!({ "action": "dislike" }))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["target_type"], "comment");
        assert_eq!(body["dislikes"], 1);
    }

    #[tokio::test]
    async fn unknown_targets_and_actions_are_rejected() {
        let (app, db) = testing::setup();
        let ana = db.create_user("ana", "Ana", "").unwrap();
        let client = Client::new(app, ana);

        let (status, body) = client.post("/reviews/404/reactions", json!({ "action": "like" })).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "review 404 not found");

        let (status, body) = client.post("/reviews/404/reactions", json!({ "action": "love" })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("love"));
    }
}
