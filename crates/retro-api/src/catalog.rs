use axum::{Extension, extract::State, http::StatusCode, response::IntoResponse};

use retro_poll::store::blocking;
use retro_types::api::{
    Claims, CloneAlbumResponse, CommentResponse, CreateAlbumRequest, CreateCommentRequest, ReviewResponse,
    UpsertReviewRequest,
};

use crate::error::ApiResult;
use crate::extract::{Json, Path};
use crate::state::AppState;

/// Add an album to the caller's collection.
pub async fn create_album(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateAlbumRequest>,
) -> ApiResult<impl IntoResponse> {
    let owner = claims.sub;
    let row = blocking(&state.db, move |db| {
        db.create_album(owner, &req.title, &req.artist, &req.cover_url)
    })
    .await?;

    Ok((StatusCode::CREATED, Json(row.to_response())))
}

/// Copy someone else's album into the caller's collection. 201 when a copy
/// was made, 200 with the existing copy when the caller already has it.
pub async fn clone_album(
    State(state): State<AppState>,
    Path(album_id): Path<i64>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let user = claims.sub;
    let (row, created) = blocking(&state.db, move |db| db.clone_album(user, album_id)).await?;

    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((
        status,
        Json(CloneAlbumResponse {
            album: row.to_response(),
            created,
        }),
    ))
}

pub async fn get_album(
    State(state): State<AppState>,
    Path(album_id): Path<i64>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let viewer = claims.sub;
    let overview = blocking(&state.db, move |db| db.album_overview(album_id, Some(viewer))).await?;
    Ok(Json(overview))
}

/// Create or rewrite the caller's review. 201 on first publication.
pub async fn upsert_review(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpsertReviewRequest>,
) -> ApiResult<impl IntoResponse> {
    let user = claims.sub;
    let (row, created) = blocking(&state.db, move |db| {
        db.upsert_review(user, req.album_id, req.rating, &req.content)
    })
    .await?;

    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((
        status,
        Json(ReviewResponse {
            id: row.id,
            album_id: row.album_id,
            rating: row.rating,
            content: row.content,
            created_at: row.created_at,
            created,
        }),
    ))
}

pub async fn add_comment(
    State(state): State<AppState>,
    Path(review_id): Path<i64>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateCommentRequest>,
) -> ApiResult<impl IntoResponse> {
    let user = claims.sub;
    let row = blocking(&state.db, move |db| db.add_comment(user, review_id, &req.content)).await?;

    Ok((
        StatusCode::CREATED,
        Json(CommentResponse {
            id: row.id,
            review_id: row.review_id,
            user_id: row.user_id,
            content: row.content,
            created_at: row.created_at,
        }),
    ))
}
