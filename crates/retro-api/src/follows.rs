use axum::{Extension, extract::State, response::IntoResponse};
use tracing::info;

use retro_poll::store::blocking;
use retro_types::api::{Claims, FollowResponse};
use retro_types::models::UserId;

use crate::error::ApiResult;
use crate::extract::{Json, Path};
use crate::state::AppState;

pub async fn follow(
    State(state): State<AppState>,
    Path(followee): Path<UserId>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let follower = claims.sub;
    let created = blocking(&state.db, move |db| db.follow(follower, followee)).await?;
    if created {
        info!("{} now follows {}", follower, followee);
    }
    Ok(Json(FollowResponse { following: true }))
}

pub async fn unfollow(
    State(state): State<AppState>,
    Path(followee): Path<UserId>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let follower = claims.sub;
    let removed = blocking(&state.db, move |db| Ok(db.unfollow(follower, followee)?)).await?;
    if removed {
        info!("{} unfollowed {}", follower, followee);
    }
    Ok(Json(FollowResponse { following: false }))
}
