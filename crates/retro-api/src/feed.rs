use axum::{Extension, extract::State, response::IntoResponse};

use retro_db::feed::{page_size, parse_cursor};
use retro_poll::store::blocking;
use retro_types::api::{Claims, FeedQuery};

use crate::error::ApiResult;
use crate::extract::{Json, Query};
use crate::state::AppState;

pub async fn get_feed(
    State(state): State<AppState>,
    Query(query): Query<FeedQuery>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let cursor = parse_cursor(query.cursor_time.as_deref(), query.cursor_id)?;
    let limit = page_size(query.limit);
    let viewer = claims.sub;

    let page = blocking(&state.db, move |db| Ok(db.feed(viewer, cursor, limit)?)).await?;

    Ok(Json(page))
}
