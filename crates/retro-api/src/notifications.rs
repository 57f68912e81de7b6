use axum::{Extension, extract::State, response::IntoResponse};

use retro_poll::clamp_timeout;
use retro_poll::notifications::NotificationRequest;
use retro_types::api::{Claims, NotificationsQuery};

use crate::error::ApiResult;
use crate::extract::{Json, Query};
use crate::state::AppState;

/// Followers and inbox activity since `since`. Clients pass back the
/// previous `server_time` as the next `since`.
pub async fn get_notifications(
    State(state): State<AppState>,
    Query(query): Query<NotificationsQuery>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let (cancel, _guard) = state.request_token();

    let req = NotificationRequest {
        viewer: claims.sub,
        since: query.since,
        unread_snapshot: query.unread_snapshot,
        wait: query.wait,
        timeout: clamp_timeout(query.timeout),
    };
    let res = state.notifications.fetch(req, &cancel).await?;

    Ok(Json(res))
}
