use axum::{Extension, extract::State, http::StatusCode, response::IntoResponse};
use tracing::debug;

use retro_db::read_state::MarkReadOutcome;
use retro_poll::chat::ChatPollRequest;
use retro_poll::clamp_timeout;
use retro_poll::store::blocking;
use retro_types::api::{
    ChatMessage, ChatMessagesQuery, Claims, MarkReadRequest, MarkReadResponse, MarkReadStatus,
    SendMessageRequest, UnreadCountsResponse,
};
use retro_types::models::UserId;

use crate::error::ApiResult;
use crate::extract::{Json, Path, Query};
use crate::state::AppState;

/// Incremental message fetch. With `wait=1` and a cursor this is a long
/// poll that holds the request until the counterpart writes or the timeout
/// passes.
pub async fn get_messages(
    State(state): State<AppState>,
    Path(counterpart): Path<UserId>,
    Query(query): Query<ChatMessagesQuery>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let (cancel, _guard) = state.request_token();

    let req = ChatPollRequest {
        viewer: claims.sub,
        counterpart,
        after: query.after,
        wait: query.wait,
        timeout: clamp_timeout(query.timeout),
        active: query.active,
    };
    let res = state.chat.fetch(req, &cancel).await?;

    Ok(Json(res))
}

pub async fn send_message(
    State(state): State<AppState>,
    Path(counterpart): Path<UserId>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<impl IntoResponse> {
    let policy = state.policy;
    let sender = claims.sub;

    let row = blocking(&state.db, move |db| {
        db.append_message(sender, counterpart, &req.content, &policy)
    })
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(ChatMessage {
            id: row.id,
            from_me: true,
            content: row.content,
            created_at: row.created_at,
        }),
    ))
}

/// Advance the caller's watermark. Without an explicit message id (or
/// without a body at all) the newest message in the conversation is used,
/// optionally bounded by `last_message_at`.
pub async fn mark_read(
    State(state): State<AppState>,
    Path(counterpart): Path<UserId>,
    Extension(claims): Extension<Claims>,
    body: Option<Json<MarkReadRequest>>,
) -> ApiResult<impl IntoResponse> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let policy = state.policy;
    let owner = claims.sub;

    let outcome = blocking(&state.db, move |db| {
        db.authorize_conversation(owner, counterpart, &policy)?;

        let target = match req.last_message_id {
            Some(id) => Some(id),
            None => db.latest_message_id(owner, counterpart, req.last_message_at)?,
        };
        let Some(target) = target else {
            return Ok(MarkReadOutcome::Noop);
        };

        Ok(db.mark_read(owner, counterpart, target)?)
    })
    .await?;

    debug!("mark_read {} -> {}: {:?}", owner, counterpart, outcome);

    let status = match outcome {
        MarkReadOutcome::Advanced => MarkReadStatus::Ok,
        MarkReadOutcome::Noop => MarkReadStatus::Noop,
    };
    Ok(Json(MarkReadResponse { status }))
}

pub async fn unread_counts(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let owner = claims.sub;
    let counts = blocking(&state.db, move |db| Ok(db.unread_counts(owner, None)?)).await?;
    let total: i64 = counts.values().sum();

    Ok(Json(UnreadCountsResponse { counts, total }))
}

/// Everyone the caller may message.
pub async fn contacts(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let user = claims.sub;
    let contacts = blocking(&state.db, move |db| Ok(db.contacts(user)?)).await?;
    Ok(Json(contacts))
}
