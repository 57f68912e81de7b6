use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::models::{
    FeedCursor, MessageId, ObjectType, ReactionKind, TargetType, UserId, UserSummary, Verb,
};

// -- JWT Claims --

/// Identity injected by the auth middleware. Tokens are issued elsewhere.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: UserId,
    pub username: String,
    pub exp: usize,
}

/// Query-string booleans arrive as `1`/`0` from the web client and as
/// `true`/`false` from everything else.
pub fn query_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(serde::de::Error::custom(format!("invalid flag '{}'", other))),
    }
}

// -- Chat --

#[derive(Debug, Default, Deserialize)]
pub struct ChatMessagesQuery {
    pub after: Option<MessageId>,
    #[serde(default, deserialize_with = "query_flag")]
    pub wait: bool,
    /// Seconds; clamped by the poller.
    pub timeout: Option<u64>,
    /// The caller is looking at the conversation right now.
    #[serde(default, deserialize_with = "query_flag")]
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub from_me: bool,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatMessagesResponse {
    pub messages: Vec<ChatMessage>,
    pub last_id: Option<MessageId>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub content: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MarkReadRequest {
    pub last_message_id: Option<MessageId>,
    pub last_message_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkReadStatus {
    Ok,
    Noop,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MarkReadResponse {
    pub status: MarkReadStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UnreadCountsResponse {
    pub counts: BTreeMap<UserId, i64>,
    pub total: i64,
}

// -- Notifications --

#[derive(Debug, Default, Deserialize)]
pub struct NotificationsQuery {
    pub since: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "query_flag")]
    pub wait: bool,
    pub timeout: Option<u64>,
    pub unread_snapshot: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewFollower {
    pub user: UserSummary,
    pub followed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMessageNotice {
    pub from_user: UserSummary,
    pub message_id: MessageId,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub unread_count: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NotificationsResponse {
    pub server_time: DateTime<Utc>,
    pub new_followers: Vec<NewFollower>,
    pub new_messages: Vec<NewMessageNotice>,
    pub total_unread_messages: i64,
}

// -- Feed --

#[derive(Debug, Default, Deserialize)]
pub struct FeedQuery {
    /// Kept as text so a malformed value surfaces as a validation error
    /// rather than a generic extractor rejection.
    pub cursor_time: Option<String>,
    pub cursor_id: Option<i64>,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedEntry {
    pub id: i64,
    pub actor: UserSummary,
    pub verb: Verb,
    pub object_type: ObjectType,
    pub object_id: i64,
    pub target_user_id: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub reactions: Option<ReactionSummary>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FeedPage {
    pub entries: Vec<FeedEntry>,
    pub next_cursor: Option<FeedCursor>,
}

// -- Reactions --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReactionRequest {
    pub action: ReactionKind,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionSummary {
    pub likes: i64,
    pub dislikes: i64,
    pub user_reaction: Option<ReactionKind>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReactionResponse {
    pub target_type: TargetType,
    pub target_id: i64,
    pub likes: i64,
    pub dislikes: i64,
    pub user_reaction: Option<ReactionKind>,
}

// -- Catalog --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateAlbumRequest {
    pub title: String,
    pub artist: String,
    #[serde(default)]
    pub cover_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlbumResponse {
    pub id: i64,
    pub owner_id: UserId,
    pub title: String,
    pub artist: String,
    pub cover_url: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewView {
    pub id: i64,
    pub album_id: i64,
    pub author: UserSummary,
    pub rating: i64,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub reactions: ReactionSummary,
}

/// Cross-owner view of an album: every per-owner copy sharing the same
/// (title, artist) signature collapsed into the earliest-created copy.
#[derive(Debug, Serialize, Deserialize)]
pub struct AlbumOverview {
    pub album: AlbumResponse,
    pub requested_album_id: i64,
    pub copies: usize,
    pub cover_url: String,
    pub avg_rating: Option<f64>,
    pub review_count: usize,
    pub unique_reviewer_count: usize,
    pub reviews: Vec<ReviewView>,
    /// The viewer's own copy among the matching albums, if any.
    pub user_album: Option<AlbumResponse>,
    pub user_review: Option<ReviewView>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CloneAlbumResponse {
    pub album: AlbumResponse,
    /// False when the caller already had this album; nothing was copied.
    pub created: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpsertReviewRequest {
    pub album_id: i64,
    pub rating: i64,
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReviewResponse {
    pub id: i64,
    pub album_id: i64,
    pub rating: i64,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub created: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateCommentRequest {
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CommentResponse {
    pub id: i64,
    pub review_id: i64,
    pub user_id: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

// -- Search --

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchScope {
    #[default]
    All,
    Users,
    Albums,
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
    #[serde(default, rename = "type")]
    pub scope: SearchScope,
}

/// One album per (title, artist) signature: the most recently added copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlbumSearchHit {
    pub album: AlbumResponse,
    pub owner: UserSummary,
    /// The caller already has a copy with this signature.
    pub in_collection: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SearchResults {
    pub users: Vec<UserSummary>,
    pub albums: Vec<AlbumSearchHit>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FollowResponse {
    pub following: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}
