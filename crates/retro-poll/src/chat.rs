use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use retro_db::Database;
use retro_db::models::MessageRow;
use retro_types::api::{ChatMessage, ChatMessagesResponse};
use retro_types::error::{AppError, AppResult};
use retro_types::models::{MessageId, UserId};

use crate::PollConfig;
use crate::poll::{Attempt, PollOutcome, poll_until};
use crate::store::blocking;

#[derive(Debug, Clone)]
pub struct ChatPollRequest {
    pub viewer: UserId,
    pub counterpart: UserId,
    pub after: Option<MessageId>,
    pub wait: bool,
    /// Already clamped; see [`crate::clamp_timeout`].
    pub timeout: Duration,
    /// Caller is looking at the conversation; delivered messages count as read.
    pub active: bool,
}

/// Serves one conversation's new messages, optionally holding the request
/// open until the counterpart writes something.
#[derive(Clone)]
pub struct ChatPoller {
    db: Arc<Database>,
    config: PollConfig,
}

impl ChatPoller {
    pub fn new(db: Arc<Database>, config: PollConfig) -> Self {
        Self { db, config }
    }

    /// Messages with `id > after`, ascending.
    ///
    /// Without `wait` (or without a cursor, i.e. a page load) this is one
    /// read. With `wait`, the log is re-read every poll interval until a
    /// message shows up or the timeout elapses. `last_id` in the response is
    /// the cursor for the next call; strict `id > after` filtering means
    /// nothing is delivered twice and nothing is skipped.
    pub async fn fetch(
        &self,
        req: ChatPollRequest,
        cancel: &CancellationToken,
    ) -> AppResult<ChatMessagesResponse> {
        let policy = self.config.policy;
        let (viewer, counterpart, after) = (req.viewer, req.counterpart, req.after);

        blocking(&self.db, move |db| db.authorize_conversation(viewer, counterpart, &policy)).await?;

        let rows = match after {
            Some(_) if req.wait => {
                let deadline = Instant::now() + req.timeout;
                let db = self.db.clone();
                let outcome = poll_until(deadline, self.config.interval, cancel, move || {
                    let db = db.clone();
                    async move {
                        let rows = read_since(&db, viewer, counterpart, after).await?;
                        Ok::<_, AppError>(if rows.is_empty() {
                            Attempt::Empty(rows)
                        } else {
                            Attempt::Ready(rows)
                        })
                    }
                })
                .await?;

                match outcome {
                    PollOutcome::Ready(rows) | PollOutcome::TimedOut(rows) => rows,
                    PollOutcome::Cancelled => Vec::new(),
                }
            }
            _ => read_since(&self.db, viewer, counterpart, after).await?,
        };

        if req.active {
            self.mark_delivered_read(viewer, counterpart, &rows).await;
        }

        let last_id = rows.iter().map(|m| m.id).max().or(after);
        debug!(
            "Chat fetch {}<->{} after {:?}: {} message(s)",
            viewer,
            counterpart,
            after,
            rows.len()
        );

        Ok(ChatMessagesResponse {
            messages: rows
                .into_iter()
                .map(|m| ChatMessage {
                    id: m.id,
                    from_me: m.sender_id == viewer,
                    content: m.content,
                    created_at: m.created_at,
                })
                .collect(),
            last_id,
        })
    }

    /// Advance the viewer's watermark to the newest incoming message just
    /// delivered. A failure here must not lose the delivery, so it is only
    /// logged; the client can still mark the conversation read explicitly.
    async fn mark_delivered_read(&self, viewer: UserId, counterpart: UserId, rows: &[MessageRow]) {
        let Some(newest) = rows
            .iter()
            .filter(|m| m.sender_id == counterpart && m.receiver_id == viewer)
            .map(|m| m.id)
            .max()
        else {
            return;
        };

        let result = blocking(&self.db, move |db| Ok(db.mark_read(viewer, counterpart, newest)?)).await;
        if let Err(e) = result {
            warn!("Failed to mark message {} read for {}: {}", newest, viewer, e);
        }
    }
}

async fn read_since(
    db: &Arc<Database>,
    viewer: UserId,
    counterpart: UserId,
    after: Option<MessageId>,
) -> AppResult<Vec<MessageRow>> {
    blocking(db, move |db| Ok(db.messages_since(viewer, counterpart, after)?)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use retro_db::messages::MessagePolicy;

    const SECOND: Duration = Duration::from_secs(1);

    fn request(viewer: UserId, counterpart: UserId, after: Option<MessageId>, wait: bool) -> ChatPollRequest {
        ChatPollRequest {
            viewer,
            counterpart,
            after,
            wait,
            timeout: 30 * SECOND,
            active: false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn page_load_returns_whole_conversation() {
        let db = testing::db();
        let (ana, bia) = testing::friends(&db, "ana", "bia");
        let policy = MessagePolicy::default();
        db.append_message(ana, bia, "oi", &policy).unwrap();
        let last = db.append_message(bia, ana, "olá", &policy).unwrap();

        let poller = ChatPoller::new(db.clone(), PollConfig::default());
        let start = Instant::now();
        // `wait` without a cursor is still a single read.
        let res = poller.fetch(request(ana, bia, None, true), &CancellationToken::new()).await.unwrap();

        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(res.messages.len(), 2);
        assert!(res.messages[0].from_me);
        assert!(!res.messages[1].from_me);
        assert_eq!(res.last_id, Some(last.id));
    }

    #[tokio::test(start_paused = true)]
    async fn waiting_poll_wakes_on_counterpart_message() {
        let db = testing::db();
        let (ana, bia) = testing::friends(&db, "ana", "bia");
        let first = db.append_message(ana, bia, "alguém aí?", &MessagePolicy::default()).unwrap();

        let writer = db.clone();
        tokio::spawn(async move {
            tokio::time::sleep(3 * SECOND + SECOND / 2).await;
            writer.append_message(bia, ana, "tô aqui", &MessagePolicy::default()).unwrap();
        });

        let poller = ChatPoller::new(db.clone(), PollConfig::default());
        let start = Instant::now();
        let res = poller
            .fetch(request(ana, bia, Some(first.id), true), &CancellationToken::new())
            .await
            .unwrap();

        // Picked up on the next pass after the write.
        let waited = start.elapsed();
        assert!(waited >= 4 * SECOND && waited < 5 * SECOND, "waited {:?}", waited);
        assert_eq!(res.messages.len(), 1);
        assert_eq!(res.messages[0].content, "tô aqui");
        assert_eq!(res.last_id, Some(first.id + 1));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_wait_times_out_with_cursor_unchanged() {
        let db = testing::db();
        let (ana, bia) = testing::friends(&db, "ana", "bia");
        let first = db.append_message(ana, bia, "hello", &MessagePolicy::default()).unwrap();

        let poller = ChatPoller::new(db.clone(), PollConfig::default());
        let mut req = request(ana, bia, Some(first.id), true);
        req.timeout = 5 * SECOND;

        let start = Instant::now();
        let res = poller.fetch(req, &CancellationToken::new()).await.unwrap();

        assert!(start.elapsed() >= 5 * SECOND);
        assert!(res.messages.is_empty());
        assert_eq!(res.last_id, Some(first.id));
    }

    #[tokio::test(start_paused = true)]
    async fn successive_cursors_deliver_each_message_once() {
        let db = testing::db();
        let (ana, bia) = testing::friends(&db, "ana", "bia");
        let policy = MessagePolicy::default();
        let poller = ChatPoller::new(db.clone(), PollConfig::default());
        let cancel = CancellationToken::new();

        let mut cursor = poller.fetch(request(ana, bia, None, false), &cancel).await.unwrap().last_id;
        assert_eq!(cursor, None);

        let mut delivered = Vec::new();
        for round in 0..3 {
            db.append_message(bia, ana, &format!("m{}", round), &policy).unwrap();
            db.append_message(ana, bia, &format!("r{}", round), &policy).unwrap();
            let res = poller.fetch(request(ana, bia, cursor, false), &cancel).await.unwrap();
            delivered.extend(res.messages.iter().map(|m| m.id));
            cursor = res.last_id;
        }

        let all: Vec<_> = db.messages_since(ana, bia, None).unwrap().iter().map(|m| m.id).collect();
        assert_eq!(delivered, all);
    }

    #[tokio::test(start_paused = true)]
    async fn strangers_are_rejected_before_waiting() {
        let db = testing::db();
        let (ana, _) = testing::friends(&db, "ana", "bia");
        let stranger = db.create_user("stranger", "", "").unwrap();

        let poller = ChatPoller::new(db.clone(), PollConfig::default());
        let start = Instant::now();
        let err = poller
            .fetch(request(ana, stranger, Some(0), true), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Unauthorized(_)));
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn self_conversation_follows_policy() {
        let db = testing::db();
        let ana = db.create_user("ana", "", "").unwrap();

        let open = ChatPoller::new(db.clone(), PollConfig::default());
        assert!(open.fetch(request(ana, ana, None, false), &CancellationToken::new()).await.is_ok());

        let closed = ChatPoller::new(
            db.clone(),
            PollConfig {
                policy: MessagePolicy { allow_self: false, ..MessagePolicy::default() },
                ..PollConfig::default()
            },
        );
        let err = closed.fetch(request(ana, ana, None, false), &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_poll_returns_promptly() {
        let db = testing::db();
        let (ana, bia) = testing::friends(&db, "ana", "bia");
        let poller = ChatPoller::new(db.clone(), PollConfig::default());
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(SECOND / 2).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let res = poller.fetch(request(ana, bia, Some(0), true), &cancel).await.unwrap();
        assert!(res.messages.is_empty());
        assert!(start.elapsed() < SECOND);
    }

    #[tokio::test(start_paused = true)]
    async fn active_viewer_marks_delivered_messages_read() {
        let db = testing::db();
        let (ana, bia) = testing::friends(&db, "ana", "bia");
        let policy = MessagePolicy::default();
        db.append_message(bia, ana, "1", &policy).unwrap();
        let newest = db.append_message(bia, ana, "2", &policy).unwrap();
        db.append_message(ana, bia, "mine", &policy).unwrap();
        assert_eq!(db.total_unread(ana).unwrap(), 2);

        let poller = ChatPoller::new(db.clone(), PollConfig::default());
        let mut req = request(ana, bia, None, false);
        req.active = true;
        poller.fetch(req, &CancellationToken::new()).await.unwrap();

        assert_eq!(db.total_unread(ana).unwrap(), 0);
        assert_eq!(db.watermark(ana, bia).unwrap().unwrap().last_read_message_id, newest.id);
        // Bia's side is untouched.
        assert_eq!(db.total_unread(bia).unwrap(), 1);
    }
}
