use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use retro_db::Database;
use retro_db::time;
use retro_types::api::{NewFollower, NewMessageNotice, NotificationsResponse};
use retro_types::error::{AppError, AppResult};
use retro_types::models::UserId;

use crate::PollConfig;
use crate::poll::{Attempt, PollOutcome, poll_until};
use crate::store::blocking;

#[derive(Debug, Clone)]
pub struct NotificationRequest {
    pub viewer: UserId,
    /// Checkpoint from the previous response's `server_time`.
    pub since: Option<DateTime<Utc>>,
    /// Unread total the client is currently displaying.
    pub unread_snapshot: Option<i64>,
    pub wait: bool,
    pub timeout: Duration,
}

#[derive(Clone)]
pub struct NotificationPoller {
    db: Arc<Database>,
    config: PollConfig,
}

impl NotificationPoller {
    pub fn new(db: Arc<Database>, config: PollConfig) -> Self {
        Self { db, config }
    }

    /// New followers and the latest message per sender since the checkpoint.
    ///
    /// A waiting request returns early when either list is non-empty, or
    /// when the unread total no longer matches `unread_snapshot` (messages
    /// read elsewhere, or a message the checkpoint already passed).
    pub async fn fetch(
        &self,
        req: NotificationRequest,
        cancel: &CancellationToken,
    ) -> AppResult<NotificationsResponse> {
        let NotificationRequest { viewer, since, unread_snapshot, .. } = req;

        if !req.wait {
            return collect(&self.db, viewer, since).await;
        }

        let deadline = Instant::now() + req.timeout;
        let db = self.db.clone();
        let outcome = poll_until(deadline, self.config.interval, cancel, move || {
            let db = db.clone();
            async move {
                let pass = collect(&db, viewer, since).await?;
                let changed = unread_snapshot.is_some_and(|n| n != pass.total_unread_messages);
                Ok::<_, AppError>(if has_news(&pass) || changed {
                    Attempt::Ready(pass)
                } else {
                    Attempt::Empty(pass)
                })
            }
        })
        .await?;

        match outcome {
            PollOutcome::Ready(pass) | PollOutcome::TimedOut(pass) => Ok(pass),
            // Nobody is listening; an empty body keeps the checkpoint where it was.
            PollOutcome::Cancelled => Ok(NotificationsResponse {
                server_time: since.unwrap_or_else(time::now),
                new_followers: Vec::new(),
                new_messages: Vec::new(),
                total_unread_messages: unread_snapshot.unwrap_or(0),
            }),
        }
    }
}

fn has_news(pass: &NotificationsResponse) -> bool {
    !pass.new_followers.is_empty() || !pass.new_messages.is_empty()
}

/// One pass. `server_time` is taken before any read so a write that lands
/// mid-pass is still after the next checkpoint. It is the last whole
/// microsecond before the pass: rows are stamped at microsecond precision,
/// and a write later in the current microsecond must still compare greater.
async fn collect(
    db: &Arc<Database>,
    viewer: UserId,
    since: Option<DateTime<Utc>>,
) -> AppResult<NotificationsResponse> {
    let server_time = time::now() - TimeDelta::microseconds(1);

    blocking(db, move |db| {
        let new_followers = db
            .new_followers(viewer, since)?
            .into_iter()
            .map(|f| NewFollower {
                user: f.user,
                followed_at: f.followed_at,
            })
            .collect::<Vec<_>>();

        let heads = db.inbox_heads(viewer, since)?;
        let senders: Vec<UserId> = heads.iter().map(|h| h.sender.id).collect();
        let unread = db.unread_counts(viewer, Some(senders.as_slice()))?;

        let new_messages = heads
            .into_iter()
            .map(|h| NewMessageNotice {
                unread_count: unread.get(&h.sender.id).copied().unwrap_or(0),
                from_user: h.sender,
                message_id: h.message.id,
                content: h.message.content,
                created_at: h.message.created_at,
            })
            .collect::<Vec<_>>();

        let total_unread_messages = db.total_unread(viewer)?;

        debug!(
            "Notifications for {}: {} follower(s), {} sender(s), {} unread",
            viewer,
            new_followers.len(),
            new_messages.len(),
            total_unread_messages
        );

        Ok(NotificationsResponse {
            server_time,
            new_followers,
            new_messages,
            total_unread_messages,
        })
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use retro_db::messages::MessagePolicy;

    const SECOND: Duration = Duration::from_secs(1);

    fn request(viewer: UserId, since: Option<DateTime<Utc>>, unread_snapshot: Option<i64>) -> NotificationRequest {
        NotificationRequest {
            viewer,
            since,
            unread_snapshot,
            wait: true,
            timeout: 10 * SECOND,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn first_call_reports_everything() {
        let db = testing::db();
        // ana follows bia, so bia has a follower and can hear from ana.
        let (ana, bia) = testing::friends(&db, "ana", "bia");
        db.append_message(ana, bia, "oi", &MessagePolicy::default()).unwrap();

        let poller = NotificationPoller::new(db.clone(), PollConfig::default());
        let res = poller.fetch(request(bia, None, None), &CancellationToken::new()).await.unwrap();

        assert_eq!(res.new_followers.len(), 1);
        assert_eq!(res.new_followers[0].user.username, "ana");
        assert_eq!(res.new_messages.len(), 1);
        assert_eq!(res.new_messages[0].from_user.id, ana);
        assert_eq!(res.total_unread_messages, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn quiet_poll_holds_until_the_deadline() {
        let db = testing::db();
        let (ana, bia) = testing::friends(&db, "ana", "bia");
        db.append_message(ana, bia, "old", &MessagePolicy::default()).unwrap();

        let poller = NotificationPoller::new(db.clone(), PollConfig::default());
        let first = poller.fetch(request(bia, None, None), &CancellationToken::new()).await.unwrap();

        let start = Instant::now();
        let res = poller
            .fetch(
                request(bia, Some(first.server_time), Some(first.total_unread_messages)),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(start.elapsed() >= 10 * SECOND);
        assert!(res.new_followers.is_empty());
        assert!(res.new_messages.is_empty());
        assert_eq!(res.total_unread_messages, 1);
        assert!(res.server_time >= first.server_time);
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_mismatch_returns_immediately() {
        let db = testing::db();
        let (ana, bia) = testing::friends(&db, "ana", "bia");
        db.append_message(ana, bia, "one", &MessagePolicy::default()).unwrap();
        let first = NotificationPoller::new(db.clone(), PollConfig::default())
            .fetch(request(bia, None, None), &CancellationToken::new())
            .await
            .unwrap();

        let poller = NotificationPoller::new(db.clone(), PollConfig::default());
        let start = Instant::now();
        let res = poller
            .fetch(request(bia, Some(first.server_time), Some(0)), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(start.elapsed(), Duration::ZERO);
        assert!(res.new_messages.is_empty());
        assert_eq!(res.total_unread_messages, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn one_entry_per_sender_with_unread_count() {
        let db = testing::db();
        let (ana, bia) = testing::friends(&db, "ana", "bia");
        let cris = db.create_user("cris", "Cris", "").unwrap();
        db.follow(cris, bia).unwrap();

        let policy = MessagePolicy::default();
        db.append_message(ana, bia, "a1", &policy).unwrap();
        db.append_message(cris, bia, "c1", &policy).unwrap();
        db.append_message(ana, bia, "a2", &policy).unwrap();
        let latest = db.append_message(ana, bia, "a3", &policy).unwrap();

        let poller = NotificationPoller::new(db.clone(), PollConfig::default());
        let res = poller.fetch(request(bia, None, None), &CancellationToken::new()).await.unwrap();

        assert_eq!(res.new_messages.len(), 2);
        // Newest first.
        assert_eq!(res.new_messages[0].from_user.id, ana);
        assert_eq!(res.new_messages[0].message_id, latest.id);
        assert_eq!(res.new_messages[0].content, "a3");
        assert_eq!(res.new_messages[0].unread_count, 3);
        assert_eq!(res.new_messages[1].from_user.id, cris);
        assert_eq!(res.new_messages[1].unread_count, 1);
        assert_eq!(res.total_unread_messages, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn new_follower_ends_the_wait() {
        let db = testing::db();
        let bia = db.create_user("bia", "Bia", "").unwrap();
        let dani = db.create_user("dani", "Dani", "").unwrap();

        let poller = NotificationPoller::new(db.clone(), PollConfig::default());
        let first = poller.fetch(request(bia, None, None), &CancellationToken::new()).await.unwrap();
        assert!(first.new_followers.is_empty());

        let writer = db.clone();
        tokio::spawn(async move {
            tokio::time::sleep(2 * SECOND + SECOND / 2).await;
            writer.follow(dani, bia).unwrap();
        });

        let start = Instant::now();
        let res = poller
            .fetch(request(bia, Some(first.server_time), Some(0)), &CancellationToken::new())
            .await
            .unwrap();

        assert!(start.elapsed() < 10 * SECOND);
        assert_eq!(res.new_followers.len(), 1);
        assert_eq!(res.new_followers[0].user.id, dani);
    }

    #[tokio::test(start_paused = true)]
    async fn own_messages_never_notify() {
        let db = testing::db();
        let ana = db.create_user("ana", "Ana", "").unwrap();
        db.append_message(ana, ana, "note to self", &MessagePolicy::default()).unwrap();

        let poller = NotificationPoller::new(db.clone(), PollConfig::default());
        let mut req = request(ana, None, None);
        req.wait = false;
        let res = poller.fetch(req, &CancellationToken::new()).await.unwrap();

        assert!(res.new_messages.is_empty());
        assert_eq!(res.total_unread_messages, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn write_in_the_checkpoint_microsecond_is_reported_next() {
        let db = testing::db();
        let bia = db.create_user("bia", "Bia", "").unwrap();
        let dani = db.create_user("dani", "Dani", "").unwrap();
        let poller = NotificationPoller::new(db.clone(), PollConfig::default());
        let mut req = request(bia, None, None);
        req.wait = false;

        let first = poller.fetch(req.clone(), &CancellationToken::new()).await.unwrap();
        assert_eq!(first.server_time.timestamp_subsec_nanos() % 1_000, 0);

        // Stamped with the microsecond the first pass ran in.
        let stamp = time::format_time(first.server_time + TimeDelta::microseconds(1));
        db.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO follows (follower_id, followee_id, created_at) VALUES (?1, ?2, ?3)",
                (dani, bia, stamp),
            )
            .map_err(anyhow::Error::from)
        })
        .unwrap();

        req.since = Some(first.server_time);
        let next = poller.fetch(req, &CancellationToken::new()).await.unwrap();
        assert_eq!(next.new_followers.len(), 1);
        assert_eq!(next.new_followers[0].user.id, dani);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_wait_keeps_the_checkpoint() {
        let db = testing::db();
        let bia = db.create_user("bia", "Bia", "").unwrap();
        let since = Utc::now();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(SECOND + SECOND / 2).await;
            trigger.cancel();
        });

        let poller = NotificationPoller::new(db.clone(), PollConfig::default());
        let res = poller.fetch(request(bia, Some(since), Some(0)), &cancel).await.unwrap();

        assert_eq!(res.server_time, since);
        assert!(res.new_followers.is_empty());
    }
}
