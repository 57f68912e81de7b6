use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use retro_db::Database;
use retro_db::messages::MessagePolicy;
use retro_poll::PollConfig;
use retro_poll::chat::ChatPoller;
use retro_poll::notifications::NotificationPoller;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub chat: ChatPoller,
    pub notifications: NotificationPoller,
    pub policy: MessagePolicy,
    pub jwt_secret: String,
    /// Cancelled on server shutdown; every long-poll request holds a child.
    pub shutdown: CancellationToken,
}

impl AppStateInner {
    pub fn new(db: Arc<Database>, config: PollConfig, jwt_secret: String, shutdown: CancellationToken) -> AppState {
        Arc::new(Self {
            chat: ChatPoller::new(db.clone(), config),
            notifications: NotificationPoller::new(db.clone(), config),
            policy: config.policy,
            db,
            jwt_secret,
            shutdown,
        })
    }

    /// Token for one long-poll request. Cancelling it (or dropping the
    /// returned guard) stops only that request; shutdown stops all of them.
    pub fn request_token(&self) -> (CancellationToken, tokio_util::sync::DropGuard) {
        let token = self.shutdown.child_token();
        let guard = token.clone().drop_guard();
        (token, guard)
    }
}
