//! Long-poll delivery for chat messages and notifications.
//!
//! A long-poll request re-queries the store at a fixed interval until there
//! is something to return or its deadline passes. Every pass is an
//! independent set of reads on the blocking pool; nothing is held across
//! the sleep, and the sleep is cut short when the request is cancelled.

pub mod chat;
pub mod notifications;
pub mod poll;
pub mod store;

use std::time::Duration;

use retro_db::messages::MessagePolicy;

pub const MIN_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const MAX_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy)]
pub struct PollConfig {
    /// Pause between store passes while waiting.
    pub interval: Duration,
    /// Authorization and size rules for conversations.
    pub policy: MessagePolicy,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            policy: MessagePolicy::default(),
        }
    }
}

/// Client-supplied timeout in seconds, clamped into `[5s, 60s]`.
pub fn clamp_timeout(secs: Option<u64>) -> Duration {
    secs.map(|s| Duration::from_secs(s).clamp(MIN_TIMEOUT, MAX_TIMEOUT))
        .unwrap_or(DEFAULT_TIMEOUT)
}
