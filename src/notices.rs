use std::time::{Duration, Instant};

use crate::controller::Command;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Error,
}

#[derive(Clone, Debug)]
pub struct Notice {
    pub id: u64,
    pub level: NoticeLevel,
    pub message: String,
    pub retry: Option<Command>,
    raised_at: Instant,
}

/// Transient, non-blocking messages shown under the dashboard.
pub struct NoticeBoard {
    notices: Vec<Notice>,
    next_id: u64,
    ttl: Duration,
}

impl NoticeBoard {
    pub fn new(ttl: Duration) -> Self {
        Self {
            notices: Vec::new(),
            next_id: 0,
            ttl,
        }
    }

    pub fn raise(&mut self, level: NoticeLevel, message: String, retry: Option<Command>) -> u64 {
        self.next_id += 1;
        self.notices.push(Notice {
            id: self.next_id,
            level,
            message,
            retry,
            raised_at: Instant::now(),
        });
        self.next_id
    }

    pub fn iter(&self) -> impl Iterator<Item = &Notice> {
        self.notices.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.notices.is_empty()
    }

    pub fn dismiss(&mut self, id: u64) -> Option<Notice> {
        let idx = self.notices.iter().position(|notice| notice.id == id)?;
        Some(self.notices.remove(idx))
    }

    /// Drops notices older than the TTL as of `now`.
    pub fn prune(&mut self, now: Instant) {
        let ttl = self.ttl;
        self.notices
            .retain(|notice| now.saturating_duration_since(notice.raised_at) < ttl);
    }
}
