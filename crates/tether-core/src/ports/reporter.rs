//! FailureReporter port - terminal abandonment の通知
//!
//! retry 上限に達して削除された item を 1 回だけ通知します（fire-and-forget）。
//! 一時的な失敗は通知しません（静かに retry）。

use tokio::sync::mpsc;

use crate::domain::QueueItem;

pub trait FailureReporter: Send + Sync {
    /// Called exactly once per abandoned item, after it has been removed from the store.
    fn report(&self, item: &QueueItem, error: &str);
}

/// Default reporter: one `error!` line per abandoned item.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl FailureReporter for LogReporter {
    fn report(&self, item: &QueueItem, error: &str) {
        tracing::error!(
            item_id = %item.id,
            kind = item.kind.type_name(),
            priority = %item.priority,
            attempts = item.attempt_count,
            error = %error,
            "queue item abandoned after exhausting retries"
        );
    }
}

/// An abandoned item as delivered to a notification layer.
#[derive(Debug, Clone)]
pub struct Abandoned {
    pub item: QueueItem,
    pub error: String,
}

/// Forwards abandonments to a channel, e.g. for a toast/notification task.
///
/// A closed receiver is ignored; reporting never blocks or fails the tick.
#[derive(Debug, Clone)]
pub struct ChannelReporter {
    tx: mpsc::UnboundedSender<Abandoned>,
}

impl ChannelReporter {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Abandoned>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl FailureReporter for ChannelReporter {
    fn report(&self, item: &QueueItem, error: &str) {
        let sent = self.tx.send(Abandoned {
            item: item.clone(),
            error: error.to_string(),
        });
        if sent.is_err() {
            tracing::debug!(item_id = %item.id, "abandonment receiver dropped");
        }
    }
}
