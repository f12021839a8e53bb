use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::BookingNotice;

const CHANNEL_CAPACITY: usize = 256;

/// Notification dispatcher: one broadcast channel of booking notices per host.
///
/// Sending never blocks. Slow subscribers lag and miss notices rather than
/// holding up the engine.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<BookingNotice>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Notices for one host. Creates the channel if needed.
    pub fn subscribe(&self, host_id: Ulid) -> broadcast::Receiver<BookingNotice> {
        self.channels
            .entry(host_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// No-op for channels nobody listens on.
    pub fn send(&self, notice: &BookingNotice) {
        if let Some(sender) = self.channels.get(&notice.host_id) {
            let _ = sender.send(notice.clone());
        }
    }

    /// Drop a host channel once its last subscriber is gone.
    pub fn prune(&self, host_id: &Ulid) {
        self.channels
            .remove_if(host_id, |_, sender| sender.receiver_count() == 0);
    }
}
