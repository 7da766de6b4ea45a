//! Output change notification
//!
//! Whoever shows host output registers one `OutputNotifier`. The engine calls
//! it after every buffer mutation. There is no payload: consumers re-read the
//! host buffers they care about.

use tokio::sync::Notify;

pub trait OutputNotifier: Send + Sync {
    fn notify(&self);
}

impl<F> OutputNotifier for F
where
    F: Fn() + Send + Sync,
{
    fn notify(&self) {
        self()
    }
}

/// Coalescing change signal for an async consumer
///
/// Any number of `notify` calls made while the consumer is busy collapse
/// into a single wake-up.
#[derive(Debug, Default)]
pub struct ChangeSignal {
    notify: Notify,
}

impl ChangeSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until something changed since the last wake-up
    pub async fn changed(&self) {
        self.notify.notified().await;
    }
}

impl OutputNotifier for ChangeSignal {
    fn notify(&self) {
        self.notify.notify_one();
    }
}
