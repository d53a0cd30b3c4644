use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

type Listener = Box<dyn Fn() + Send + Sync>;

/// In-process broadcast raised when habits were changed outside the live UI.
#[derive(Default)]
pub struct HabitsChanged {
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_id: AtomicU64,
}

/// Returned by [`HabitsChanged::subscribe`]; pass to `unsubscribe` to detach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription(u64);

impl HabitsChanged {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: impl Fn() + Send + Sync + 'static) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push((id, Box::new(listener)));
        Subscription(id)
    }

    pub fn unsubscribe(&self, subscription: Subscription) {
        self.listeners.lock().retain(|(id, _)| *id != subscription.0);
    }

    pub fn emit(&self) {
        let listeners = self.listeners.lock();
        tracing::debug!(listeners = listeners.len(), "habits changed externally");
        for (_, listener) in listeners.iter() {
            listener();
        }
    }
}
