//! Online/offline state and reconnect notifications.
//!
//! The monitor is fed by the embedding runtime (platform reachability
//! events) and only reports the link-layer signal; a reported "online" does
//! not guarantee the server is reachable, so the sync manager still handles
//! per-request failures on its own.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tracing::debug;

type Callback = Arc<dyn Fn() + Send + Sync>;

/// Shared connectivity state with transition-to-online subscribers.
pub struct ConnectivityMonitor {
    online: AtomicBool,
    next_subscriber_id: AtomicU64,
    subscribers: Mutex<Vec<(u64, Callback)>>,
}

impl ConnectivityMonitor {
    pub fn new(initially_online: bool) -> Arc<Self> {
        Arc::new(Self {
            online: AtomicBool::new(initially_online),
            next_subscriber_id: AtomicU64::new(0),
            subscribers: Mutex::new(Vec::new()),
        })
    }

    /// Point-in-time, best-effort reachability signal.
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Feed a reachability change from the platform. Subscribers fire only
    /// on the offline-to-online transition.
    pub fn set_online(&self, online: bool) {
        let was_online = self.online.swap(online, Ordering::SeqCst);
        if online && !was_online {
            debug!("connectivity restored, notifying subscribers");
            // Clone handlers out of the lock so a callback can subscribe
            // or drop subscriptions without deadlocking.
            let callbacks: Vec<Callback> = {
                let subscribers = self.lock_subscribers();
                subscribers.iter().map(|(_, cb)| Arc::clone(cb)).collect()
            };
            for callback in callbacks {
                callback();
            }
        }
    }

    /// Register a callback fired on each transition to online. Callbacks
    /// run on the notifying thread and must not block; spawn async work
    /// instead. No ordering guarantee among subscribers. The returned
    /// [`Subscription`] unsubscribes when dropped.
    pub fn subscribe(
        self: &Arc<Self>,
        callback: impl Fn() + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_subscriber_id.fetch_add(1, Ordering::SeqCst);
        self.lock_subscribers().push((id, Arc::new(callback)));
        Subscription {
            id,
            monitor: Arc::downgrade(self),
        }
    }

    fn unsubscribe(&self, id: u64) {
        self.lock_subscribers().retain(|(sid, _)| *sid != id);
    }

    fn lock_subscribers(&self) -> std::sync::MutexGuard<'_, Vec<(u64, Callback)>> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Disposer for a connectivity subscription.
pub struct Subscription {
    id: u64,
    monitor: Weak<ConnectivityMonitor>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(monitor) = self.monitor.upgrade() {
            monitor.unsubscribe(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn fires_only_on_offline_to_online_transition() {
        let monitor = ConnectivityMonitor::new(false);
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = Arc::clone(&fired);
        let _sub = monitor.subscribe(move || {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });

        monitor.set_online(false); // still offline
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        monitor.set_online(true); // transition
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        monitor.set_online(true); // already online, no transition
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        monitor.set_online(false);
        monitor.set_online(true); // second transition
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn dropping_the_subscription_unsubscribes() {
        let monitor = ConnectivityMonitor::new(false);
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = Arc::clone(&fired);
        let sub = monitor.subscribe(move || {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });
        drop(sub);

        monitor.set_online(true);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn multiple_subscribers_all_fire() {
        let monitor = ConnectivityMonitor::new(false);
        let fired = Arc::new(AtomicUsize::new(0));
        let subs: Vec<Subscription> = (0..3)
            .map(|_| {
                let fired = Arc::clone(&fired);
                monitor.subscribe(move || {
                    fired.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();

        monitor.set_online(true);
        assert_eq!(fired.load(Ordering::SeqCst), 3);
        drop(subs);
    }
}
