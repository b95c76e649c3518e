use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptRef {
    pub chat_id: i64,
    pub message_id: i32,
}

/// Purchase id -> the payment prompt shown for it, so the prompt can be removed
/// once the purchase settles. Entries expire after `ttl`.
pub struct MessageCache {
    entries: DashMap<i64, (PromptRef, Instant)>,
    ttl: Duration,
    shutdown: watch::Sender<bool>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl MessageCache {
    /// Must be called inside a tokio runtime; spawns the sweep task.
    pub fn start(ttl: Duration, sweep_interval: Duration) -> Arc<Self> {
        let (shutdown, mut rx) = watch::channel(false);
        let cache = Arc::new(Self {
            entries: DashMap::new(),
            ttl,
            shutdown,
            sweeper: Mutex::new(None),
        });

        let weak = Arc::downgrade(&cache);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let Some(cache) = weak.upgrade() else { break };
                        cache.cleanup();
                    }
                    changed = rx.changed() => {
                        if changed.is_err() || *rx.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("Message cache sweep stopped");
        });

        if let Ok(mut slot) = cache.sweeper.lock() {
            *slot = Some(handle);
        }
        cache
    }

    pub fn insert(&self, purchase_id: i64, prompt: PromptRef) {
        self.entries
            .insert(purchase_id, (prompt, Instant::now() + self.ttl));
    }

    pub fn get(&self, purchase_id: i64) -> Option<PromptRef> {
        self.entries
            .get(&purchase_id)
            .filter(|entry| entry.1 > Instant::now())
            .map(|entry| entry.0)
    }

    /// Removes and returns a live entry.
    pub fn take(&self, purchase_id: i64) -> Option<PromptRef> {
        self.entries
            .remove(&purchase_id)
            .filter(|(_, (_, expires_at))| *expires_at > Instant::now())
            .map(|(_, (prompt, _))| prompt)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn cleanup(&self) {
        let now = Instant::now();
        self.entries.retain(|_, (_, expires_at)| *expires_at > now);
    }

    /// Stops the sweep and waits for it. Safe to call more than once.
    pub async fn close(&self) {
        let _ = self.shutdown.send(true);
        let handle = match self.sweeper.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Message cache sweep ended abnormally: {}", e);
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.shutdown.borrow()
    }
}
