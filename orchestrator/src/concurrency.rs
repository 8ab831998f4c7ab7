use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Caps concurrent child processes globally and per user, using a checkout/lease shape
/// with two nested semaphores instead of one.
pub struct ConcurrencyPool {
    global: Arc<Semaphore>,
    per_user: Mutex<HashMap<String, Arc<Semaphore>>>,
    user_concurrency: usize,
}

impl ConcurrencyPool {
    pub fn new(global_concurrency: usize, user_concurrency: usize) -> Arc<Self> {
        Arc::new(Self {
            global: Arc::new(Semaphore::new(global_concurrency.max(1))),
            per_user: Mutex::new(HashMap::new()),
            user_concurrency: user_concurrency.max(1),
        })
    }

    fn user_semaphore(&self, user_id: &str) -> Arc<Semaphore> {
        let mut guard = self.per_user.lock().unwrap_or_else(|poison| poison.into_inner());
        guard
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.user_concurrency)))
            .clone()
    }

    /// Acquires a global slot and a per-user slot, in that order (FIFO within each semaphore).
    /// Both permits are held by the returned lease and released together on drop.
    pub async fn checkout(self: &Arc<Self>, user_id: &str) -> ConcurrencyLease {
        let global_permit = Arc::clone(&self.global)
            .acquire_owned()
            .await
            .expect("global semaphore closed");
        let user_semaphore = self.user_semaphore(user_id);
        let user_permit = user_semaphore
            .acquire_owned()
            .await
            .expect("per-user semaphore closed");

        ConcurrencyLease {
            _global_permit: global_permit,
            _user_permit: user_permit,
        }
    }
}

/// Active lease on one concurrent generation slot. Dropping it (including on cancellation or
/// failure) releases both the global and per-user permits.
pub struct ConcurrencyLease {
    _global_permit: OwnedSemaphorePermit,
    _user_permit: OwnedSemaphorePermit,
}
