//! Per-user lock registry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use support_models::UserHandle;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Hands out one async mutex per user.
///
/// Every read-modify-write of a user record holds that user's guard, so two
/// messages from the same user never interleave while different users run
/// in parallel.
#[derive(Default)]
pub struct UserLocks {
    locks: Mutex<HashMap<UserHandle, Arc<AsyncMutex<()>>>>,
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for and returns the guard for `user`.
    pub async fn lock(&self, user: UserHandle) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            // Drop entries nobody holds or waits on.
            if locks.len() > 1024 {
                locks.retain(|_, l| Arc::strong_count(l) > 1);
            }
            locks.entry(user).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Number of users with a registered lock.
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_user_is_serialized() {
        let locks = Arc::new(UserLocks::new());
        let guard = locks.lock(UserHandle(1)).await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _g = locks.lock(UserHandle(1)).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_different_users_do_not_block() {
        let locks = UserLocks::new();
        let _a = locks.lock(UserHandle(1)).await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.lock(UserHandle(2))).await;
        assert!(b.is_ok());
        assert_eq!(locks.len(), 2);
    }
}
