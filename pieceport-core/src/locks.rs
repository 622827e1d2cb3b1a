use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Exclusive per-piece locks. Every mutation of a piece record runs while
/// holding its guard, so at most one writer touches a piece at a time while
/// unrelated pieces proceed in parallel.
#[derive(Default)]
pub struct PieceLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

pub struct PieceGuard {
    _guard: OwnedMutexGuard<()>,
}

impl PieceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, piece_id: &str) -> PieceGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            // Drop entries nobody is holding or waiting on.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks
                .entry(piece_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };

        PieceGuard {
            _guard: lock.lock_owned().await,
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().map(|locks| locks.len()).unwrap_or(0)
    }
}
