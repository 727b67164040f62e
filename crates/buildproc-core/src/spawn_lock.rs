use std::sync::{Mutex, MutexGuard, PoisonError};

static SPAWN_LOCK: Mutex<()> = Mutex::new(());

/// Process-wide lock around pipe creation through process creation.
///
/// A child inherits every inheritable handle the parent holds at the moment it
/// is created. Two threads spawning at once could otherwise hand one child the
/// write end of a sibling's output pipe, and that sibling's reader would never
/// see end-of-file. Hold the guard from the first pipe allocation until the
/// child-side ends have been closed in the parent, and no longer.
pub fn spawn_lock() -> MutexGuard<'static, ()> {
    // The guarded data is `()`; a panic while holding it leaves nothing inconsistent
    SPAWN_LOCK.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_lock_serializes_holders() {
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let inside = inside.clone();
                let max_seen = max_seen.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        let _guard = spawn_lock();
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        inside.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for thread in threads {
            thread.join().unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_lock_survives_poisoning() {
        let _ = std::thread::spawn(|| {
            let _guard = spawn_lock();
            panic!("poison the spawn lock");
        })
        .join();

        drop(spawn_lock());
    }
}
