use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

/// Counting semaphore over `std::sync`. Lock poisoning is ignored: a panicking
/// batch action must not wedge the rest of the batch.
pub struct GlobalSemaphore {
    limit: usize,
    used: Mutex<usize>,
    cv: Condvar,
}

impl GlobalSemaphore {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            used: Mutex::new(0),
            cv: Condvar::new(),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn acquire(self: &Arc<Self>) -> GlobalPermit {
        let mut used = self.used.lock().unwrap_or_else(PoisonError::into_inner);
        while *used >= self.limit {
            used = self.cv.wait(used).unwrap_or_else(PoisonError::into_inner);
        }
        *used += 1;
        GlobalPermit {
            semaphore: Arc::clone(self),
        }
    }

    fn release(&self) {
        let mut used = self.used.lock().unwrap_or_else(PoisonError::into_inner);
        *used = used.saturating_sub(1);
        self.cv.notify_one();
    }
}

pub struct GlobalPermit {
    semaphore: Arc<GlobalSemaphore>,
}

impl Drop for GlobalPermit {
    fn drop(&mut self) {
        self.semaphore.release();
    }
}

/// Bounds batch fan-out globally and serializes work on the same target
/// (device serial or instance index).
pub struct TaskScheduler {
    global: Arc<GlobalSemaphore>,
    target_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl TaskScheduler {
    pub fn new(global_limit: usize) -> Self {
        Self {
            global: Arc::new(GlobalSemaphore::new(global_limit)),
            target_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn limit(&self) -> usize {
        self.global.limit()
    }

    pub fn acquire_global(&self) -> GlobalPermit {
        self.global.acquire()
    }

    pub fn target_lock(&self, key: &str) -> Arc<Mutex<()>> {
        let mut guard = self
            .target_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        guard
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Runs `work` holding a global permit and the lock for `key`.
    pub fn run_exclusive<R>(&self, key: &str, work: impl FnOnce() -> R) -> R {
        let _permit = self.acquire_global();
        let lock = self.target_lock(key);
        let _guard: MutexGuard<'_, ()> = lock.lock().unwrap_or_else(PoisonError::into_inner);
        work()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn global_semaphore_limits_concurrency() {
        let scheduler = Arc::new(TaskScheduler::new(2));

        let running = Arc::new(AtomicUsize::new(0));
        let max_running = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for index in 0..8 {
            let scheduler = Arc::clone(&scheduler);
            let running = Arc::clone(&running);
            let max_running = Arc::clone(&max_running);
            handles.push(thread::spawn(move || {
                scheduler.run_exclusive(&format!("instance-{index}"), || {
                    let current = running.fetch_add(1, Ordering::SeqCst) + 1;
                    max_running.fetch_max(current, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(30));
                    running.fetch_sub(1, Ordering::SeqCst);
                });
            }));
        }

        for handle in handles {
            handle.join().expect("join");
        }

        let observed = max_running.load(Ordering::SeqCst);
        assert!(observed <= 2, "saw {observed} concurrent tasks");
    }

    #[test]
    fn target_lock_serializes_same_target() {
        let scheduler = Arc::new(TaskScheduler::new(8));

        let running = Arc::new(AtomicUsize::new(0));
        let max_running = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..6 {
            let scheduler = Arc::clone(&scheduler);
            let running = Arc::clone(&running);
            let max_running = Arc::clone(&max_running);
            handles.push(thread::spawn(move || {
                scheduler.run_exclusive("emulator-5554", || {
                    let current = running.fetch_add(1, Ordering::SeqCst) + 1;
                    max_running.fetch_max(current, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(10));
                    running.fetch_sub(1, Ordering::SeqCst);
                });
            }));
        }

        for handle in handles {
            handle.join().expect("join");
        }

        assert_eq!(max_running.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn poisoned_target_lock_is_still_usable() {
        let scheduler = Arc::new(TaskScheduler::new(1));
        let poisoner = Arc::clone(&scheduler);
        let _ = thread::spawn(move || {
            poisoner.run_exclusive("7", || panic!("action blew up"));
        })
        .join();

        assert_eq!(scheduler.run_exclusive("7", || 42), 42);
        assert_eq!(scheduler.limit(), 1);
    }
}
