use std::{
    future::Future,
    sync::atomic::{AtomicI64, Ordering},
};

use tokio::sync::watch;

/// In-flight reference count of one unit of work, with a one-shot completion signal.
#[derive(Debug)]
pub struct FlyingCounter {
    count: AtomicI64,
    done: watch::Sender<bool>,
}

impl FlyingCounter {
    pub fn new() -> Self {
        let (done, _) = watch::channel(false);
        Self {
            count: AtomicI64::new(0),
            done,
        }
    }

    pub fn increment(&self) -> i64 {
        self.count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Returns the count after the decrement.
    pub fn decrement(&self) -> i64 {
        self.count.fetch_sub(1, Ordering::AcqRel) - 1
    }

    pub fn count(&self) -> i64 {
        self.count.load(Ordering::Acquire)
    }

    /// Resolves every waiter. Only the first call fires; it returns `true`.
    pub fn done(&self) -> bool {
        self.done.send_if_modified(|done| {
            if *done {
                false
            } else {
                *done = true;
                true
            }
        })
    }

    pub fn is_done(&self) -> bool {
        *self.done.borrow()
    }

    /// Completes once [`FlyingCounter::done`] has been called, including when it
    /// was called before this future was created.
    pub fn wait_done(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut receiver = self.done.subscribe();
        async move {
            let _ = receiver.wait_for(|done| *done).await;
        }
    }
}

impl Default for FlyingCounter {
    fn default() -> Self {
        Self::new()
    }
}
