//! # Wait queues
//!
//! Condition-variable wake signals between workers. The condition a waiter
//! cares about lives elsewhere (stack counters, the meta queue), so each
//! queue carries an epoch counter: a waiter samples the epoch before testing
//! its condition and only sleeps while the epoch is unchanged. A wake issued
//! between the test and the sleep is never lost.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
pub struct WaitQueue {
    epoch: Mutex<u64>,
    cond: Condvar,
}

impl WaitQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wake every waiter so it re-tests its condition.
    pub fn wake_all(&self) {
        let mut epoch = self.epoch.lock().unwrap_or_else(|e| e.into_inner());
        *epoch = epoch.wrapping_add(1);
        self.cond.notify_all();
    }

    /// Block until `ready` returns true or `timeout` elapses. Returns the
    /// final value of `ready`.
    pub fn wait_until(&self, timeout: Duration, mut ready: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let seen = *self.epoch.lock().unwrap_or_else(|e| e.into_inner());
            if ready() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let guard = self.epoch.lock().unwrap_or_else(|e| e.into_inner());
            let _ = self
                .cond
                .wait_timeout_while(guard, deadline - now, |epoch| *epoch == seen)
                .unwrap_or_else(|e| e.into_inner());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn ready_condition_returns_immediately() {
        let q = WaitQueue::new();
        assert!(q.wait_until(Duration::from_secs(5), || true));
    }

    #[test]
    fn times_out_when_condition_never_holds() {
        let q = WaitQueue::new();
        let start = Instant::now();
        assert!(!q.wait_until(Duration::from_millis(30), || false));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn wake_after_condition_change() {
        let q = Arc::new(WaitQueue::new());
        let flag = Arc::new(AtomicBool::new(false));

        let waiter = {
            let q = q.clone();
            let flag = flag.clone();
            thread::spawn(move || q.wait_until(Duration::from_secs(10), || flag.load(Ordering::Acquire)))
        };

        thread::sleep(Duration::from_millis(20));
        flag.store(true, Ordering::Release);
        q.wake_all();
        assert!(waiter.join().unwrap());
    }
}
