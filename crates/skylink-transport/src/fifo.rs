//! # Bounded byte FIFO
//!
//! Blocking byte queue used twice per link: channel reader → frame finder
//! (raw bytes) and delivery worker → application (payload bytes). Producers
//! block while the queue lacks room, consumers while it lacks data; every
//! wait is bounded. Closing the queue releases all waiters.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use bytes::Bytes;

struct Inner {
    buf: VecDeque<u8>,
    closed: bool,
}

pub struct ByteFifo {
    inner: Mutex<Inner>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

impl ByteFifo {
    pub fn new(capacity: usize) -> Self {
        ByteFifo {
            inner: Mutex::new(Inner {
                buf: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn free(&self) -> usize {
        self.capacity - self.len()
    }

    /// Append all of `data`, waiting up to `timeout` for room. Nothing is
    /// written unless everything fits. Returns false on timeout, on close,
    /// or if `data` can never fit.
    pub fn push(&self, data: &[u8], timeout: Duration) -> bool {
        if data.len() > self.capacity {
            return false;
        }
        let deadline = Instant::now() + timeout;
        let mut g = self.lock();
        loop {
            if g.closed {
                return false;
            }
            if self.capacity - g.buf.len() >= data.len() {
                g.buf.extend(data);
                self.not_empty.notify_all();
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            g = self
                .not_full
                .wait_timeout(g, deadline - now)
                .unwrap_or_else(|e| e.into_inner())
                .0;
        }
    }

    /// Wait up to `timeout` for at least `want` bytes, then take up to `want`
    /// bytes. Returns whatever is present when the wait ends, possibly
    /// nothing.
    pub fn pop(&self, want: usize, timeout: Duration) -> Bytes {
        if want == 0 {
            return Bytes::new();
        }
        let target = want.min(self.capacity);
        let deadline = Instant::now() + timeout;
        let mut g = self.lock();
        while g.buf.len() < target && !g.closed {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            g = self
                .not_empty
                .wait_timeout(g, deadline - now)
                .unwrap_or_else(|e| e.into_inner())
                .0;
        }
        let n = want.min(g.buf.len());
        let out: Vec<u8> = g.buf.drain(..n).collect();
        if n > 0 {
            self.not_full.notify_all();
        }
        Bytes::from(out)
    }

    /// Take up to `max` bytes, waiting only until the first byte arrives.
    pub fn pop_available(&self, max: usize, timeout: Duration) -> Bytes {
        if max == 0 {
            return Bytes::new();
        }
        let deadline = Instant::now() + timeout;
        let mut g = self.lock();
        while g.buf.is_empty() && !g.closed {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            g = self
                .not_empty
                .wait_timeout(g, deadline - now)
                .unwrap_or_else(|e| e.into_inner())
                .0;
        }
        let n = max.min(g.buf.len());
        let out: Vec<u8> = g.buf.drain(..n).collect();
        if n > 0 {
            self.not_full.notify_all();
        }
        Bytes::from(out)
    }

    /// Discard buffered bytes.
    pub fn clear(&self) {
        self.lock().buf.clear();
        self.not_full.notify_all();
    }

    /// Release every waiter; later pushes fail, pops drain what is left.
    pub fn close(&self) {
        self.lock().closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}
