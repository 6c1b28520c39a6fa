//! # Byte channel
//!
//! The physical transport seen by a link: a duplex octet stream with
//! blocking, timeout-bounded primitives. Frame boundaries are not preserved;
//! the frame finder recovers them.
//!
//! [`Port`] wraps a channel with separate send and receive locks so that only
//! one send and one receive are ever in progress, independent of the stack
//! locks. [`memory_pair`] gives a lossless in-process pair for tests.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::error::TransportError;
use crate::link::Shared;

/// A duplex byte channel.
pub trait Channel: Send + Sync {
    /// Transmit `bytes`, blocking until the channel accepts them.
    fn send(&self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Receive up to `max_len` bytes. Blocks for at most the channel's own
    /// timeout and returns an empty buffer if nothing arrived.
    fn recv(&self, max_len: usize) -> Result<Bytes, TransportError>;
}

impl<C: Channel + ?Sized> Channel for Arc<C> {
    fn send(&self, bytes: &[u8]) -> Result<(), TransportError> {
        (**self).send(bytes)
    }

    fn recv(&self, max_len: usize) -> Result<Bytes, TransportError> {
        (**self).recv(max_len)
    }
}

// ─── Port ───────────────────────────────────────────────────────────────────

pub(crate) struct Port {
    channel: Arc<dyn Channel>,
    send_lock: Mutex<()>,
    recv_lock: Mutex<()>,
}

impl Port {
    pub(crate) fn new(channel: Arc<dyn Channel>) -> Self {
        Port {
            channel,
            send_lock: Mutex::new(()),
            recv_lock: Mutex::new(()),
        }
    }

    pub(crate) fn send(&self, bytes: &[u8]) -> Result<(), TransportError> {
        let _guard = self.send_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.channel.send(bytes)
    }

    pub(crate) fn recv(&self, max_len: usize) -> Result<Bytes, TransportError> {
        let _guard = self.recv_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.channel.recv(max_len)
    }
}

// ─── Channel Reader Worker ──────────────────────────────────────────────────

/// Move bytes from the channel into the raw queue until stopped.
pub(crate) fn run_reader(shared: Arc<Shared>) {
    let cfg = &shared.config;
    while shared.running() {
        let chunk = match shared.port.recv(cfg.recv_chunk) {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::warn!(link = %shared.id, error = %e, "channel receive failed");
                shared.counters.transport_errors.fetch_add(1, Ordering::Relaxed);
                shared.park_rx_error(e);
                std::thread::sleep(cfg.error_backoff);
                continue;
            }
        };
        if chunk.is_empty() {
            continue;
        }
        // Back-pressure: hold the chunk until the finder makes room.
        while shared.running() && !shared.raw.push(&chunk, cfg.transmit_idle) {}
    }
    tracing::debug!(link = %shared.id, "channel reader stopped");
}

// ─── In-Memory Pair ─────────────────────────────────────────────────────────

/// One end of a lossless in-memory duplex channel.
pub struct MemoryChannel {
    tx: Sender<Bytes>,
    rx: Receiver<Bytes>,
    pending: Mutex<BytesMut>,
    recv_timeout: Duration,
}

/// Two connected [`MemoryChannel`] ends.
pub fn memory_pair(recv_timeout: Duration) -> (MemoryChannel, MemoryChannel) {
    let (a_tx, b_rx) = crossbeam_channel::unbounded();
    let (b_tx, a_rx) = crossbeam_channel::unbounded();
    let end = |tx, rx| MemoryChannel {
        tx,
        rx,
        pending: Mutex::new(BytesMut::new()),
        recv_timeout,
    };
    (end(a_tx, a_rx), end(b_tx, b_rx))
}

impl Channel for MemoryChannel {
    fn send(&self, bytes: &[u8]) -> Result<(), TransportError> {
        self.tx
            .send(Bytes::copy_from_slice(bytes))
            .map_err(|_| TransportError::Disconnected)
    }

    fn recv(&self, max_len: usize) -> Result<Bytes, TransportError> {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if pending.is_empty() {
            match self.rx.recv_timeout(self.recv_timeout) {
                Ok(chunk) => pending.extend_from_slice(&chunk),
                Err(RecvTimeoutError::Timeout) => return Ok(Bytes::new()),
                Err(RecvTimeoutError::Disconnected) => return Err(TransportError::Disconnected),
            }
        }
        while let Ok(chunk) = self.rx.try_recv() {
            pending.extend_from_slice(&chunk);
        }
        let n = max_len.min(pending.len());
        Ok(pending.split_to(n).freeze())
    }
}
