//! Simulated half of a radio pair.
//!
//! Each [`SimChannel`] end pushes what it sends through its outbound
//! [`Impairment`] and an optional per-frame tap, and hands received bytes back
//! in impairment-sized chunks. A [`SimControl`] handle steers one direction
//! while links own the channel ends.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use skylink_transport::{Channel, TransportError};

use crate::impairment::{Impairment, ImpairmentConfig, ImpairmentStats};

/// Verdict of a tap on one transmitted frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapAction {
    Deliver,
    Drop,
}

/// Inspects (and may rewrite) each frame before impairment.
pub type Tap = Box<dyn FnMut(&mut Vec<u8>) -> TapAction + Send>;

struct Direction {
    impairment: Impairment,
    tap: Option<Tap>,
    tapped_drops: u64,
}

struct Outbound {
    direction: Mutex<Direction>,
    down: AtomicBool,
    sent: AtomicU64,
}

impl Outbound {
    fn lock(&self) -> MutexGuard<'_, Direction> {
        self.direction.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Handle controlling the outbound direction of one [`SimChannel`].
#[derive(Clone)]
pub struct SimControl {
    outbound: Arc<Outbound>,
}

impl SimControl {
    /// Install a tap, replacing any previous one.
    pub fn set_tap(&self, tap: impl FnMut(&mut Vec<u8>) -> TapAction + Send + 'static) {
        self.outbound.lock().tap = Some(Box::new(tap));
    }

    pub fn clear_tap(&self) {
        self.outbound.lock().tap = None;
    }

    /// While down, sends fail with [`TransportError::Disconnected`].
    pub fn set_down(&self, down: bool) {
        self.outbound.down.store(down, Ordering::Release);
    }

    /// Frames handed to the channel, including failed ones.
    pub fn frames_sent(&self) -> u64 {
        self.outbound.sent.load(Ordering::Relaxed)
    }

    pub fn tapped_drops(&self) -> u64 {
        self.outbound.lock().tapped_drops
    }

    pub fn impairment_stats(&self) -> ImpairmentStats {
        self.outbound.lock().impairment.stats()
    }
}

/// One end of a simulated radio link.
pub struct SimChannel {
    tx: Sender<Bytes>,
    rx: Receiver<Bytes>,
    outbound: Arc<Outbound>,
    /// Chunking of received bytes uses the peer's impairment settings.
    inbound: Mutex<(Impairment, BytesMut)>,
    recv_timeout: Duration,
}

/// Build a connected pair. `a_to_b` impairs what `a` sends, `b_to_a` what
/// `b` sends.
pub fn sim_pair(
    a_to_b: ImpairmentConfig,
    b_to_a: ImpairmentConfig,
    recv_timeout: Duration,
) -> (SimChannel, SimChannel) {
    let (a_tx, b_rx) = crossbeam_channel::unbounded();
    let (b_tx, a_rx) = crossbeam_channel::unbounded();
    let end = |tx: Sender<Bytes>,
               rx: Receiver<Bytes>,
               out: &ImpairmentConfig,
               inbound: &ImpairmentConfig| {
        let chunker = ImpairmentConfig {
            seed: inbound.seed.wrapping_add(0x5EED),
            ..inbound.clone()
        };
        SimChannel {
            tx,
            rx,
            outbound: Arc::new(Outbound {
                direction: Mutex::new(Direction {
                    impairment: Impairment::new(out.clone()),
                    tap: None,
                    tapped_drops: 0,
                }),
                down: AtomicBool::new(false),
                sent: AtomicU64::new(0),
            }),
            inbound: Mutex::new((Impairment::new(chunker), BytesMut::new())),
            recv_timeout,
        }
    };
    let a = end(a_tx, a_rx, &a_to_b, &b_to_a);
    let b = end(b_tx, b_rx, &b_to_a, &a_to_b);
    (a, b)
}

impl SimChannel {
    pub fn control(&self) -> SimControl {
        SimControl {
            outbound: self.outbound.clone(),
        }
    }
}

impl Channel for SimChannel {
    fn send(&self, bytes: &[u8]) -> Result<(), TransportError> {
        self.outbound.sent.fetch_add(1, Ordering::Relaxed);
        if self.outbound.down.load(Ordering::Acquire) {
            return Err(TransportError::Disconnected);
        }
        let wire = {
            let mut dir = self.outbound.lock();
            let mut frame = bytes.to_vec();
            let action = match dir.tap.as_mut() {
                Some(tap) => tap(&mut frame),
                None => TapAction::Deliver,
            };
            if action == TapAction::Drop {
                dir.tapped_drops += 1;
                return Ok(());
            }
            dir.impairment.apply(&frame)
        };
        if wire.is_empty() {
            return Ok(());
        }
        self.tx
            .send(Bytes::from(wire))
            .map_err(|_| TransportError::Disconnected)
    }

    fn recv(&self, max_len: usize) -> Result<Bytes, TransportError> {
        let mut guard = self.inbound.lock().unwrap_or_else(|e| e.into_inner());
        let (chunker, pending) = &mut *guard;
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
        let n = chunker.chunk(max_len).min(pending.len());
        Ok(pending.split_to(n).freeze())
    }
}
