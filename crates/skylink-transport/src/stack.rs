//! # Frame slot stack
//!
//! A fixed array of [`SEQ_LIMIT`] slots addressed by sequence number. Each
//! link owns two: the transmit stack (`Clear → Ready → Sent → Clear/Ready`)
//! and the receive stack (`Clear → Unread → Clear`).
//!
//! All slot mutation happens under one mutex; nothing performs I/O while it
//! is held. The ready/unacked/unread counters are updated under the lock and
//! may be read without it as a hint; callers re-check under the lock before
//! acting on them.
//!
//! ## Windows
//!
//! The sender keeps at most `window` consecutive sequence numbers
//! outstanding ([`FrameStack::window_open`]). The receiver classifies each
//! arriving data frame against its delivery position `r`: `[r, r+W)` is
//! accepted, `[r−MAX_WINDOW, r)` was already delivered, anything else is
//! ahead of the window. A sender bound by `W ≤ MAX_WINDOW` only ever has
//! frames in `[r−W, r+2W)` in flight, so the ranges never overlap.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use bytes::{Bytes, BytesMut};

use crate::frame::{Frame, FRAME_LEN, SEQ_LIMIT};

const CAPACITY: usize = SEQ_LIMIT as usize;

/// Largest send window for which the receiver can tell old from new frames.
pub const MAX_WINDOW: usize = CAPACITY / 3;

/// Forward distance from `from` to `to` in sequence space.
pub fn seq_distance(from: u8, to: u8) -> usize {
    (to as usize + CAPACITY - from as usize) % CAPACITY
}

/// Sequence number following `seq`.
pub fn seq_next(seq: u8) -> u8 {
    ((seq as usize + 1) % CAPACITY) as u8
}

// ─── Slot ───────────────────────────────────────────────────────────────────

/// Lifecycle state of one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Clear,
    /// Queued for (re)transmission.
    Ready,
    /// On the wire, waiting for an ACK.
    Sent,
    /// Received and validated, waiting for delivery.
    Unread,
}

#[derive(Debug)]
struct Slot {
    state: SlotState,
    retries: u16,
    payload: Bytes,
    /// Encoded frame, kept for retransmission.
    wire: Bytes,
}

impl Slot {
    fn empty() -> Self {
        Slot {
            state: SlotState::Clear,
            retries: 0,
            payload: Bytes::new(),
            wire: Bytes::new(),
        }
    }

    fn reset(&mut self) {
        *self = Slot::empty();
    }
}

struct Slots {
    entries: Vec<Slot>,
    /// Receive side: next sequence number to deliver.
    base: u8,
}

/// Outcome of offering a received data frame to the receive stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// New frame stored as unread.
    Stored,
    /// Same frame already stored and not yet delivered.
    Duplicate,
    /// Frame was delivered earlier; its ACK was probably lost.
    Delivered,
    /// Too far ahead of the delivery position to be placed safely.
    AheadOfWindow,
}

impl Admission {
    /// Whether the sender should be told (again) that we have this frame.
    pub fn should_ack(self) -> bool {
        !matches!(self, Admission::AheadOfWindow)
    }
}

/// Result of one watchdog pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AgeReport {
    /// Slots that reached the retry threshold and were re-armed.
    pub expired: Vec<u8>,
    /// Slots still in flight after the pass.
    pub outstanding: usize,
    /// Index after the last in-flight slot examined, for the next pass.
    pub next_position: usize,
}

// ─── Frame Stack ────────────────────────────────────────────────────────────

pub struct FrameStack {
    slots: Mutex<Slots>,
    ready: AtomicUsize,
    unacked: AtomicUsize,
    unread: AtomicUsize,
}

impl Default for FrameStack {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameStack {
    pub fn new() -> Self {
        FrameStack {
            slots: Mutex::new(Slots {
                entries: (0..CAPACITY).map(|_| Slot::empty()).collect(),
                base: 0,
            }),
            ready: AtomicUsize::new(0),
            unacked: AtomicUsize::new(0),
            unread: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        CAPACITY
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Frames waiting to be sent.
    pub fn ready_count(&self) -> usize {
        self.ready.load(Ordering::Acquire)
    }

    /// Frames sent and not yet acknowledged.
    pub fn unacked_count(&self) -> usize {
        self.unacked.load(Ordering::Acquire)
    }

    /// Received frames waiting for delivery.
    pub fn unread_count(&self) -> usize {
        self.unread.load(Ordering::Acquire)
    }

    /// No slot holds a frame.
    pub fn is_empty(&self) -> bool {
        self.ready_count() + self.unacked_count() + self.unread_count() == 0
    }

    pub fn state(&self, seq: u8) -> SlotState {
        self.lock().entries[seq as usize % CAPACITY].state
    }

    pub fn retries(&self, seq: u8) -> u16 {
        self.lock().entries[seq as usize % CAPACITY].retries
    }

    /// Drop every frame and reset counters and the delivery position.
    pub fn clear(&self) {
        let mut g = self.lock();
        g.entries.iter_mut().for_each(Slot::reset);
        g.base = 0;
        self.ready.store(0, Ordering::Release);
        self.unacked.store(0, Ordering::Release);
        self.unread.store(0, Ordering::Release);
    }

    // ─── Transmit Side ──────────────────────────────────────────────────

    /// Whether a writer may place `seq` now: its slot is clear and the slot
    /// `window` positions behind it has been acknowledged.
    pub fn window_open(&self, seq: u8, window: usize) -> bool {
        let g = self.lock();
        let idx = seq as usize % CAPACITY;
        let behind = (idx + CAPACITY - window.min(CAPACITY)) % CAPACITY;
        g.entries[idx].state == SlotState::Clear && g.entries[behind].state == SlotState::Clear
    }

    /// `Clear → Ready`. Hands the frame back if the slot is occupied.
    pub fn put(&self, frame: Frame) -> Result<(), Frame> {
        let mut g = self.lock();
        let slot = &mut g.entries[frame.seq as usize % CAPACITY];
        if slot.state != SlotState::Clear {
            return Err(frame);
        }
        let mut wire = BytesMut::with_capacity(FRAME_LEN);
        frame.encode(&mut wire);
        slot.wire = wire.freeze();
        slot.payload = frame.payload;
        slot.retries = 0;
        slot.state = SlotState::Ready;
        self.ready.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// First ready slot at or after `from`, with its encoded frame.
    pub fn next_ready(&self, from: usize) -> Option<(u8, Bytes)> {
        if self.ready_count() == 0 {
            return None;
        }
        let g = self.lock();
        (from.min(CAPACITY)..CAPACITY)
            .find(|&i| g.entries[i].state == SlotState::Ready)
            .map(|i| (i as u8, g.entries[i].wire.clone()))
    }

    /// `Ready → Sent`.
    pub fn mark_sent(&self, seq: u8) -> bool {
        let mut g = self.lock();
        let slot = &mut g.entries[seq as usize % CAPACITY];
        if slot.state != SlotState::Ready {
            return false;
        }
        slot.state = SlotState::Sent;
        slot.retries = 0;
        self.ready.fetch_sub(1, Ordering::AcqRel);
        self.unacked.fetch_add(1, Ordering::AcqRel);
        true
    }

    /// `Sent | Ready → Clear`.
    pub fn mark_acked(&self, seq: u8) -> bool {
        let mut g = self.lock();
        let slot = &mut g.entries[seq as usize % CAPACITY];
        match slot.state {
            SlotState::Sent => {
                self.unacked.fetch_sub(1, Ordering::AcqRel);
            }
            SlotState::Ready => {
                self.ready.fetch_sub(1, Ordering::AcqRel);
            }
            SlotState::Clear | SlotState::Unread => return false,
        }
        slot.reset();
        true
    }

    /// `Sent → Ready`, resetting the retry counter.
    pub fn mark_timeout(&self, seq: u8) -> bool {
        let mut g = self.lock();
        let slot = &mut g.entries[seq as usize % CAPACITY];
        if slot.state != SlotState::Sent {
            return false;
        }
        self.rearm(slot);
        true
    }

    fn rearm(&self, slot: &mut Slot) {
        slot.state = SlotState::Ready;
        slot.retries = 0;
        self.unacked.fetch_sub(1, Ordering::AcqRel);
        self.ready.fetch_add(1, Ordering::AcqRel);
    }

    /// Age every in-flight slot by one tick, starting at `from`, and re-arm
    /// those that reach `threshold`.
    pub fn age_sent(&self, from: usize, threshold: u16) -> AgeReport {
        let mut report = AgeReport {
            next_position: from % CAPACITY,
            ..AgeReport::default()
        };
        if self.unacked_count() == 0 {
            report.next_position = 0;
            return report;
        }
        let mut g = self.lock();
        for step in 0..CAPACITY {
            let idx = (from + step) % CAPACITY;
            let slot = &mut g.entries[idx];
            if slot.state != SlotState::Sent {
                continue;
            }
            slot.retries = slot.retries.saturating_add(1);
            report.next_position = (idx + 1) % CAPACITY;
            if slot.retries >= threshold {
                self.rearm(slot);
                report.expired.push(idx as u8);
            } else {
                report.outstanding += 1;
            }
        }
        report
    }

    // ─── Receive Side ───────────────────────────────────────────────────

    /// Next sequence number the delivery worker expects.
    pub fn delivery_position(&self) -> u8 {
        self.lock().base
    }

    /// Offer a validated data frame; stores it as `Unread` when it falls in
    /// the receive window and its slot is free.
    pub fn mark_unread(&self, frame: Frame, window: usize) -> Admission {
        let mut g = self.lock();
        let distance = seq_distance(g.base, frame.seq);
        if distance >= CAPACITY - MAX_WINDOW {
            return Admission::Delivered;
        }
        if distance >= window {
            return Admission::AheadOfWindow;
        }
        let slot = &mut g.entries[frame.seq as usize % CAPACITY];
        if slot.state != SlotState::Clear {
            return Admission::Duplicate;
        }
        slot.payload = frame.payload;
        slot.state = SlotState::Unread;
        self.unread.fetch_add(1, Ordering::AcqRel);
        Admission::Stored
    }

    /// Whether the frame at the delivery position has arrived.
    pub fn deliverable(&self) -> bool {
        if self.unread_count() == 0 {
            return false;
        }
        let g = self.lock();
        g.entries[g.base as usize].state == SlotState::Unread
    }

    /// Payload waiting at the delivery position, if it has arrived.
    pub fn next_unread(&self) -> Option<(u8, Bytes)> {
        if self.unread_count() == 0 {
            return None;
        }
        let g = self.lock();
        let slot = &g.entries[g.base as usize];
        (slot.state == SlotState::Unread).then(|| (g.base, slot.payload.clone()))
    }

    /// `Unread → Clear` for the slot at the delivery position, advancing it.
    pub fn mark_read(&self, seq: u8) -> bool {
        let mut g = self.lock();
        if g.base != seq {
            return false;
        }
        let slot = &mut g.entries[seq as usize % CAPACITY];
        if slot.state != SlotState::Unread {
            return false;
        }
        slot.reset();
        g.base = seq_next(seq);
        self.unread.fetch_sub(1, Ordering::AcqRel);
        true
    }
}
