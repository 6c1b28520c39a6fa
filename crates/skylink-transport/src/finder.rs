//! # Frame finder
//!
//! Recovers frames from the raw receive byte stream.
//!
//! ## Responsibilities
//!
//! - Hunt for the 8-byte synchronisation tag with a rolling 64-bit match.
//! - After a tag, collect exactly one frame's worth of bytes and decode it.
//! - On a failed decode, rescan the candidate's bytes (minus the tag) so a
//!   real frame that started inside a damaged one is not lost.
//! - Dispatch decoded frames: data into the receive stack with an ACK, ACKs
//!   and NACKs into the transmit stack, and NACKs for damaged data frames.

use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::frame::{Frame, FrameError, FrameKind, FRAME_LEN, SYNC_TAG, TAG_LEN};
use crate::link::Shared;
use crate::stack::Admission;

const TAG_WORD: u64 = u64::from_le_bytes(SYNC_TAG);

// ─── Synchroniser ───────────────────────────────────────────────────────────

/// Byte-at-a-time frame boundary recovery. Pure state machine; the worker
/// loop below feeds it from the raw queue.
#[derive(Debug)]
pub struct FrameSynchronizer {
    /// Last eight bytes seen while hunting, oldest in the low byte.
    window: u64,
    /// Tag plus body collected so far; empty while hunting.
    candidate: Vec<u8>,
    /// Bytes waiting to be examined, including rescanned ones.
    backlog: VecDeque<u8>,
    /// Bytes in `window` since the last tag or reset, at most `TAG_LEN - 1`
    /// once a full window failed to match.
    hunted: usize,
    noise: u64,
}

impl Default for FrameSynchronizer {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSynchronizer {
    pub fn new() -> Self {
        FrameSynchronizer {
            window: 0,
            candidate: Vec::with_capacity(FRAME_LEN),
            backlog: VecDeque::with_capacity(FRAME_LEN),
            hunted: 0,
            noise: 0,
        }
    }

    /// A tag has been seen and the frame body is being collected.
    pub fn is_collecting(&self) -> bool {
        !self.candidate.is_empty()
    }

    /// Bytes still needed to complete the current candidate.
    pub fn remaining(&self) -> usize {
        if self.is_collecting() {
            FRAME_LEN - self.candidate.len()
        } else {
            0
        }
    }

    /// Bytes skipped while hunting since the last call. A byte counts once
    /// it can no longer be part of a tag.
    pub fn take_noise(&mut self) -> u64 {
        std::mem::take(&mut self.noise)
    }

    /// Hunted bytes not yet counted as noise because a tag may still end
    /// with them.
    pub fn held_back(&self) -> usize {
        self.hunted
    }

    /// Abandon any partial candidate and forget the hunt window.
    pub fn reset(&mut self) {
        self.window = 0;
        self.hunted = 0;
        self.candidate.clear();
        self.backlog.clear();
    }

    /// Consume `input`, returning every candidate that completed, decoded or
    /// not, in stream order.
    pub fn feed(&mut self, input: &[u8]) -> Vec<Result<Frame, FrameError>> {
        self.backlog.extend(input);
        let mut out = Vec::new();

        while let Some(byte) = self.backlog.pop_front() {
            if self.is_collecting() {
                self.candidate.push(byte);
                if self.candidate.len() == FRAME_LEN {
                    out.push(self.finish_candidate());
                }
                continue;
            }

            self.window = (self.window >> 8) | (u64::from(byte) << 56);
            self.hunted += 1;
            if self.window == TAG_WORD {
                self.window = 0;
                self.hunted = 0;
                self.candidate.extend_from_slice(&SYNC_TAG);
            } else if self.hunted == TAG_LEN {
                // The oldest byte of a full, unmatched window.
                self.noise += 1;
                self.hunted -= 1;
            }
        }
        out
    }

    fn finish_candidate(&mut self) -> Result<Frame, FrameError> {
        let decoded = Frame::decode(&self.candidate);
        if decoded.is_err() {
            // Alignment is not trusted: examine the body again.
            for &b in self.candidate[TAG_LEN..].iter().rev() {
                self.backlog.push_front(b);
            }
        }
        self.candidate.clear();
        decoded
    }
}

// ─── Worker ─────────────────────────────────────────────────────────────────

pub(crate) fn run(shared: Arc<Shared>) {
    let cfg = &shared.config;
    let mut sync = FrameSynchronizer::new();

    while shared.running() {
        let bytes = if sync.is_collecting() {
            shared.raw.pop(sync.remaining(), cfg.frame_wait)
        } else {
            shared.raw.pop_available(cfg.recv_chunk, cfg.frame_wait)
        };
        if bytes.is_empty() {
            continue;
        }
        for decoded in sync.feed(&bytes) {
            dispatch(&shared, decoded);
        }
        let noise = sync.take_noise();
        if noise > 0 {
            shared.counters.noise_bytes.fetch_add(noise, Ordering::Relaxed);
        }
    }
    tracing::debug!(link = %shared.id, "frame finder stopped");
}

pub(crate) fn dispatch(shared: &Shared, decoded: Result<Frame, FrameError>) {
    let c = &shared.counters;
    let frame = match decoded {
        Ok(frame) => frame,
        Err(e) => {
            if e.is_checksum() {
                c.checksum_failures.fetch_add(1, Ordering::Relaxed);
                match e.nack_seq() {
                    Some(seq) if !shared.is_draining() => {
                        tracing::debug!(link = %shared.id, seq, error = %e, "damaged data frame, sending NACK");
                        shared.queue_meta(Frame::nack(seq));
                    }
                    _ => tracing::debug!(link = %shared.id, error = %e, "damaged frame dropped"),
                }
            } else {
                c.protocol_violations.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(link = %shared.id, error = %e, "invalid frame dropped");
            }
            return;
        }
    };

    c.frames_received.fetch_add(1, Ordering::Relaxed);
    let seq = frame.seq;
    match frame.kind {
        FrameKind::Data => receive_data(shared, frame),
        FrameKind::Ack => {
            c.acks_received.fetch_add(1, Ordering::Relaxed);
            if shared.tx.mark_acked(seq) {
                tracing::trace!(link = %shared.id, seq, "frame acknowledged");
                shared.writers.wake_all();
            }
        }
        FrameKind::Nack => {
            c.nacks_received.fetch_add(1, Ordering::Relaxed);
            if shared.tx.mark_timeout(seq) {
                c.nack_retransmits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(link = %shared.id, seq, "NACK received, retransmitting");
                shared.transmit.wake_all();
            }
        }
    }
}

fn receive_data(shared: &Shared, frame: Frame) {
    let c = &shared.counters;
    let seq = frame.seq;
    if shared.is_draining() {
        c.discarded_draining.fetch_add(1, Ordering::Relaxed);
        return;
    }
    let admission = shared.rx.mark_unread(frame, shared.config.window);
    match admission {
        Admission::Stored => {
            tracing::trace!(link = %shared.id, seq, "data frame stored");
            shared.delivery.wake_all();
        }
        Admission::Duplicate | Admission::Delivered => {
            c.duplicates.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(link = %shared.id, seq, ?admission, "duplicate data frame");
        }
        Admission::AheadOfWindow => {
            c.ahead_of_window.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(link = %shared.id, seq, "data frame ahead of receive window");
        }
    }
    if admission.should_ack() {
        shared.queue_meta(Frame::ack(seq));
    }
}
