//! # Delivery worker
//!
//! Moves payloads from the receive stack to the read queue strictly in
//! sequence order. It waits for the frame at the delivery position to arrive
//! and for the read queue to have room for all of it; frames stored out of
//! order simply wait their turn.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::link::Shared;

pub(crate) fn run(shared: Arc<Shared>) {
    let idle = shared.config.transmit_idle;
    while shared.running() {
        if !deliver_next(&shared) {
            shared
                .delivery
                .wait_until(idle, || !shared.running() || shared.rx.deliverable());
        }
    }
    tracing::debug!(link = %shared.id, "delivery worker stopped");
}

/// Deliver the frame at the delivery position if it is present and fits.
fn deliver_next(shared: &Shared) -> bool {
    let Some((seq, payload)) = shared.rx.next_unread() else {
        return false;
    };
    // Back-pressure: leave the frame in place until the reader makes room.
    if !shared.read_q.push(&payload, shared.config.transmit_idle) {
        return false;
    }
    shared.rx.mark_read(seq);
    shared
        .counters
        .bytes_delivered
        .fetch_add(payload.len() as u64, Ordering::Relaxed);
    tracing::trace!(link = %shared.id, seq, len = payload.len(), "payload delivered");
    true
}
