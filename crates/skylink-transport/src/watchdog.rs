//! # Retransmission watchdog
//!
//! Driven by a fixed-period tick. Every tick ages each in-flight data slot by
//! one; a slot that reaches `retry_threshold` ticks without an ACK goes back
//! to `Ready` and the transmit scheduler is woken to resend it. Nothing
//! outstanding means nothing to do until the next tick.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crossbeam_channel::{select, Receiver};

use crate::link::Shared;

pub(crate) fn run(shared: Arc<Shared>, shutdown: Receiver<()>) {
    let ticker = crossbeam_channel::tick(shared.config.watchdog_period);
    let mut position = 0usize;

    loop {
        select! {
            recv(ticker) -> _ => {}
            recv(shutdown) -> _ => break,
        }
        if !shared.running() {
            break;
        }
        tick(&shared, &mut position);
    }
    tracing::debug!(link = %shared.id, "watchdog stopped");
}

/// Age in-flight slots once. Returns the number of slots re-armed.
fn tick(shared: &Shared, position: &mut usize) -> usize {
    let report = shared.tx.age_sent(*position, shared.config.retry_threshold);
    *position = report.next_position;
    let expired = report.expired.len();
    if expired > 0 {
        shared
            .counters
            .timeout_retransmits
            .fetch_add(expired as u64, Ordering::Relaxed);
        tracing::debug!(
            link = %shared.id,
            seqs = ?report.expired,
            outstanding = report.outstanding,
            "acknowledgement timeout, re-arming"
        );
        shared.transmit.wake_all();
    }
    expired
}
