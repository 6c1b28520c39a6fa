//! # Transmit scheduler
//!
//! Single sender of a link. Each pass drains the meta queue completely, then
//! sends at most one ready data slot (scanning round-robin from where the
//! last pass stopped) before checking the meta queue again, so ACKs and NACKs
//! are never stuck behind a burst of data. With nothing to send it sleeps on
//! the transmit wait queue, bounded by `transmit_idle`.
//!
//! Send failures are parked for the next `write` call; the frame is still
//! marked sent so the watchdog, not this loop, decides when to retry.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::frame::FrameKind;
use crate::link::Shared;

pub(crate) fn run(shared: Arc<Shared>) {
    let mut position = 0usize;

    while shared.running() {
        if !pass(&shared, &mut position) {
            shared.transmit.wait_until(shared.config.transmit_idle, || {
                !shared.running() || !shared.meta_rx.is_empty() || shared.tx.ready_count() > 0
            });
        }
    }
    tracing::debug!(link = %shared.id, "transmit scheduler stopped");
}

/// One scheduling pass. Returns false once a full scan found no ready slot.
fn pass(shared: &Shared, position: &mut usize) -> bool {
    drain_meta(shared);
    match shared.tx.next_ready(*position) {
        Some((seq, wire)) => {
            *position = seq as usize + 1;
            // In flight before it hits the channel, so the fastest ACK or
            // NACK still finds it `Sent`. Acked meanwhile: nothing to send.
            if shared.tx.mark_sent(seq) {
                send(shared, &wire, FrameKind::Data, seq);
            }
            true
        }
        None => {
            *position = 0;
            false
        }
    }
}

fn drain_meta(shared: &Shared) {
    while let Ok(frame) = shared.meta_rx.try_recv() {
        send(shared, &frame.to_bytes(), frame.kind, frame.seq);
    }
}

fn send(shared: &Shared, wire: &[u8], kind: FrameKind, seq: u8) {
    let c = &shared.counters;
    match shared.port.send(wire) {
        Ok(()) => {
            let counter = match kind {
                FrameKind::Data => &c.data_frames_sent,
                FrameKind::Ack => &c.acks_sent,
                FrameKind::Nack => &c.nacks_sent,
            };
            counter.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(link = %shared.id, ?kind, seq, "frame sent");
        }
        Err(e) => {
            c.transport_errors.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(link = %shared.id, ?kind, seq, error = %e, "channel send failed");
            shared.park_tx_error(e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LinkConfig;
    use crate::frame::Frame;
    use crate::link::testing;
    use crate::stack::SlotState;
    use bytes::Bytes;
    use std::thread;
    use std::time::Duration;

    fn data(seq: u8) -> Frame {
        Frame::data(seq, Bytes::from(vec![seq; 8])).unwrap()
    }

    #[test]
    fn meta_frames_go_first() {
        let (shared, channel) = testing::shared(LinkConfig::default());
        shared.tx.put(data(0)).unwrap();
        shared.tx.put(data(1)).unwrap();
        shared.queue_meta(Frame::ack(9));

        let mut position = 0;
        assert!(pass(&shared, &mut position));
        shared.queue_meta(Frame::nack(3));
        assert!(pass(&shared, &mut position));
        assert!(!pass(&shared, &mut position));
        assert_eq!(position, 0);

        assert_eq!(
            channel.frames(),
            vec![Frame::ack(9), data(0), Frame::nack(3), data(1)]
        );
        assert_eq!(shared.tx.state(0), SlotState::Sent);
        assert_eq!(shared.tx.unacked_count(), 2);

        let stats = shared.counters.snapshot();
        assert_eq!((stats.data_frames_sent, stats.acks_sent, stats.nacks_sent), (2, 1, 1));
    }

    #[test]
    fn scan_resumes_after_last_position() {
        let (shared, channel) = testing::shared(LinkConfig::default());
        shared.tx.put(data(5)).unwrap();
        let mut position = 0;
        assert!(pass(&shared, &mut position));
        assert_eq!(position, 6);

        // A re-armed earlier slot is found once the scan wraps.
        shared.tx.put(data(2)).unwrap();
        assert!(!pass(&shared, &mut position));
        assert!(pass(&shared, &mut position));
        assert_eq!(channel.frames(), vec![data(5), data(2)]);
    }

    #[test]
    fn send_failure_is_parked_and_slot_marked_sent() {
        let (shared, channel) = testing::shared(LinkConfig::default());
        channel.fail.store(true, Ordering::Release);
        shared.tx.put(data(0)).unwrap();
        let mut position = 0;
        pass(&shared, &mut position);
        assert_eq!(shared.tx.state(0), SlotState::Sent);
        assert_eq!(shared.counters.snapshot().transport_errors, 1);
        assert_eq!(shared.take_tx_error(), Some(crate::error::TransportError::Disconnected));
    }

    #[test]
    fn worker_wakes_on_new_frame_and_stops() {
        let (shared, channel) = testing::shared(LinkConfig::default());
        let worker = {
            let s = shared.clone();
            thread::spawn(move || run(s))
        };
        thread::sleep(Duration::from_millis(20));
        shared.tx.put(data(7)).unwrap();
        shared.transmit.wake_all();
        for _ in 0..100 {
            if !channel.frames().is_empty() {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        shared.stop();
        worker.join().unwrap();
        assert_eq!(channel.frames(), vec![data(7)]);
    }
}
