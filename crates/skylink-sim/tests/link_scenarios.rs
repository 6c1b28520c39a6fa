//! # End-to-end link scenarios over simulated radios
//!
//! Each test runs two real links with all worker threads over a `SimChannel`
//! pair, steering damage with seeded impairment or per-frame taps.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use skylink_sim::harness::{fast_config, init_tracing, pattern, read_exactly, wait_for};
use skylink_sim::{ImpairmentConfig, LinkPair, TapAction};
use skylink_transport::frame::{Frame, FrameKind, TAG_LEN};
use skylink_transport::{LinkConfig, LinkError, TransportError, MAX_PAYLOAD};

const LONG: Duration = Duration::from_secs(20);

fn kind_of(bytes: &[u8]) -> Option<(FrameKind, u8)> {
    Frame::decode(bytes).ok().map(|f| (f.kind, f.seq))
}

// ─── Clean Channel ──────────────────────────────────────────────────────────

#[test]
fn three_hundred_bytes_take_three_frames() {
    init_tracing();
    let config = LinkConfig {
        retry_threshold: 200,
        ..fast_config()
    };
    let pair = LinkPair::clean(config).unwrap();
    let msg = pattern(300, 0x11);
    assert_eq!(pair.transfer(&msg, LONG).unwrap(), msg);
    pair.left.flush(Duration::from_secs(5)).unwrap();

    let left = pair.left.stats();
    assert_eq!(left.data_frames_sent, 3);
    assert_eq!(left.retransmissions(), 0);
    assert_eq!(pair.right.stats().acks_sent, 3);
    assert_eq!(pair.left_tx.frames_sent(), 3);
}

#[test]
fn payload_lengths_of_last_frame() {
    init_tracing();
    let config = LinkConfig {
        retry_threshold: 200,
        ..fast_config()
    };
    let pair = LinkPair::clean(config).unwrap();
    let lengths = Arc::new(std::sync::Mutex::new(Vec::new()));
    {
        let lengths = lengths.clone();
        pair.left_tx.set_tap(move |bytes| {
            if let Ok(frame) = Frame::decode(bytes) {
                lengths.lock().unwrap().push(frame.payload.len());
            }
            TapAction::Deliver
        });
    }
    let msg = pattern(300, 0x22);
    assert_eq!(pair.transfer(&msg, LONG).unwrap(), msg);
    assert_eq!(*lengths.lock().unwrap(), vec![128, 128, 44]);
}

// ─── Targeted Damage ────────────────────────────────────────────────────────

#[test]
fn damaged_frame_is_nacked_once_and_resent() {
    init_tracing();
    // Retransmit timeout far beyond the test, so recovery must come from
    // the NACK.
    let config = LinkConfig {
        watchdog_period: Duration::from_millis(50),
        retry_threshold: 400,
        ..fast_config()
    };
    let pair = LinkPair::clean(config).unwrap();
    let damaged = Arc::new(AtomicBool::new(false));
    {
        let damaged = damaged.clone();
        pair.left_tx.set_tap(move |bytes| {
            if kind_of(bytes) == Some((FrameKind::Data, 1)) && !damaged.swap(true, Ordering::SeqCst) {
                // Inside the payload region: header survives.
                bytes[TAG_LEN + 40] ^= 0x10;
            }
            TapAction::Deliver
        });
    }

    let msg = pattern(300, 0x33);
    assert_eq!(pair.transfer(&msg, Duration::from_secs(5)).unwrap(), msg);
    pair.left.flush(Duration::from_secs(5)).unwrap();

    let (left, right) = (pair.left.stats(), pair.right.stats());
    assert!(damaged.load(Ordering::SeqCst));
    assert_eq!(right.checksum_failures, 1);
    assert_eq!(right.nacks_sent, 1);
    assert_eq!(left.nacks_received, 1);
    assert_eq!(left.nack_retransmits, 1);
    assert_eq!(left.timeout_retransmits, 0);
    assert_eq!(left.data_frames_sent, 4);
}

#[test]
fn lost_acks_cause_duplicates_not_double_delivery() {
    init_tracing();
    let pair = LinkPair::clean(fast_config()).unwrap();
    let dropped = Arc::new(AtomicU32::new(0));
    {
        let dropped = dropped.clone();
        pair.right_tx.set_tap(move |bytes| {
            let is_ack = matches!(kind_of(bytes), Some((FrameKind::Ack, _)));
            if is_ack && dropped.load(Ordering::SeqCst) < 5 {
                dropped.fetch_add(1, Ordering::SeqCst);
                return TapAction::Drop;
            }
            TapAction::Deliver
        });
    }

    let msg = pattern(MAX_PAYLOAD * 5, 0x44);
    assert_eq!(pair.transfer(&msg, LONG).unwrap(), msg);
    pair.left.flush(Duration::from_secs(5)).unwrap();

    assert_eq!(dropped.load(Ordering::SeqCst), 5);
    assert!(pair.left.stats().timeout_retransmits >= 5);
    let right = pair.right.stats();
    assert!(right.duplicates >= 5);
    assert_eq!(right.bytes_delivered, msg.len() as u64);
    // Nothing further shows up.
    assert!(pair.right.read(1).unwrap().is_empty());
}

#[test]
fn lost_data_frame_recovered_by_watchdog() {
    init_tracing();
    let pair = LinkPair::clean(fast_config()).unwrap();
    let lost = Arc::new(AtomicBool::new(false));
    {
        let lost = lost.clone();
        pair.left_tx.set_tap(move |bytes| {
            if kind_of(bytes) == Some((FrameKind::Data, 0)) && !lost.swap(true, Ordering::SeqCst) {
                return TapAction::Drop;
            }
            TapAction::Deliver
        });
    }
    let msg = pattern(MAX_PAYLOAD * 3, 0x55);
    assert_eq!(pair.transfer(&msg, LONG).unwrap(), msg);
    assert!(pair.left.stats().timeout_retransmits >= 1);
    assert_eq!(pair.right.stats().nacks_sent, 0);
}

// ─── Random Impairment ──────────────────────────────────────────────────────

#[test]
fn survives_noisy_channel_both_ways() {
    init_tracing();
    let pair = LinkPair::new(
        fast_config(),
        ImpairmentConfig::noisy(7),
        ImpairmentConfig::noisy(8),
    )
    .unwrap();

    let forward = pattern(20_000, 0x66);
    let backward = pattern(6_000, 0x77);
    thread::scope(|s| {
        let back = s.spawn(|| {
            pair.right.write(&backward).unwrap();
        });
        assert_eq!(pair.transfer(&forward, Duration::from_secs(60)).unwrap(), forward);
        back.join().unwrap();
    });
    assert_eq!(read_exactly(&pair.left, backward.len(), Duration::from_secs(60)).unwrap(), backward);

    let left = pair.left.stats();
    let imp = pair.left_tx.impairment_stats();
    assert!(imp.dropped > 0 && imp.corrupted > 0);
    assert!(left.retransmissions() > 0);
    assert!(pair.right.stats().noise_bytes > 0);
    tracing::info!(stats = %serde_json::to_string(&left).unwrap(), "noisy channel run");
}

// ─── Flow Control ───────────────────────────────────────────────────────────

#[test]
fn writer_blocks_until_reader_drains() {
    init_tracing();
    let config = LinkConfig {
        read_queue_capacity: MAX_PAYLOAD,
        window: 8,
        ..fast_config()
    };
    let pair = LinkPair::clean(config).unwrap();
    let msg = pattern(MAX_PAYLOAD * 40, 0x12);
    let done = AtomicBool::new(false);

    thread::scope(|s| {
        s.spawn(|| {
            pair.left.write(&msg).unwrap();
            done.store(true, Ordering::SeqCst);
        });
        thread::sleep(Duration::from_millis(300));
        assert!(!done.load(Ordering::SeqCst), "write finished without a reader");
        assert!(pair.left.pending_frames() > 0);

        let got = read_exactly(&pair.right, msg.len(), LONG).unwrap();
        assert_eq!(got, msg);
    });
    assert!(done.load(Ordering::SeqCst));
}

// ─── Transport Failures ─────────────────────────────────────────────────────

#[test]
fn send_failure_surfaces_once_and_frame_is_retried() {
    init_tracing();
    let pair = LinkPair::clean(fast_config()).unwrap();
    pair.left_tx.set_down(true);
    assert_eq!(pair.left.write(b"first").unwrap(), 5);
    assert!(wait_for(Duration::from_secs(5), || pair.left.stats().transport_errors > 0));

    match pair.left.write(b"second") {
        Err(LinkError::Transport(TransportError::Disconnected)) => {}
        other => panic!("expected parked transport error, got {other:?}"),
    }

    pair.left_tx.set_down(false);
    assert_eq!(read_exactly(&pair.right, 5, LONG).unwrap(), b"first");
    // A retransmission may have failed just before the channel came back.
    let written = loop {
        match pair.left.write(b"third") {
            Err(LinkError::Transport(_)) => continue,
            other => break other.unwrap(),
        }
    };
    assert_eq!(written, 5);
    assert_eq!(read_exactly(&pair.right, 5, LONG).unwrap(), b"third");
}

#[test]
fn close_lingers_until_outstanding_frames_are_acknowledged() {
    init_tracing();
    let config = LinkConfig {
        close_linger: Duration::from_secs(10),
        ..fast_config()
    };
    let lossy = ImpairmentConfig {
        loss_percent: 30.0,
        seed: 5,
        ..ImpairmentConfig::clean()
    };
    let pair = LinkPair::new(config, lossy, ImpairmentConfig::clean()).unwrap();
    let msg = pattern(MAX_PAYLOAD * 4, 0x21);
    pair.left.write(&msg).unwrap();
    pair.left.close().unwrap();

    // Everything reached the peer before the link let go.
    assert_eq!(read_exactly(&pair.right, msg.len(), LONG).unwrap(), msg);
    assert_eq!(pair.left.pending_frames(), 0);
}
