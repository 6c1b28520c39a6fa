//! # Link statistics
//!
//! Workers bump relaxed atomic counters; [`LinkCounters::snapshot`] copies
//! them into a serialisable [`LinkStats`].

use std::sync::atomic::{AtomicU64, Ordering};

use quanta::Instant;
use serde::Serialize;

/// Live counters shared by a link's workers.
#[derive(Debug)]
pub struct LinkCounters {
    opened_at: Instant,
    pub data_frames_sent: AtomicU64,
    pub timeout_retransmits: AtomicU64,
    pub nack_retransmits: AtomicU64,
    pub acks_sent: AtomicU64,
    pub nacks_sent: AtomicU64,
    pub acks_received: AtomicU64,
    pub nacks_received: AtomicU64,
    pub frames_received: AtomicU64,
    pub checksum_failures: AtomicU64,
    pub protocol_violations: AtomicU64,
    pub duplicates: AtomicU64,
    pub ahead_of_window: AtomicU64,
    pub discarded_draining: AtomicU64,
    pub meta_overflow: AtomicU64,
    pub bytes_written: AtomicU64,
    pub bytes_delivered: AtomicU64,
    pub noise_bytes: AtomicU64,
    pub transport_errors: AtomicU64,
}

impl Default for LinkCounters {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkCounters {
    pub fn new() -> Self {
        LinkCounters {
            opened_at: Instant::now(),
            data_frames_sent: AtomicU64::new(0),
            timeout_retransmits: AtomicU64::new(0),
            nack_retransmits: AtomicU64::new(0),
            acks_sent: AtomicU64::new(0),
            nacks_sent: AtomicU64::new(0),
            acks_received: AtomicU64::new(0),
            nacks_received: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
            checksum_failures: AtomicU64::new(0),
            protocol_violations: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
            ahead_of_window: AtomicU64::new(0),
            discarded_draining: AtomicU64::new(0),
            meta_overflow: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
            bytes_delivered: AtomicU64::new(0),
            noise_bytes: AtomicU64::new(0),
            transport_errors: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> LinkStats {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        LinkStats {
            data_frames_sent: get(&self.data_frames_sent),
            timeout_retransmits: get(&self.timeout_retransmits),
            nack_retransmits: get(&self.nack_retransmits),
            acks_sent: get(&self.acks_sent),
            nacks_sent: get(&self.nacks_sent),
            acks_received: get(&self.acks_received),
            nacks_received: get(&self.nacks_received),
            frames_received: get(&self.frames_received),
            checksum_failures: get(&self.checksum_failures),
            protocol_violations: get(&self.protocol_violations),
            duplicates: get(&self.duplicates),
            ahead_of_window: get(&self.ahead_of_window),
            discarded_draining: get(&self.discarded_draining),
            meta_overflow: get(&self.meta_overflow),
            bytes_written: get(&self.bytes_written),
            bytes_delivered: get(&self.bytes_delivered),
            noise_bytes: get(&self.noise_bytes),
            transport_errors: get(&self.transport_errors),
            uptime_ms: self.opened_at.elapsed().as_millis() as u64,
        }
    }
}

/// Point-in-time copy of a link's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LinkStats {
    /// Data frames put on the channel, retransmissions included.
    pub data_frames_sent: u64,
    /// Re-arms caused by the watchdog.
    pub timeout_retransmits: u64,
    /// Re-arms caused by a peer NACK.
    pub nack_retransmits: u64,
    pub acks_sent: u64,
    pub nacks_sent: u64,
    pub acks_received: u64,
    pub nacks_received: u64,
    /// Frames that passed validation, any kind.
    pub frames_received: u64,
    pub checksum_failures: u64,
    /// Frames dropped for bad header, length, kind or sequence number.
    pub protocol_violations: u64,
    /// Data frames received again after being stored or delivered.
    pub duplicates: u64,
    pub ahead_of_window: u64,
    /// Data frames dropped because the link was draining.
    pub discarded_draining: u64,
    /// ACK/NACK frames dropped because the meta queue stayed full.
    pub meta_overflow: u64,
    pub bytes_written: u64,
    pub bytes_delivered: u64,
    /// Bytes skipped while hunting for a synchronisation tag.
    pub noise_bytes: u64,
    pub transport_errors: u64,
    pub uptime_ms: u64,
}

impl LinkStats {
    /// Retransmissions of either cause.
    pub fn retransmissions(&self) -> u64 {
        self.timeout_retransmits + self.nack_retransmits
    }

    /// Share of sent data frames that were retransmissions.
    pub fn retransmit_ratio(&self) -> f64 {
        if self.data_frames_sent == 0 {
            0.0
        } else {
            self.retransmissions() as f64 / self.data_frames_sent as f64
        }
    }
}
