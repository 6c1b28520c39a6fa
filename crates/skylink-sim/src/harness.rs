//! Two links joined by a simulated radio, plus helpers for driving them.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use skylink_transport::{Link, LinkConfig, LinkId, LinkMode};

use crate::channel::{sim_pair, SimControl};
use crate::impairment::ImpairmentConfig;

/// Install a test-friendly tracing subscriber once (honours `RUST_LOG`).
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Timings scaled for tests: 10 ms watchdog ticks, 200 ms retransmit timeout.
pub fn fast_config() -> LinkConfig {
    LinkConfig {
        watchdog_period: Duration::from_millis(10),
        retry_threshold: 20,
        transmit_idle: Duration::from_millis(5),
        frame_wait: Duration::from_millis(50),
        read_timeout: Duration::from_millis(100),
        close_linger: Duration::from_millis(300),
        error_backoff: Duration::from_millis(5),
        ..LinkConfig::default()
    }
}

/// A left and a right link over one simulated radio.
pub struct LinkPair {
    pub left: Link,
    pub right: Link,
    /// Controls what `left` transmits.
    pub left_tx: SimControl,
    /// Controls what `right` transmits.
    pub right_tx: SimControl,
}

impl LinkPair {
    pub fn new(
        config: LinkConfig,
        left_to_right: ImpairmentConfig,
        right_to_left: ImpairmentConfig,
    ) -> anyhow::Result<Self> {
        let (a, b) = sim_pair(left_to_right, right_to_left, Duration::from_millis(5));
        let (left_tx, right_tx) = (a.control(), b.control());
        let left = Link::open(LinkId(1), LinkMode::Duplex, "sim-left", Arc::new(a), config.clone())
            .context("opening left link")?;
        let right = Link::open(LinkId(2), LinkMode::Duplex, "sim-right", Arc::new(b), config)
            .context("opening right link")?;
        Ok(Self {
            left,
            right,
            left_tx,
            right_tx,
        })
    }

    pub fn clean(config: LinkConfig) -> anyhow::Result<Self> {
        Self::new(config, ImpairmentConfig::clean(), ImpairmentConfig::clean())
    }

    /// Write `data` on the left while reading it on the right. A failed read
    /// leaves the left link draining.
    pub fn transfer(&self, data: &[u8], timeout: Duration) -> anyhow::Result<Vec<u8>> {
        thread::scope(|s| {
            let writer = s.spawn(|| self.left.write(data));
            let received = read_exactly(&self.right, data.len(), timeout);
            if received.is_err() {
                // Unblocks a writer stuck on a full window.
                self.left.drain();
            }
            let written = writer
                .join()
                .map_err(|_| anyhow::anyhow!("writer thread panicked"))??;
            if written != data.len() {
                bail!("short write: {written} of {} bytes", data.len());
            }
            received
        })
    }
}

/// Read exactly `len` bytes from `link` or fail after `timeout`.
pub fn read_exactly(link: &Link, len: usize, timeout: Duration) -> anyhow::Result<Vec<u8>> {
    let start = Instant::now();
    let mut out = Vec::with_capacity(len);
    while out.len() < len {
        if start.elapsed() > timeout {
            bail!("read {} of {len} bytes before timeout", out.len());
        }
        let chunk = link.read(len - out.len())?;
        out.extend_from_slice(&chunk);
    }
    Ok(out)
}

/// Poll `cond` until it holds or `timeout` passes.
pub fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while !cond() {
        if start.elapsed() > timeout {
            return false;
        }
        thread::sleep(Duration::from_millis(2));
    }
    true
}

/// Deterministic test payload.
pub fn pattern(len: usize, salt: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31) ^ salt).collect()
}
