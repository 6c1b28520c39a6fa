//! # Link and radio configuration
//!
//! Tunables are deserialised from TOML into all-optional `*Input` structs and
//! resolved into validated configs with defaults filled in.
//!
//! ```toml
//! version = 1
//!
//! [link]
//! window = 42
//! watchdog_period_ms = 100
//! retry_threshold = 20
//! write_timeout_ms = 5000
//!
//! [radio]
//! frequency_khz = 433050
//! power_dbm = 10
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::frame::{FRAME_LEN, MAX_PAYLOAD};
use crate::radio::RadioSettings;
use crate::stack::MAX_WINDOW;

pub const CONFIG_VERSION: u32 = 1;

// ─── Input (TOML) ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SkylinkConfigInput {
    pub version: u32,
    pub link: LinkConfigInput,
    pub radio: RadioSettingsInput,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LinkConfigInput {
    pub window: Option<usize>,
    pub watchdog_period_ms: Option<u64>,
    pub retry_threshold: Option<u16>,
    pub transmit_idle_ms: Option<u64>,
    pub frame_wait_ms: Option<u64>,
    pub read_timeout_ms: Option<u64>,
    pub write_timeout_ms: Option<u64>,
    pub raw_queue_capacity: Option<usize>,
    pub read_queue_capacity: Option<usize>,
    pub meta_queue_capacity: Option<usize>,
    pub recv_chunk: Option<usize>,
    pub close_linger_ms: Option<u64>,
    pub error_backoff_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RadioSettingsInput {
    pub frequency_khz: Option<u32>,
    pub power_dbm: Option<i32>,
    pub bitrate_bps: Option<u32>,
    pub preamble_nibbles: Option<u8>,
    pub sync_word: Option<u32>,
}

// ─── Resolved ───────────────────────────────────────────────────────────────

/// Per-link protocol tunables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkConfig {
    /// Maximum consecutive sequence numbers outstanding at the sender.
    pub window: usize,
    /// Watchdog tick interval.
    pub watchdog_period: Duration,
    /// Ticks an unacknowledged frame waits before it is re-armed.
    pub retry_threshold: u16,
    /// Bounded idle wait of the transmit scheduler and queue producers.
    pub transmit_idle: Duration,
    /// How long the frame finder waits for the rest of a frame after a tag.
    pub frame_wait: Duration,
    /// How long `read` waits for the requested byte count.
    pub read_timeout: Duration,
    /// How long `write` waits for a free slot; `None` blocks until one frees.
    pub write_timeout: Option<Duration>,
    pub raw_queue_capacity: usize,
    pub read_queue_capacity: usize,
    pub meta_queue_capacity: usize,
    /// Largest single channel read.
    pub recv_chunk: usize,
    /// How long `close` waits for outstanding frames to be acknowledged.
    pub close_linger: Duration,
    /// Pause after a failed channel receive.
    pub error_backoff: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            window: MAX_WINDOW,
            watchdog_period: Duration::from_millis(100),
            retry_threshold: 20,
            transmit_idle: Duration::from_millis(50),
            frame_wait: Duration::from_millis(500),
            read_timeout: Duration::from_secs(1),
            write_timeout: None,
            raw_queue_capacity: 4096,
            read_queue_capacity: 4096,
            meta_queue_capacity: 256,
            recv_chunk: FRAME_LEN,
            close_linger: Duration::from_secs(2),
            error_backoff: Duration::from_millis(20),
        }
    }
}

impl LinkConfig {
    /// Time after which an unacknowledged frame is sent again.
    pub fn retransmit_timeout(&self) -> Duration {
        self.watchdog_period * u32::from(self.retry_threshold)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.window == 0 || self.window > MAX_WINDOW {
            return Err(format!("window must be within 1..={MAX_WINDOW}, got {}", self.window));
        }
        if self.retry_threshold == 0 {
            return Err("retry_threshold must be at least 1".into());
        }
        for (name, d) in [
            ("watchdog_period", self.watchdog_period),
            ("transmit_idle", self.transmit_idle),
            ("frame_wait", self.frame_wait),
        ] {
            if d.is_zero() {
                return Err(format!("{name} must be non-zero"));
            }
        }
        if self.read_queue_capacity < MAX_PAYLOAD {
            return Err(format!(
                "read_queue_capacity must hold one payload ({MAX_PAYLOAD} bytes)"
            ));
        }
        if self.raw_queue_capacity < FRAME_LEN {
            return Err(format!("raw_queue_capacity must hold one frame ({FRAME_LEN} bytes)"));
        }
        if self.recv_chunk == 0 || self.recv_chunk > self.raw_queue_capacity {
            return Err("recv_chunk must be within 1..=raw_queue_capacity".into());
        }
        if self.meta_queue_capacity == 0 {
            return Err("meta_queue_capacity must be non-zero".into());
        }
        Ok(())
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default)]
pub struct SkylinkConfig {
    pub version: u32,
    pub link: LinkConfig,
    pub radio: RadioSettings,
}

impl SkylinkConfigInput {
    pub fn resolve(self) -> Result<SkylinkConfig, String> {
        let version = if self.version == 0 {
            CONFIG_VERSION
        } else {
            self.version
        };
        if version != CONFIG_VERSION {
            return Err(format!("Unsupported config version {}", version));
        }

        let d = LinkConfig::default();
        let l = self.link;
        let ms = Duration::from_millis;
        let link = LinkConfig {
            window: l.window.unwrap_or(d.window),
            watchdog_period: l.watchdog_period_ms.map(ms).unwrap_or(d.watchdog_period),
            retry_threshold: l.retry_threshold.unwrap_or(d.retry_threshold),
            transmit_idle: l.transmit_idle_ms.map(ms).unwrap_or(d.transmit_idle),
            frame_wait: l.frame_wait_ms.map(ms).unwrap_or(d.frame_wait),
            read_timeout: l.read_timeout_ms.map(ms).unwrap_or(d.read_timeout),
            write_timeout: l.write_timeout_ms.map(ms),
            raw_queue_capacity: l.raw_queue_capacity.unwrap_or(d.raw_queue_capacity),
            read_queue_capacity: l.read_queue_capacity.unwrap_or(d.read_queue_capacity),
            meta_queue_capacity: l.meta_queue_capacity.unwrap_or(d.meta_queue_capacity),
            recv_chunk: l.recv_chunk.unwrap_or(d.recv_chunk),
            close_linger: l.close_linger_ms.map(ms).unwrap_or(d.close_linger),
            error_backoff: l.error_backoff_ms.map(ms).unwrap_or(d.error_backoff),
        };
        link.validate()?;

        let r = RadioSettings::default();
        let radio = RadioSettings {
            frequency_khz: self.radio.frequency_khz.unwrap_or(r.frequency_khz),
            power_dbm: self.radio.power_dbm.unwrap_or(r.power_dbm),
            bitrate_bps: self.radio.bitrate_bps.unwrap_or(r.bitrate_bps),
            preamble_nibbles: self.radio.preamble_nibbles.unwrap_or(r.preamble_nibbles),
            sync_word: self.radio.sync_word.unwrap_or(r.sync_word),
        };
        radio.validate().map_err(|e| e.to_string())?;

        Ok(SkylinkConfig {
            version,
            link,
            radio,
        })
    }
}

impl SkylinkConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, String> {
        let parsed: SkylinkConfigInput =
            toml::from_str(input).map_err(|e| format!("Invalid TOML config: {}", e))?;
        parsed.resolve()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let cfg = SkylinkConfig::from_toml_str("").unwrap();
        assert_eq!(cfg.version, CONFIG_VERSION);
        assert_eq!(cfg.link, LinkConfig::default());
        assert_eq!(cfg.radio, RadioSettings::default());
        assert_eq!(cfg.link.retransmit_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn link_section_overrides() {
        let toml = r#"
version = 1

[link]
window = 8
watchdog_period_ms = 25
retry_threshold = 4
write_timeout_ms = 750
read_queue_capacity = 512
"#;
        let cfg = SkylinkConfig::from_toml_str(toml).unwrap();
        assert_eq!(cfg.link.window, 8);
        assert_eq!(cfg.link.watchdog_period, Duration::from_millis(25));
        assert_eq!(cfg.link.retry_threshold, 4);
        assert_eq!(cfg.link.write_timeout, Some(Duration::from_millis(750)));
        assert_eq!(cfg.link.read_queue_capacity, 512);
        assert_eq!(cfg.link.retransmit_timeout(), Duration::from_millis(100));
    }

    #[test]
    fn radio_section_overrides() {
        let toml = r#"
[radio]
frequency_khz = 434000
power_dbm = 4
bitrate_bps = 9600
preamble_nibbles = 10
sync_word = 0x2DD40000
"#;
        let cfg = SkylinkConfig::from_toml_str(toml).unwrap();
        assert_eq!(cfg.radio.frequency_khz, 434_000);
        assert_eq!(cfg.radio.power_dbm, 4);
        assert_eq!(cfg.radio.bitrate_bps, 9600);
        assert_eq!(cfg.radio.preamble_nibbles, 10);
        assert_eq!(cfg.radio.sync_word, 0x2DD4_0000);
    }

    #[test]
    fn window_above_limit_rejected() {
        let err = SkylinkConfig::from_toml_str("[link]\nwindow = 43\n").unwrap_err();
        assert!(err.contains("window"), "{err}");
    }

    #[test]
    fn zero_retry_threshold_rejected() {
        assert!(SkylinkConfig::from_toml_str("[link]\nretry_threshold = 0\n").is_err());
    }

    #[test]
    fn small_read_queue_rejected() {
        assert!(SkylinkConfig::from_toml_str("[link]\nread_queue_capacity = 64\n").is_err());
    }

    #[test]
    fn out_of_band_frequency_rejected() {
        assert!(SkylinkConfig::from_toml_str("[radio]\nfrequency_khz = 868000\n").is_err());
    }

    #[test]
    fn unsupported_version_rejected() {
        let err = SkylinkConfig::from_toml_str("version = 7\n").unwrap_err();
        assert!(err.contains("Unsupported config version"));
    }

    #[test]
    fn malformed_toml_rejected() {
        let err = SkylinkConfig::from_toml_str("[link\nwindow = 3").unwrap_err();
        assert!(err.starts_with("Invalid TOML config"));
    }
}
