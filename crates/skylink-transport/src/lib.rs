//! # skylink-transport
//!
//! Reliable, ordered byte links over a noisy half-duplex packet radio.
//!
//! Application bytes are cut into fixed 146-byte frames carrying up to 128
//! payload bytes, a sequence number and a CRC-CCITT frame check. Each data
//! frame is acknowledged individually; damaged frames are NACKed, lost ones
//! are retransmitted by a watchdog, and the receiver delivers payloads in
//! sequence order.
//!
//! ## Crate structure
//!
//! - [`frame`]: Wire frame layout, encode/decode, frame errors
//! - [`crc`]: CRC-CCITT frame check sequence
//! - [`stack`]: Sequence-indexed slot stacks and send/receive windows
//! - [`finder`]: Sync-tag frame recovery from the raw byte stream
//! - [`link`]: One logical link and its worker threads
//! - [`registry`]: Device pool, link ids and modes
//! - [`channel`]: Byte channel trait and in-memory channel pair
//! - [`fifo`] / [`wait`]: Bounded byte queues and wait queues
//! - [`config`]: Link tunables and TOML loading
//! - [`radio`]: Transceiver register configuration
//! - [`stats`]: Per-link counters and snapshots
//! - [`error`]: Error types

pub mod channel;
pub mod config;
pub mod crc;
mod delivery;
pub mod error;
pub mod fifo;
pub mod finder;
pub mod frame;
pub mod link;
pub mod radio;
pub mod registry;
mod scheduler;
pub mod stack;
pub mod stats;
pub mod wait;
mod watchdog;

pub use channel::{memory_pair, Channel, MemoryChannel};
pub use config::{LinkConfig, SkylinkConfig};
pub use error::{LinkError, Result, TransportError};
pub use frame::{Frame, FrameError, FrameKind, FRAME_LEN, MAX_PAYLOAD, SEQ_LIMIT};
pub use link::{Link, LinkState};
pub use registry::{LinkId, LinkMode, LinkRegistry};
pub use stats::LinkStats;
