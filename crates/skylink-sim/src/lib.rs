//! Radio simulation toolkit for integration testing.
//!
//! Provides in-memory radio channel pairs with seeded impairment (loss, bit
//! corruption, duplication, noise, chunked delivery), per-frame taps for
//! targeted damage, a recording register bus for the radio side-channel,
//! and a two-link harness.

pub mod bus;
pub mod channel;
pub mod harness;
pub mod impairment;

pub use channel::{sim_pair, SimChannel, SimControl, TapAction};
pub use harness::LinkPair;
pub use impairment::{Impairment, ImpairmentConfig, ImpairmentStats};
