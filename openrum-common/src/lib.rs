//! Common primitives shared by all openrum crates.
//!
//! This crate contains the small building blocks that everything else sits
//! on: the millisecond [`Timestamp`] used throughout the wire protocol and
//! the provider traits through which the agent obtains time, thread ids,
//! random numbers and session numbers.

#![warn(missing_docs)]

mod providers;
mod time;

pub use self::providers::{
    CurrentThreadId, DefaultRandom, FixedRandom, RandomProvider, SessionIdProvider, SystemTiming,
    ThreadIdProvider, TimingProvider,
};
pub use self::time::Timestamp;
