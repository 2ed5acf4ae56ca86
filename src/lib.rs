//! Ratewindow - Per-key Fixed-Window Request Limiting
//!
//! This crate decides, for a caller key and a configured limit, whether a
//! request may proceed. Requests are counted in fixed 60-second windows and
//! the window state is persisted through a pluggable keyed store, so separate
//! request handlers (or separate processes sharing a directory) see the same
//! counts.

pub mod clock;
pub mod config;
pub mod error;
pub mod ratelimit;
pub mod store;

pub use error::{RateWindowError, Result};
