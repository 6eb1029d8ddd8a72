//! # UI Module
//!
//! Plain-text rendering of queue state for chat replies: durations, queue lines
//! and splitting long replies into transport-sized messages.

pub mod format;
