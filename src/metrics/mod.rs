//! Operational metrics
//!
//! Thin wrappers over the `metrics` facade. No recorder is installed by
//! this crate; without one every call is a no-op.

pub mod counters;
pub mod histograms;
pub mod labels;
