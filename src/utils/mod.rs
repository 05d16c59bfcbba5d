//! Utility functions shared by the platform backends and the auditor.

pub mod alignment;
pub mod metrics;

pub use alignment::{align_down, is_aligned, page_size};
pub use metrics::{get_stats, reset_stats, LocalityStats, Operation};
