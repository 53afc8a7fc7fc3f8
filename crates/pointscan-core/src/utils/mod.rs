//! Utility functions for display formatting.

pub mod format;

pub use format::{age_display, format_scan_time, last_sync_display};
