//! Persistence Adapters - JSONL-based File Storage
//!
//! Implements the `PriceHistory` port with append-only daily JSONL
//! files. No database dependency.

pub mod price_log;

pub use price_log::JsonlPriceLog;
