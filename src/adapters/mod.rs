//! Adapters Layer - Hexagonal Architecture Outer Ring
//!
//! Implements the port traits defined in `crate::ports` with concrete
//! external dependencies (WebSockets, HTTP, file I/O). Each sub-module
//! groups adapters by infrastructure concern.
//!
//! Adapter categories:
//! - `api`: JSON control API over the tracker (axum + governor)
//! - `feeds`: exchange connectors and the reconnecting feed supervisor
//! - `metrics`: Prometheus metrics export and health checks
//! - `notify`: Telegram and log notifiers
//! - `persistence`: JSONL price-change history

pub mod api;
pub mod feeds;
pub mod metrics;
pub mod notify;
pub mod persistence;
