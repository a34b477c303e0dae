//! Use Cases Layer - Tracker Runtime
//!
//! Orchestrates domain logic through port interfaces:
//! - `PriceCache`: latest sample per instrument, snapshots per tick
//! - `DerivedRegistry`: periodic formula recomputation
//! - `AlertEngine`: rule evaluation and notification dispatch
//! - `ChangeRecorder`: change-only price history
//! - `Tracker`: the runtime context tying them together

pub mod alert_engine;
pub mod derived_registry;
pub mod price_cache;
pub mod recorder;
pub mod tracker;

pub use alert_engine::{AlertEngine, NewAlert};
pub use derived_registry::DerivedRegistry;
pub use price_cache::{PriceCache, PriceView, Snapshot};
pub use recorder::ChangeRecorder;
pub use tracker::{Tracker, TrackerParts};
