//! Ports Layer - Hexagonal Architecture Boundaries
//!
//! Defines the interfaces (traits) that the use cases require from the
//! outside world. Adapters implement these traits.
//!
//! Port categories:
//! - `FeedConnector`: Source-specific streaming protocol
//! - `Notifier`: Alert delivery
//! - `PriceHistory`: Change-only price persistence
//! - `Clock`: Injectable wall-clock time

pub mod clock;
pub mod feed_connector;
pub mod notifier;
pub mod price_history;

pub use clock::{Clock, ManualClock, SystemClock};
pub use feed_connector::{ConnectionState, FeedCommand, FeedConnector, FeedHandle, Quote};
pub use notifier::Notifier;
pub use price_history::{PriceChange, PriceHistory};
