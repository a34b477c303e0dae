//! Domain layer - Core price-tracking types and pure logic.
//!
//! No I/O here (hexagonal architecture inner ring): instrument keys,
//! the restricted expression language, alert rule bookkeeping and
//! derived instruments. Everything is testable in isolation.

pub mod alert;
pub mod derived;
pub mod error;
pub mod expression;
pub mod instrument;

pub use alert::{AlertRule, AlertView, EnableOptions};
pub use derived::{DerivedInstrument, DerivedView};
pub use error::{FeedError, NotificationError, TrackerError};
pub use expression::{EvaluationError, Expression, ValidationError, Value, Variables};
pub use instrument::{CALCULATED_SOURCE, PriceSample, canonicalize, derived_key, price_key};
