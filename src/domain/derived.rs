//! Derived (calculated) instruments.

use serde::Serialize;

use super::expression::Expression;
use super::instrument::{canonicalize, derived_key};

/// A named value computed from a formula over other instruments.
#[derive(Debug, Clone)]
pub struct DerivedInstrument {
    /// Name as registered (e.g. "BTC_RATIO").
    pub name: String,
    /// Validated numeric formula.
    pub formula: Expression,
    /// Last published value.
    pub price: Option<f64>,
    /// Unix seconds when `price` was published.
    pub timestamp: Option<i64>,
}

impl DerivedInstrument {
    pub fn new(name: impl Into<String>, formula: Expression) -> Self {
        Self {
            name: name.into(),
            formula,
            price: None,
            timestamp: None,
        }
    }

    /// Canonical name used for collision checks.
    pub fn canonical_name(&self) -> String {
        canonicalize(&self.name)
    }

    /// Cache key the value is published under.
    pub fn key(&self) -> String {
        derived_key(&self.name)
    }

    /// Accept a freshly evaluated value. Returns `true` if it differs from
    /// the last published one, in which case price and timestamp move.
    #[allow(clippy::float_cmp)]
    pub fn update(&mut self, value: f64, now: i64) -> bool {
        if self.price == Some(value) {
            return false;
        }
        self.price = Some(value);
        self.timestamp = Some(now);
        true
    }

    pub fn view(&self) -> DerivedView {
        DerivedView {
            name: self.name.clone(),
            formula: self.formula.as_str().to_string(),
            price: self.price,
            timestamp: self.timestamp,
        }
    }
}

/// Listing representation of a derived instrument.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DerivedView {
    pub name: String,
    pub formula: String,
    pub price: Option<f64>,
    pub timestamp: Option<i64>,
}
