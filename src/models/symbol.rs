//! # models::symbol
//!
//! [`Symbol`] — exchange-scoped instrument identifier, e.g. `"BTCUSDT"`.
//!
//! Symbols are normalised on construction (trimmed, upper-cased) so that
//! `"btcusdt"` from one agent and `"BTCUSDT"` from the exchange key the same
//! Position Store slot.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Immutable instrument identifier. Ordered by name so bundle output is
/// deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Symbol(String);

impl Symbol {
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_uppercase())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Symbol {
    fn from(raw: String) -> Self {
        Self::new(raw)
    }
}

impl From<&str> for Symbol {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<Symbol> for String {
    fn from(symbol: Symbol) -> Self {
        symbol.0
    }
}
