//! Address and transaction-id newtypes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AddressError {
    #[error("address must not be empty")]
    Empty,

    #[error("txid must be 64 lowercase hex characters, got {0:?}")]
    BadTxid(String),
}

/// A Bitcoin address, held as an opaque validated string.
///
/// The core never derives or signs for addresses; script construction is
/// delegated to the protocol layer, so the only invariant enforced here is
/// non-emptiness.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BitcoinAddress(String);

impl BitcoinAddress {
    pub fn new(raw: impl Into<String>) -> Result<Self, AddressError> {
        let s = raw.into();
        if s.trim().is_empty() {
            return Err(AddressError::Empty);
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for logs: first and last eight characters.
    pub fn abbrev(&self) -> String {
        if self.0.len() <= 16 {
            return self.0.clone();
        }
        format!("{}...{}", &self.0[..8], &self.0[self.0.len() - 8..])
    }
}

impl fmt::Display for BitcoinAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for BitcoinAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// A transaction id: 64 lowercase hex characters.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Txid(String);

impl Txid {
    pub fn new(raw: impl Into<String>) -> Result<Self, AddressError> {
        let s = raw.into();
        if s.len() != 64 || !s.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()) {
            return Err(AddressError::BadTxid(s));
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Txid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Txid {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}
