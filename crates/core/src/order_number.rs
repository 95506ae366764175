//! Human-readable order numbers: `<KIND>-<YYYYMMDD>-<SEQ>`.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::value_object::ValueObject;

/// Which numbering series an order belongs to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderKind {
    Purchase,
    Sales,
}

impl OrderKind {
    /// Series letters printed at the start of every number.
    pub fn letters(self) -> &'static str {
        match self {
            OrderKind::Purchase => "OC",
            OrderKind::Sales => "OV",
        }
    }

    /// Prefix shared by all numbers of this kind issued on `date`.
    pub fn prefix(self, date: NaiveDate) -> String {
        format!("{}-{}", self.letters(), date.format("%Y%m%d"))
    }
}

/// A generated order number, e.g. `OV-20240315-0007`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderNumber(String);

impl ValueObject for OrderNumber {}

impl OrderNumber {
    /// Format the `sequence`-th number under `prefix` (zero-padded to four digits).
    pub fn format(prefix: &str, sequence: u32) -> Self {
        Self(format!("{prefix}-{sequence:04}"))
    }

    pub fn new(kind: OrderKind, date: NaiveDate, sequence: u32) -> Self {
        Self::format(&kind.prefix(date), sequence)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Trailing sequence number, if the value ends in `-<digits>`.
    pub fn sequence(&self) -> Option<u32> {
        sequence_of(&self.0)
    }

    /// Prefix (everything before the last `-`).
    pub fn prefix(&self) -> &str {
        self.0.rsplit_once('-').map(|(p, _)| p).unwrap_or(&self.0)
    }
}

/// Sequence suffix of a raw order number string.
pub fn sequence_of(number: &str) -> Option<u32> {
    number.rsplit_once('-')?.1.parse().ok()
}

impl core::fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl core::str::FromStr for OrderNumber {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if sequence_of(s).is_none() {
            return Err(DomainError::invalid_id(format!("OrderNumber: '{s}'")));
        }
        Ok(Self(s.to_string()))
    }
}
