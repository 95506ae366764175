use chrono::{DateTime, Days, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use motoshop_core::{DomainError, DomainResult, Entity, ProductId};
use motoshop_events::Event;

/// Stock movement identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MovementId(pub Uuid);

impl MovementId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for MovementId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for MovementId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Movement type.
///
/// `In` adds `quantity`, `Out` removes it, `Adjust` sets stock to exactly `quantity`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MovementKind {
    In,
    Out,
    Adjust,
}

impl MovementKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MovementKind::In => "IN",
            MovementKind::Out => "OUT",
            MovementKind::Adjust => "ADJUST",
        }
    }
}

impl core::fmt::Display for MovementKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for MovementKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "IN" => Ok(MovementKind::In),
            "OUT" => Ok(MovementKind::Out),
            "ADJUST" => Ok(MovementKind::Adjust),
            other => Err(DomainError::invalid_argument(format!(
                "unknown movement type '{other}'"
            ))),
        }
    }
}

/// What caused a movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    PurchaseOrder,
    SalesOrder,
    SalesOrderCancellation,
    ManualAdjustment,
    OpeningBalance,
}

impl ReferenceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ReferenceKind::PurchaseOrder => "purchase_order",
            ReferenceKind::SalesOrder => "sales_order",
            ReferenceKind::SalesOrderCancellation => "sales_order_cancellation",
            ReferenceKind::ManualAdjustment => "manual_adjustment",
            ReferenceKind::OpeningBalance => "opening_balance",
        }
    }
}

impl core::str::FromStr for ReferenceKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "purchase_order" => Ok(ReferenceKind::PurchaseOrder),
            "sales_order" => Ok(ReferenceKind::SalesOrder),
            "sales_order_cancellation" => Ok(ReferenceKind::SalesOrderCancellation),
            "manual_adjustment" => Ok(ReferenceKind::ManualAdjustment),
            "opening_balance" => Ok(ReferenceKind::OpeningBalance),
            other => Err(DomainError::invalid_argument(format!(
                "unknown reference kind '{other}'"
            ))),
        }
    }
}

/// Command: post a movement against a product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostMovement {
    pub movement_id: MovementId,
    pub product_id: ProductId,
    pub kind: MovementKind,
    pub quantity: i64,
    pub reference_id: Option<String>,
    pub reference_kind: Option<ReferenceKind>,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: an immutable, append-only stock movement.
///
/// `stock_before`/`stock_after` make every movement's signed contribution
/// explicit, including absolute `Adjust` movements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub movement_id: MovementId,
    pub product_id: ProductId,
    pub kind: MovementKind,
    pub quantity: i64,
    pub stock_before: i64,
    pub stock_after: i64,
    pub reference_id: Option<String>,
    pub reference_kind: Option<ReferenceKind>,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl StockMovement {
    /// Signed change this movement made to the product's stock.
    pub fn signed_delta(&self) -> i64 {
        self.stock_after - self.stock_before
    }
}

impl Entity for StockMovement {
    type Id = MovementId;

    fn entity_id(&self) -> &Self::Id {
        &self.movement_id
    }
}

impl Event for StockMovement {
    fn event_type(&self) -> &'static str {
        match self.kind {
            MovementKind::In => "inventory.stock.in",
            MovementKind::Out => "inventory.stock.out",
            MovementKind::Adjust => "inventory.stock.adjust",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}

/// Stock implied by a movement history: the sum of signed deltas.
pub fn replay_stock<'a>(movements: impl IntoIterator<Item = &'a StockMovement>) -> i64 {
    movements.into_iter().map(StockMovement::signed_delta).sum()
}

/// Optional, inclusive time window for movement history queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HistoryRange {
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
}

impl HistoryRange {
    /// Unbounded range.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn new(from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> DomainResult<Self> {
        if let (Some(from), Some(to)) = (from, to) {
            if from > to {
                return Err(DomainError::validation(
                    "history range start must not be after its end",
                ));
            }
        }
        Ok(Self { from, to })
    }

    /// Calendar-day bounds: `from` at 00:00 UTC through the end of `to`.
    pub fn days(from: Option<NaiveDate>, to: Option<NaiveDate>) -> DomainResult<Self> {
        let start = from.map(|d| d.and_time(NaiveTime::MIN).and_utc());
        let end = match to {
            Some(d) => {
                let next = d
                    .checked_add_days(Days::new(1))
                    .ok_or_else(|| DomainError::validation("history range end out of range"))?;
                Some(next.and_time(NaiveTime::MIN).and_utc() - chrono::Duration::nanoseconds(1))
            }
            None => None,
        };
        Self::new(start, end)
    }

    pub fn from(&self) -> Option<DateTime<Utc>> {
        self.from
    }

    pub fn to(&self) -> Option<DateTime<Utc>> {
        self.to
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.from.is_none_or(|f| at >= f) && self.to.is_none_or(|t| at <= t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn movement_kind_parses_case_insensitively() {
        assert_eq!("in".parse::<MovementKind>().unwrap(), MovementKind::In);
        assert_eq!(" OUT ".parse::<MovementKind>().unwrap(), MovementKind::Out);
        assert_eq!("Adjust".parse::<MovementKind>().unwrap(), MovementKind::Adjust);
    }

    #[test]
    fn unknown_movement_kind_is_an_invalid_argument() {
        let err = "transfer".parse::<MovementKind>().unwrap_err();
        assert!(matches!(err, DomainError::InvalidArgument(msg) if msg.contains("transfer")));
    }

    #[test]
    fn reference_kind_round_trips_through_its_label() {
        for kind in [
            ReferenceKind::PurchaseOrder,
            ReferenceKind::SalesOrder,
            ReferenceKind::SalesOrderCancellation,
            ReferenceKind::ManualAdjustment,
            ReferenceKind::OpeningBalance,
        ] {
            assert_eq!(kind.as_str().parse::<ReferenceKind>().unwrap(), kind);
        }
    }

    #[test]
    fn day_range_includes_the_whole_last_day() {
        let d = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        let range = HistoryRange::days(Some(d), Some(d)).unwrap();

        assert!(range.contains(Utc.with_ymd_and_hms(2024, 3, 15, 0, 0, 0).unwrap()));
        assert!(range.contains(Utc.with_ymd_and_hms(2024, 3, 15, 23, 59, 59).unwrap()));
        assert!(!range.contains(Utc.with_ymd_and_hms(2024, 3, 16, 0, 0, 0).unwrap()));
        assert!(!range.contains(Utc.with_ymd_and_hms(2024, 3, 14, 23, 59, 59).unwrap()));
    }

    #[test]
    fn inverted_range_is_rejected() {
        let later = Utc.with_ymd_and_hms(2024, 3, 16, 0, 0, 0).unwrap();
        let earlier = Utc.with_ymd_and_hms(2024, 3, 15, 0, 0, 0).unwrap();
        assert!(HistoryRange::new(Some(later), Some(earlier)).is_err());
        assert!(HistoryRange::all().contains(later));
    }
}
