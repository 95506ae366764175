use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use motoshop_core::{
    Aggregate, AggregateId, AggregateRoot, DomainError, Money, NewLine, OrderLine, OrderNumber,
    SupplierId, append_cancellation_reason, price_lines,
};
use motoshop_events::Event;

/// Purchase order identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PurchaseOrderId(pub AggregateId);

impl PurchaseOrderId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }

    pub fn generate() -> Self {
        Self(AggregateId::new())
    }
}

impl core::fmt::Display for PurchaseOrderId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Purchase order status lifecycle.
///
/// `Pending -> Confirmed -> Received`; `Cancelled` from `Pending` or `Confirmed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PurchaseOrderStatus {
    Pending,
    Confirmed,
    Received,
    Cancelled,
}

impl PurchaseOrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PurchaseOrderStatus::Pending => "pending",
            PurchaseOrderStatus::Confirmed => "confirmed",
            PurchaseOrderStatus::Received => "received",
            PurchaseOrderStatus::Cancelled => "cancelled",
        }
    }
}

impl core::fmt::Display for PurchaseOrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for PurchaseOrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PurchaseOrderStatus::Pending),
            "confirmed" => Ok(PurchaseOrderStatus::Confirmed),
            "received" => Ok(PurchaseOrderStatus::Received),
            "cancelled" => Ok(PurchaseOrderStatus::Cancelled),
            other => Err(DomainError::invalid_argument(format!(
                "unknown purchase order status '{other}'"
            ))),
        }
    }
}

/// Persisted form of a [`PurchaseOrder`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderSnapshot {
    pub order_id: PurchaseOrderId,
    pub order_number: OrderNumber,
    pub supplier_id: SupplierId,
    pub order_date: NaiveDate,
    pub status: PurchaseOrderStatus,
    pub lines: Vec<OrderLine>,
    pub subtotal: Money,
    pub total: Money,
    pub notes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

/// Aggregate root: PurchaseOrder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseOrder {
    id: PurchaseOrderId,
    order_number: Option<OrderNumber>,
    supplier_id: Option<SupplierId>,
    order_date: Option<NaiveDate>,
    status: PurchaseOrderStatus,
    lines: Vec<OrderLine>,
    subtotal: Money,
    notes: String,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl PurchaseOrder {
    /// Create an empty, not-yet-created aggregate instance.
    pub fn empty(id: PurchaseOrderId) -> Self {
        Self {
            id,
            order_number: None,
            supplier_id: None,
            order_date: None,
            status: PurchaseOrderStatus::Pending,
            lines: Vec::new(),
            subtotal: Money::ZERO,
            notes: String::new(),
            created_at: None,
            updated_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn restore(snapshot: PurchaseOrderSnapshot) -> Self {
        Self {
            id: snapshot.order_id,
            order_number: Some(snapshot.order_number),
            supplier_id: Some(snapshot.supplier_id),
            order_date: Some(snapshot.order_date),
            status: snapshot.status,
            lines: snapshot.lines,
            subtotal: snapshot.subtotal,
            notes: snapshot.notes,
            created_at: Some(snapshot.created_at),
            updated_at: Some(snapshot.updated_at),
            version: snapshot.version,
            created: true,
        }
    }

    /// Persisted form; `None` until the order has been created.
    pub fn snapshot(&self) -> Option<PurchaseOrderSnapshot> {
        Some(PurchaseOrderSnapshot {
            order_id: self.id,
            order_number: self.order_number.clone()?,
            supplier_id: self.supplier_id?,
            order_date: self.order_date?,
            status: self.status,
            lines: self.lines.clone(),
            subtotal: self.subtotal,
            total: self.total(),
            notes: self.notes.clone(),
            created_at: self.created_at?,
            updated_at: self.updated_at?,
            version: self.version,
        })
    }

    pub fn id_typed(&self) -> PurchaseOrderId {
        self.id
    }

    pub fn order_number(&self) -> Option<&OrderNumber> {
        self.order_number.as_ref()
    }

    pub fn supplier_id(&self) -> Option<SupplierId> {
        self.supplier_id
    }

    pub fn order_date(&self) -> Option<NaiveDate> {
        self.order_date
    }

    pub fn status(&self) -> PurchaseOrderStatus {
        self.status
    }

    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
    }

    pub fn subtotal(&self) -> Money {
        self.subtotal
    }

    /// Purchase orders carry no discount: the total is the subtotal.
    pub fn total(&self) -> Money {
        self.subtotal
    }

    pub fn notes(&self) -> &str {
        &self.notes
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    pub fn is_created(&self) -> bool {
        self.created
    }
}

impl AggregateRoot for PurchaseOrder {
    type Id = PurchaseOrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreatePurchaseOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePurchaseOrder {
    pub order_id: PurchaseOrderId,
    pub order_number: OrderNumber,
    pub supplier_id: SupplierId,
    pub order_date: NaiveDate,
    pub lines: Vec<NewLine>,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ConfirmPurchaseOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmPurchaseOrder {
    pub order_id: PurchaseOrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReceivePurchaseOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivePurchaseOrder {
    pub order_id: PurchaseOrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelPurchaseOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelPurchaseOrder {
    pub order_id: PurchaseOrderId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PurchaseOrderCommand {
    Create(CreatePurchaseOrder),
    Confirm(ConfirmPurchaseOrder),
    Receive(ReceivePurchaseOrder),
    Cancel(CancelPurchaseOrder),
}

/// Event: PurchaseOrderCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderCreated {
    pub order_id: PurchaseOrderId,
    pub order_number: OrderNumber,
    pub supplier_id: SupplierId,
    pub order_date: NaiveDate,
    pub lines: Vec<OrderLine>,
    pub subtotal: Money,
    pub notes: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PurchaseOrderConfirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderConfirmed {
    pub order_id: PurchaseOrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: GoodsReceived.
///
/// Carries the order number and lines so the receiving workflow can post one
/// `IN` movement per line in the same unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoodsReceived {
    pub order_id: PurchaseOrderId,
    pub order_number: OrderNumber,
    pub lines: Vec<OrderLine>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PurchaseOrderCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderCancelled {
    pub order_id: PurchaseOrderId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PurchaseOrderEvent {
    Created(PurchaseOrderCreated),
    Confirmed(PurchaseOrderConfirmed),
    GoodsReceived(GoodsReceived),
    Cancelled(PurchaseOrderCancelled),
}

impl Event for PurchaseOrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PurchaseOrderEvent::Created(_) => "purchasing.order.created",
            PurchaseOrderEvent::Confirmed(_) => "purchasing.order.confirmed",
            PurchaseOrderEvent::GoodsReceived(_) => "purchasing.order.goods_received",
            PurchaseOrderEvent::Cancelled(_) => "purchasing.order.cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PurchaseOrderEvent::Created(e) => e.occurred_at,
            PurchaseOrderEvent::Confirmed(e) => e.occurred_at,
            PurchaseOrderEvent::GoodsReceived(e) => e.occurred_at,
            PurchaseOrderEvent::Cancelled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for PurchaseOrder {
    type Command = PurchaseOrderCommand;
    type Event = PurchaseOrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            PurchaseOrderEvent::Created(e) => {
                self.id = e.order_id;
                self.order_number = Some(e.order_number.clone());
                self.supplier_id = Some(e.supplier_id);
                self.order_date = Some(e.order_date);
                self.status = PurchaseOrderStatus::Pending;
                self.lines = e.lines.clone();
                self.subtotal = e.subtotal;
                self.notes = e.notes.clone();
                self.created_at = Some(e.occurred_at);
                self.created = true;
            }
            PurchaseOrderEvent::Confirmed(_) => {
                self.status = PurchaseOrderStatus::Confirmed;
            }
            PurchaseOrderEvent::GoodsReceived(_) => {
                self.status = PurchaseOrderStatus::Received;
            }
            PurchaseOrderEvent::Cancelled(e) => {
                if let Some(reason) = &e.reason {
                    self.notes = append_cancellation_reason(&self.notes, reason);
                }
                self.status = PurchaseOrderStatus::Cancelled;
            }
        }

        self.updated_at = Some(event.occurred_at());
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            PurchaseOrderCommand::Create(cmd) => self.handle_create(cmd),
            PurchaseOrderCommand::Confirm(cmd) => self.handle_confirm(cmd),
            PurchaseOrderCommand::Receive(cmd) => self.handle_receive(cmd),
            PurchaseOrderCommand::Cancel(cmd) => self.handle_cancel(cmd),
        }
    }
}

impl PurchaseOrder {
    fn ensure_created(&self, order_id: PurchaseOrderId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("purchase order {order_id}")));
        }
        if self.id != order_id {
            return Err(DomainError::invariant("order_id mismatch"));
        }
        Ok(())
    }

    fn handle_create(
        &self,
        cmd: &CreatePurchaseOrder,
    ) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        if self.created {
            return Err(DomainError::invalid_state("purchase order already exists"));
        }

        let (lines, subtotal) = price_lines(&cmd.lines)?;

        Ok(vec![PurchaseOrderEvent::Created(PurchaseOrderCreated {
            order_id: cmd.order_id,
            order_number: cmd.order_number.clone(),
            supplier_id: cmd.supplier_id,
            order_date: cmd.order_date,
            lines,
            subtotal,
            notes: cmd.notes.clone().unwrap_or_default(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_confirm(
        &self,
        cmd: &ConfirmPurchaseOrder,
    ) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        self.ensure_created(cmd.order_id)?;

        if self.status != PurchaseOrderStatus::Pending {
            return Err(DomainError::invalid_state(format!(
                "only pending purchase orders can be confirmed (status: {})",
                self.status
            )));
        }

        Ok(vec![PurchaseOrderEvent::Confirmed(PurchaseOrderConfirmed {
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_receive(
        &self,
        cmd: &ReceivePurchaseOrder,
    ) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        self.ensure_created(cmd.order_id)?;

        // Invariant: goods are only received against a confirmed order.
        if self.status != PurchaseOrderStatus::Confirmed {
            return Err(DomainError::invalid_state(format!(
                "only confirmed purchase orders can be received (status: {})",
                self.status
            )));
        }

        let order_number = self
            .order_number
            .clone()
            .ok_or_else(|| DomainError::invariant("order number must be set"))?;

        Ok(vec![PurchaseOrderEvent::GoodsReceived(GoodsReceived {
            order_id: cmd.order_id,
            order_number,
            lines: self.lines.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(
        &self,
        cmd: &CancelPurchaseOrder,
    ) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        self.ensure_created(cmd.order_id)?;

        match self.status {
            PurchaseOrderStatus::Pending | PurchaseOrderStatus::Confirmed => {}
            PurchaseOrderStatus::Received => {
                return Err(DomainError::invalid_state(
                    "a received purchase order cannot be cancelled",
                ));
            }
            PurchaseOrderStatus::Cancelled => {
                return Err(DomainError::invalid_state(
                    "purchase order is already cancelled",
                ));
            }
        }

        Ok(vec![PurchaseOrderEvent::Cancelled(PurchaseOrderCancelled {
            order_id: cmd.order_id,
            reason: cmd
                .reason
                .as_deref()
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_string),
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use motoshop_core::{OrderKind, ProductId};

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn test_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 15).unwrap()
    }

    fn created_order(lines: Vec<NewLine>) -> PurchaseOrder {
        let order_id = PurchaseOrderId::generate();
        let mut order = PurchaseOrder::empty(order_id);
        order
            .execute(&PurchaseOrderCommand::Create(CreatePurchaseOrder {
                order_id,
                order_number: OrderNumber::new(OrderKind::Purchase, test_date(), 1),
                supplier_id: SupplierId::new(),
                order_date: test_date(),
                lines,
                notes: None,
                occurred_at: test_time(),
            }))
            .unwrap();
        order
    }

    fn one_line() -> Vec<NewLine> {
        vec![NewLine::new(ProductId::new(), 10, Money::from_minor(1500))]
    }

    fn confirm(order: &mut PurchaseOrder) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        order.execute(&PurchaseOrderCommand::Confirm(ConfirmPurchaseOrder {
            order_id: order.id_typed(),
            occurred_at: test_time(),
        }))
    }

    fn receive(order: &mut PurchaseOrder) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        order.execute(&PurchaseOrderCommand::Receive(ReceivePurchaseOrder {
            order_id: order.id_typed(),
            occurred_at: test_time(),
        }))
    }

    fn cancel(
        order: &mut PurchaseOrder,
        reason: Option<&str>,
    ) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        order.execute(&PurchaseOrderCommand::Cancel(CancelPurchaseOrder {
            order_id: order.id_typed(),
            reason: reason.map(str::to_string),
            occurred_at: test_time(),
        }))
    }

    #[test]
    fn create_prices_lines_and_starts_pending() {
        let a = ProductId::new();
        let b = ProductId::new();
        let order = created_order(vec![
            NewLine::new(a, 3, Money::from_minor(10_000)),
            NewLine::new(b, 1, Money::from_minor(5_000)),
        ]);

        assert_eq!(order.status(), PurchaseOrderStatus::Pending);
        assert_eq!(order.subtotal(), Money::from_minor(35_000));
        assert_eq!(order.total(), order.subtotal());
        assert_eq!(order.lines()[1].line_no, 2);
        assert_eq!(order.version(), 1);
    }

    #[test]
    fn create_without_lines_is_a_validation_error() {
        let order_id = PurchaseOrderId::generate();
        let err = PurchaseOrder::empty(order_id)
            .handle(&PurchaseOrderCommand::Create(CreatePurchaseOrder {
                order_id,
                order_number: OrderNumber::new(OrderKind::Purchase, test_date(), 1),
                supplier_id: SupplierId::new(),
                order_date: test_date(),
                lines: Vec::new(),
                notes: None,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn confirm_is_only_allowed_from_pending() {
        let mut order = created_order(one_line());
        confirm(&mut order).unwrap();
        assert_eq!(order.status(), PurchaseOrderStatus::Confirmed);

        let err = confirm(&mut order).unwrap_err();
        assert!(matches!(err, DomainError::InvalidOrderState(_)));
    }

    #[test]
    fn cannot_receive_before_confirmation() {
        let mut order = created_order(one_line());
        let err = receive(&mut order).unwrap_err();
        assert!(matches!(err, DomainError::InvalidOrderState(_)));
        assert_eq!(order.status(), PurchaseOrderStatus::Pending);
    }

    #[test]
    fn receive_emits_lines_with_the_order_number() {
        let mut order = created_order(one_line());
        confirm(&mut order).unwrap();
        let events = receive(&mut order).unwrap();

        match &events[0] {
            PurchaseOrderEvent::GoodsReceived(e) => {
                assert_eq!(e.order_number.as_str(), "OC-20240315-0001");
                assert_eq!(e.lines.len(), 1);
                assert_eq!(e.lines[0].quantity, 10);
            }
            other => panic!("expected GoodsReceived, got {other:?}"),
        }
        assert_eq!(order.status(), PurchaseOrderStatus::Received);

        // Receiving twice is refused.
        assert!(matches!(
            receive(&mut order).unwrap_err(),
            DomainError::InvalidOrderState(_)
        ));
    }

    #[test]
    fn received_orders_cannot_be_cancelled() {
        let mut order = created_order(one_line());
        confirm(&mut order).unwrap();
        receive(&mut order).unwrap();

        let err = cancel(&mut order, Some("late")).unwrap_err();
        assert!(matches!(err, DomainError::InvalidOrderState(_)));
        assert_eq!(order.notes(), "");
    }

    #[test]
    fn cancel_appends_reason_and_is_final() {
        let mut order = created_order(one_line());
        confirm(&mut order).unwrap();
        cancel(&mut order, Some("supplier out of stock")).unwrap();

        assert_eq!(order.status(), PurchaseOrderStatus::Cancelled);
        assert_eq!(order.notes(), "Cancellation reason: supplier out of stock");

        for err in [
            confirm(&mut order).unwrap_err(),
            receive(&mut order).unwrap_err(),
            cancel(&mut order, None).unwrap_err(),
        ] {
            assert!(matches!(err, DomainError::InvalidOrderState(_)));
        }
    }

    #[test]
    fn commands_against_an_uncreated_order_are_not_found() {
        let mut order = PurchaseOrder::empty(PurchaseOrderId::generate());
        assert!(matches!(
            confirm(&mut order).unwrap_err(),
            DomainError::NotFound(_)
        ));
        assert!(order.snapshot().is_none());
    }

    #[test]
    fn snapshot_restores_identical_state() {
        let mut order = created_order(one_line());
        confirm(&mut order).unwrap();
        let snapshot = order.snapshot().unwrap();
        assert_eq!(PurchaseOrder::restore(snapshot), order);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        #[derive(Debug, Clone, Copy)]
        enum Step {
            Confirm,
            Receive,
            Cancel,
        }

        fn step_strategy() -> impl Strategy<Value = Step> {
            prop_oneof![Just(Step::Confirm), Just(Step::Receive), Just(Step::Cancel)]
        }

        proptest! {
            /// Property: terminal states absorb every further command, and failed
            /// commands never change the order.
            #[test]
            fn terminal_states_are_absorbing(
                steps in prop::collection::vec(step_strategy(), 1..12)
            ) {
                let mut order = created_order(one_line());

                for step in steps {
                    let before = order.clone();
                    let result = match step {
                        Step::Confirm => confirm(&mut order),
                        Step::Receive => receive(&mut order),
                        Step::Cancel => cancel(&mut order, Some("test")),
                    };

                    if matches!(
                        before.status(),
                        PurchaseOrderStatus::Received | PurchaseOrderStatus::Cancelled
                    ) {
                        prop_assert!(result.is_err());
                    }
                    if result.is_err() {
                        prop_assert_eq!(&order, &before);
                    }
                }
            }
        }
    }
}
