use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use motoshop_core::{
    Aggregate, AggregateId, AggregateRoot, CustomerId, DomainError, Money, NewLine, OrderLine,
    OrderNumber, append_cancellation_reason, price_lines,
};
use motoshop_events::Event;

/// Sales order identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SalesOrderId(pub AggregateId);

impl SalesOrderId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }

    pub fn generate() -> Self {
        Self(AggregateId::new())
    }
}

impl core::fmt::Display for SalesOrderId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Sales order status lifecycle.
///
/// `Pending -> Confirmed -> Delivered`; `Cancelled` from `Pending` or `Confirmed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SalesOrderStatus {
    Pending,
    Confirmed,
    Delivered,
    Cancelled,
}

impl SalesOrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SalesOrderStatus::Pending => "pending",
            SalesOrderStatus::Confirmed => "confirmed",
            SalesOrderStatus::Delivered => "delivered",
            SalesOrderStatus::Cancelled => "cancelled",
        }
    }
}

impl core::fmt::Display for SalesOrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for SalesOrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SalesOrderStatus::Pending),
            "confirmed" => Ok(SalesOrderStatus::Confirmed),
            "delivered" => Ok(SalesOrderStatus::Delivered),
            "cancelled" => Ok(SalesOrderStatus::Cancelled),
            other => Err(DomainError::invalid_argument(format!(
                "unknown sales order status '{other}'"
            ))),
        }
    }
}

/// Persisted form of a [`SalesOrder`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesOrderSnapshot {
    pub order_id: SalesOrderId,
    pub order_number: OrderNumber,
    pub customer_id: CustomerId,
    pub order_date: NaiveDate,
    pub status: SalesOrderStatus,
    pub lines: Vec<OrderLine>,
    pub subtotal: Money,
    pub discount: Money,
    pub total: Money,
    pub notes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

/// Aggregate root: SalesOrder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SalesOrder {
    id: SalesOrderId,
    order_number: Option<OrderNumber>,
    customer_id: Option<CustomerId>,
    order_date: Option<NaiveDate>,
    status: SalesOrderStatus,
    lines: Vec<OrderLine>,
    subtotal: Money,
    discount: Money,
    notes: String,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl SalesOrder {
    /// Create an empty, not-yet-created aggregate instance.
    pub fn empty(id: SalesOrderId) -> Self {
        Self {
            id,
            order_number: None,
            customer_id: None,
            order_date: None,
            status: SalesOrderStatus::Pending,
            lines: Vec::new(),
            subtotal: Money::ZERO,
            discount: Money::ZERO,
            notes: String::new(),
            created_at: None,
            updated_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn restore(snapshot: SalesOrderSnapshot) -> Self {
        Self {
            id: snapshot.order_id,
            order_number: Some(snapshot.order_number),
            customer_id: Some(snapshot.customer_id),
            order_date: Some(snapshot.order_date),
            status: snapshot.status,
            lines: snapshot.lines,
            subtotal: snapshot.subtotal,
            discount: snapshot.discount,
            notes: snapshot.notes,
            created_at: Some(snapshot.created_at),
            updated_at: Some(snapshot.updated_at),
            version: snapshot.version,
            created: true,
        }
    }

    /// Persisted form; `None` until the order has been created.
    pub fn snapshot(&self) -> Option<SalesOrderSnapshot> {
        Some(SalesOrderSnapshot {
            order_id: self.id,
            order_number: self.order_number.clone()?,
            customer_id: self.customer_id?,
            order_date: self.order_date?,
            status: self.status,
            lines: self.lines.clone(),
            subtotal: self.subtotal,
            discount: self.discount,
            total: self.total(),
            notes: self.notes.clone(),
            created_at: self.created_at?,
            updated_at: self.updated_at?,
            version: self.version,
        })
    }

    pub fn id_typed(&self) -> SalesOrderId {
        self.id
    }

    pub fn order_number(&self) -> Option<&OrderNumber> {
        self.order_number.as_ref()
    }

    pub fn customer_id(&self) -> Option<CustomerId> {
        self.customer_id
    }

    pub fn order_date(&self) -> Option<NaiveDate> {
        self.order_date
    }

    pub fn status(&self) -> SalesOrderStatus {
        self.status
    }

    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
    }

    pub fn subtotal(&self) -> Money {
        self.subtotal
    }

    pub fn discount(&self) -> Money {
        self.discount
    }

    /// `subtotal - discount`; never negative since `discount <= subtotal`.
    pub fn total(&self) -> Money {
        Money::from_minor(self.subtotal.minor() - self.discount.minor())
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

    pub fn is_modifiable(&self) -> bool {
        matches!(self.status, SalesOrderStatus::Pending)
    }
}

impl AggregateRoot for SalesOrder {
    type Id = SalesOrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateSalesOrder.
///
/// Stock availability is not checked here; the workflow performs the soft
/// check before issuing the command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSalesOrder {
    pub order_id: SalesOrderId,
    pub order_number: OrderNumber,
    pub customer_id: CustomerId,
    pub order_date: NaiveDate,
    pub lines: Vec<NewLine>,
    pub discount: Money,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ConfirmSalesOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmSalesOrder {
    pub order_id: SalesOrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ApplyDiscount (only while pending).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyDiscount {
    pub order_id: SalesOrderId,
    pub amount: Money,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DeliverSalesOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliverSalesOrder {
    pub order_id: SalesOrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelSalesOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelSalesOrder {
    pub order_id: SalesOrderId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SalesOrderCommand {
    Create(CreateSalesOrder),
    Confirm(ConfirmSalesOrder),
    ApplyDiscount(ApplyDiscount),
    Deliver(DeliverSalesOrder),
    Cancel(CancelSalesOrder),
}

/// Event: SalesOrderCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesOrderCreated {
    pub order_id: SalesOrderId,
    pub order_number: OrderNumber,
    pub customer_id: CustomerId,
    pub order_date: NaiveDate,
    pub lines: Vec<OrderLine>,
    pub subtotal: Money,
    pub discount: Money,
    pub notes: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: SalesOrderConfirmed.
///
/// Carries the lines whose stock leaves the warehouse on confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesOrderConfirmed {
    pub order_id: SalesOrderId,
    pub order_number: OrderNumber,
    pub lines: Vec<OrderLine>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: DiscountApplied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscountApplied {
    pub order_id: SalesOrderId,
    pub discount: Money,
    pub occurred_at: DateTime<Utc>,
}

/// Event: SalesOrderDelivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesOrderDelivered {
    pub order_id: SalesOrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: SalesOrderCancelled.
///
/// `restock` is true when the order had been confirmed, i.e. its stock was
/// already deducted and must be returned line by line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesOrderCancelled {
    pub order_id: SalesOrderId,
    pub order_number: OrderNumber,
    pub reason: Option<String>,
    pub restock: bool,
    pub lines: Vec<OrderLine>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SalesOrderEvent {
    Created(SalesOrderCreated),
    Confirmed(SalesOrderConfirmed),
    DiscountApplied(DiscountApplied),
    Delivered(SalesOrderDelivered),
    Cancelled(SalesOrderCancelled),
}

impl Event for SalesOrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SalesOrderEvent::Created(_) => "sales.order.created",
            SalesOrderEvent::Confirmed(_) => "sales.order.confirmed",
            SalesOrderEvent::DiscountApplied(_) => "sales.order.discount_applied",
            SalesOrderEvent::Delivered(_) => "sales.order.delivered",
            SalesOrderEvent::Cancelled(_) => "sales.order.cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            SalesOrderEvent::Created(e) => e.occurred_at,
            SalesOrderEvent::Confirmed(e) => e.occurred_at,
            SalesOrderEvent::DiscountApplied(e) => e.occurred_at,
            SalesOrderEvent::Delivered(e) => e.occurred_at,
            SalesOrderEvent::Cancelled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for SalesOrder {
    type Command = SalesOrderCommand;
    type Event = SalesOrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            SalesOrderEvent::Created(e) => {
                self.id = e.order_id;
                self.order_number = Some(e.order_number.clone());
                self.customer_id = Some(e.customer_id);
                self.order_date = Some(e.order_date);
                self.status = SalesOrderStatus::Pending;
                self.lines = e.lines.clone();
                self.subtotal = e.subtotal;
                self.discount = e.discount;
                self.notes = e.notes.clone();
                self.created_at = Some(e.occurred_at);
                self.created = true;
            }
            SalesOrderEvent::Confirmed(_) => {
                self.status = SalesOrderStatus::Confirmed;
            }
            SalesOrderEvent::DiscountApplied(e) => {
                self.discount = e.discount;
            }
            SalesOrderEvent::Delivered(_) => {
                self.status = SalesOrderStatus::Delivered;
            }
            SalesOrderEvent::Cancelled(e) => {
                if let Some(reason) = &e.reason {
                    self.notes = append_cancellation_reason(&self.notes, reason);
                }
                self.status = SalesOrderStatus::Cancelled;
            }
        }

        self.updated_at = Some(event.occurred_at());
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            SalesOrderCommand::Create(cmd) => self.handle_create(cmd),
            SalesOrderCommand::Confirm(cmd) => self.handle_confirm(cmd),
            SalesOrderCommand::ApplyDiscount(cmd) => self.handle_apply_discount(cmd),
            SalesOrderCommand::Deliver(cmd) => self.handle_deliver(cmd),
            SalesOrderCommand::Cancel(cmd) => self.handle_cancel(cmd),
        }
    }
}

fn validate_discount(discount: Money, subtotal: Money) -> Result<(), DomainError> {
    if discount.is_negative() {
        return Err(DomainError::validation("discount cannot be negative"));
    }
    if discount > subtotal {
        return Err(DomainError::validation(format!(
            "discount {discount} exceeds subtotal {subtotal}"
        )));
    }
    Ok(())
}

impl SalesOrder {
    fn ensure_created(&self, order_id: SalesOrderId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("sales order {order_id}")));
        }
        if self.id != order_id {
            return Err(DomainError::invariant("order_id mismatch"));
        }
        Ok(())
    }

    fn number(&self) -> Result<OrderNumber, DomainError> {
        self.order_number
            .clone()
            .ok_or_else(|| DomainError::invariant("order number must be set"))
    }

    fn handle_create(&self, cmd: &CreateSalesOrder) -> Result<Vec<SalesOrderEvent>, DomainError> {
        if self.created {
            return Err(DomainError::invalid_state("sales order already exists"));
        }

        let (lines, subtotal) = price_lines(&cmd.lines)?;
        validate_discount(cmd.discount, subtotal)?;

        Ok(vec![SalesOrderEvent::Created(SalesOrderCreated {
            order_id: cmd.order_id,
            order_number: cmd.order_number.clone(),
            customer_id: cmd.customer_id,
            order_date: cmd.order_date,
            lines,
            subtotal,
            discount: cmd.discount,
            notes: cmd.notes.clone().unwrap_or_default(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_confirm(&self, cmd: &ConfirmSalesOrder) -> Result<Vec<SalesOrderEvent>, DomainError> {
        self.ensure_created(cmd.order_id)?;

        if self.status != SalesOrderStatus::Pending {
            return Err(DomainError::invalid_state(format!(
                "only pending sales orders can be confirmed (status: {})",
                self.status
            )));
        }

        Ok(vec![SalesOrderEvent::Confirmed(SalesOrderConfirmed {
            order_id: cmd.order_id,
            order_number: self.number()?,
            lines: self.lines.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_apply_discount(
        &self,
        cmd: &ApplyDiscount,
    ) -> Result<Vec<SalesOrderEvent>, DomainError> {
        self.ensure_created(cmd.order_id)?;

        if !self.is_modifiable() {
            return Err(DomainError::invalid_state(format!(
                "discounts can only be applied to pending sales orders (status: {})",
                self.status
            )));
        }
        validate_discount(cmd.amount, self.subtotal)?;

        Ok(vec![SalesOrderEvent::DiscountApplied(DiscountApplied {
            order_id: cmd.order_id,
            discount: cmd.amount,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_deliver(&self, cmd: &DeliverSalesOrder) -> Result<Vec<SalesOrderEvent>, DomainError> {
        self.ensure_created(cmd.order_id)?;

        if self.status != SalesOrderStatus::Confirmed {
            return Err(DomainError::invalid_state(format!(
                "only confirmed sales orders can be delivered (status: {})",
                self.status
            )));
        }

        Ok(vec![SalesOrderEvent::Delivered(SalesOrderDelivered {
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelSalesOrder) -> Result<Vec<SalesOrderEvent>, DomainError> {
        self.ensure_created(cmd.order_id)?;

        let restock = match self.status {
            SalesOrderStatus::Pending => false,
            SalesOrderStatus::Confirmed => true,
            SalesOrderStatus::Delivered => {
                return Err(DomainError::invalid_state(
                    "a delivered sales order cannot be cancelled",
                ));
            }
            SalesOrderStatus::Cancelled => {
                return Err(DomainError::invalid_state("sales order is already cancelled"));
            }
        };

        Ok(vec![SalesOrderEvent::Cancelled(SalesOrderCancelled {
            order_id: cmd.order_id,
            order_number: self.number()?,
            reason: cmd
                .reason
                .as_deref()
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_string),
            restock,
            lines: self.lines.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}
