use super::money::{Currency, Money};
use super::session::{CaptureReceipt, OrderId};
use serde::{Deserialize, Serialize};

/// An order the processor is asked to open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderRequest {
    pub registration_id: String,
    pub amount: Money,
    pub currency: Currency,
}

/// Processor-side state of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessorOrderStatus {
    Created,
    Approved,
    Completed,
    Voided,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorOrder {
    pub order_id: OrderId,
    pub status: ProcessorOrderStatus,
    pub amount: Money,
    pub currency: Currency,
    /// Present once the order has been captured.
    pub capture: Option<CaptureReceipt>,
}
