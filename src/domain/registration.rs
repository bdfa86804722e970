use super::money::{Currency, Money};
use super::period::PeriodId;
use super::quote::{PriceQuote, Selection};
use super::session::OrderId;
use crate::error::{CheckoutError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Completed,
    Failed,
}

/// What the registration was priced at when its order was created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingSnapshot {
    pub total_price: Money,
    pub currency: Currency,
    pub selection: Selection,
    pub participant_count: u32,
    pub resolved_period_id: Option<PeriodId>,
}

impl PricingSnapshot {
    pub fn from_quote(quote: &PriceQuote, selection: Selection) -> Self {
        Self {
            total_price: quote.total,
            currency: quote.currency.clone(),
            selection,
            participant_count: quote.participant_count,
            resolved_period_id: quote.resolved_period_id.clone(),
        }
    }
}

/// The slice of the externally-owned registration record this crate reads and writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub id: String,
    pub payment_status: PaymentStatus,
    pub payment_id: Option<String>,
    pub order_id: Option<OrderId>,
    pub pricing: PricingSnapshot,
    /// The bound order while its capture is with the processor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capture_in_flight: Option<OrderId>,
}

impl Registration {
    pub fn pending(id: impl Into<String>, order_id: OrderId, pricing: PricingSnapshot) -> Self {
        Self {
            id: id.into(),
            payment_status: PaymentStatus::Pending,
            payment_id: None,
            order_id: Some(order_id),
            pricing,
            capture_in_flight: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.payment_status == PaymentStatus::Completed
    }

    fn bound_order(&self) -> &str {
        self.order_id.as_ref().map(OrderId::as_str).unwrap_or("none")
    }

    /// Checks that a new order may take over this registration. `expected_order` is the
    /// order the caller saw bound before it opened its own.
    pub fn ensure_rebindable(&self, expected_order: Option<&OrderId>) -> Result<()> {
        if self.is_completed() {
            return Err(CheckoutError::QuoteValidation(format!(
                "Registration {} is already paid",
                self.id
            )));
        }
        if let Some(order_id) = &self.capture_in_flight {
            return Err(CheckoutError::QuoteValidation(format!(
                "Registration {} has a payment in progress for order {order_id}",
                self.id
            )));
        }
        if self.order_id.as_ref() != expected_order {
            return Err(CheckoutError::QuoteValidation(format!(
                "Registration {} was bound to order {} by a concurrent checkout",
                self.id,
                self.bound_order()
            )));
        }
        Ok(())
    }

    /// Reserves the registration for capturing `order_id`. Only the bound order qualifies.
    pub fn claim_capture(&mut self, order_id: &OrderId) -> CaptureClaim {
        if self.order_id.as_ref() != Some(order_id) {
            let reason = if self.is_completed() {
                format!(
                    "Registration {} was already paid by order {}",
                    self.id,
                    self.bound_order()
                )
            } else {
                format!(
                    "Order {order_id} was superseded by order {} for registration {}",
                    self.bound_order(),
                    self.id
                )
            };
            return CaptureClaim::Denied(reason);
        }
        self.capture_in_flight = Some(order_id.clone());
        CaptureClaim::Granted
    }

    /// Drops the reservation if `order_id` holds it. Returns whether anything changed.
    pub fn release_capture(&mut self, order_id: &OrderId) -> bool {
        if self.capture_in_flight.as_ref() == Some(order_id) {
            self.capture_in_flight = None;
            return true;
        }
        false
    }

    /// Applies a successful capture. The first completion wins; a record for another
    /// order or another amount than the bound pricing is refused.
    pub fn complete(&mut self, record: CompletionRecord) -> CompletionOutcome {
        match self.payment_status {
            PaymentStatus::Completed
                if self.payment_id.as_deref() == Some(record.payment_id.as_str()) =>
            {
                self.release_capture(&record.order_id);
                CompletionOutcome::AlreadyCompleted
            }
            PaymentStatus::Completed => CompletionOutcome::Conflict {
                existing_payment_id: self.payment_id.clone(),
            },
            PaymentStatus::Pending | PaymentStatus::Failed => {
                if self.order_id.as_ref() != Some(&record.order_id) {
                    return CompletionOutcome::Mismatch {
                        reason: format!(
                            "Registration {} is bound to order {}, not {}",
                            self.id,
                            self.bound_order(),
                            record.order_id
                        ),
                    };
                }
                if self.pricing.total_price != record.amount {
                    return CompletionOutcome::Mismatch {
                        reason: format!(
                            "Registration {} is priced at {}, captured {}",
                            self.id, self.pricing.total_price, record.amount
                        ),
                    };
                }
                self.payment_status = PaymentStatus::Completed;
                self.payment_id = Some(record.payment_id);
                self.capture_in_flight = None;
                CompletionOutcome::Completed
            }
        }
    }
}

/// Result of reserving a registration for one order's capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureClaim {
    Granted,
    /// Another order is bound or already paid. Nothing changed.
    Denied(String),
}

/// The write a successful capture makes to its registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRecord {
    pub registration_id: String,
    pub order_id: OrderId,
    pub payment_id: String,
    pub amount: Money,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// The registration moved from pending to completed with this write.
    Completed,
    /// An earlier write already recorded this same payment; nothing changed.
    AlreadyCompleted,
    /// The registration is completed with a different payment. Nothing changed.
    Conflict { existing_payment_id: Option<String> },
    /// The record does not match the order or price the registration is bound to.
    Mismatch { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payment_status_wire_names() {
        assert_eq!(
            serde_json::to_string(&PaymentStatus::Completed).unwrap(),
            "\"completed\""
        );
        assert_eq!(PaymentStatus::default(), PaymentStatus::Pending);
    }

    fn snapshot() -> PricingSnapshot {
        PricingSnapshot {
            total_price: Money::from_major(699),
            currency: Currency::new("USD").unwrap(),
            selection: Selection::registration("delegate"),
            participant_count: 1,
            resolved_period_id: None,
        }
    }

    fn record(order: &str, payment: &str, major: i64) -> CompletionRecord {
        CompletionRecord {
            registration_id: "reg-1".into(),
            order_id: OrderId::new(order),
            payment_id: payment.into(),
            amount: Money::from_major(major),
        }
    }

    #[test]
    fn test_capture_claim_blocks_rebinding() {
        let mut reg = Registration::pending("reg-1", OrderId::new("A"), snapshot());
        assert!(reg.ensure_rebindable(Some(&OrderId::new("A"))).is_ok());

        assert_eq!(reg.claim_capture(&OrderId::new("A")), CaptureClaim::Granted);
        let err = reg.ensure_rebindable(Some(&OrderId::new("A"))).unwrap_err();
        assert!(err.to_string().contains("payment in progress"));

        assert!(reg.release_capture(&OrderId::new("A")));
        assert!(!reg.release_capture(&OrderId::new("A")));
        assert!(reg.ensure_rebindable(Some(&OrderId::new("A"))).is_ok());
    }

    #[test]
    fn test_rebinding_requires_the_order_last_seen() {
        let reg = Registration::pending("reg-1", OrderId::new("B"), snapshot());
        assert!(matches!(
            reg.ensure_rebindable(None),
            Err(CheckoutError::QuoteValidation(_))
        ));
        assert!(reg.ensure_rebindable(Some(&OrderId::new("A"))).is_err());
    }

    #[test]
    fn test_only_bound_order_can_claim_capture() {
        let mut reg = Registration::pending("reg-1", OrderId::new("B"), snapshot());
        assert!(matches!(
            reg.claim_capture(&OrderId::new("A")),
            CaptureClaim::Denied(reason) if reason.contains("superseded")
        ));
        assert_eq!(reg.capture_in_flight, None);
    }

    #[test]
    fn test_completion_checks_order_and_amount() {
        let mut reg = Registration::pending("reg-1", OrderId::new("A"), snapshot());
        reg.claim_capture(&OrderId::new("A"));

        assert!(matches!(
            reg.complete(record("B", "CAP-1", 699)),
            CompletionOutcome::Mismatch { .. }
        ));
        assert!(matches!(
            reg.complete(record("A", "CAP-1", 1398)),
            CompletionOutcome::Mismatch { .. }
        ));
        assert!(!reg.is_completed());

        assert_eq!(reg.complete(record("A", "CAP-1", 699)), CompletionOutcome::Completed);
        assert_eq!(reg.capture_in_flight, None);
        assert_eq!(
            reg.complete(record("A", "CAP-1", 699)),
            CompletionOutcome::AlreadyCompleted
        );
        assert_eq!(
            reg.complete(record("A", "CAP-2", 699)),
            CompletionOutcome::Conflict {
                existing_payment_id: Some("CAP-1".into())
            }
        );
    }

    #[test]
    fn test_pending_registration() {
        let snapshot = PricingSnapshot {
            total_price: Money::from_major(699),
            currency: Currency::new("USD").unwrap(),
            selection: Selection::registration("delegate"),
            participant_count: 1,
            resolved_period_id: Some(PeriodId::new("early")),
        };
        let reg = Registration::pending("reg-1", OrderId::new("ORDER-1"), snapshot);
        assert!(!reg.is_completed());
        assert_eq!(reg.order_id, Some(OrderId::new("ORDER-1")));

        let json = serde_json::to_value(&reg).unwrap();
        assert_eq!(json["paymentStatus"], "pending");
        assert_eq!(json["pricing"]["totalPrice"], "699.00");
        assert!(json.get("captureInFlight").is_none());
    }
}
