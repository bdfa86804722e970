use super::money::{Currency, Money};
use super::period::PeriodId;
use crate::error::CheckoutError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The payment processor's order identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(pub String);

impl OrderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle of a payment session.
///
/// `Capturing` is the in-flight claim a capture call takes before it talks to the
/// processor; concurrent callers that find it wait for the owner to settle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Created,
    Approved,
    Capturing,
    Captured,
    Failed,
    Cancelled,
}

impl SessionStatus {
    /// Sessions that can still be approved, captured or cancelled.
    pub const OPEN: [SessionStatus; 2] = [SessionStatus::Created, SessionStatus::Approved];

    pub fn is_open(&self) -> bool {
        Self::OPEN.contains(self)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Captured | SessionStatus::Failed | SessionStatus::Cancelled
        )
    }

    fn can_become(self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (Created, Approved)
                | (Created | Approved, Capturing)
                | (Capturing, Captured)
                | (Capturing, Approved)
                | (Created | Approved, Cancelled)
                | (Created | Approved | Capturing, Failed)
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionStatus::Created => "created",
            SessionStatus::Approved => "approved",
            SessionStatus::Capturing => "capturing",
            SessionStatus::Captured => "captured",
            SessionStatus::Failed => "failed",
            SessionStatus::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// The authoritative result of the first successful capture of an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureReceipt {
    pub payment_id: String,
    pub amount: Money,
    pub currency: Currency,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentSession {
    pub order_id: OrderId,
    pub registration_id: String,
    pub amount: Money,
    pub currency: Currency,
    pub status: SessionStatus,
    /// Period the amount was quoted in; capture re-validates against it.
    pub resolved_period_id: Option<PeriodId>,
    pub receipt: Option<CaptureReceipt>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentSession {
    pub fn new(
        order_id: OrderId,
        registration_id: impl Into<String>,
        amount: Money,
        currency: Currency,
        resolved_period_id: Option<PeriodId>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            order_id,
            registration_id: registration_id.into(),
            amount,
            currency,
            status: SessionStatus::Created,
            resolved_period_id,
            receipt: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn transition(&self, next: SessionStatus, now: DateTime<Utc>) -> Result<Self, CheckoutError> {
        if !self.status.can_become(next) {
            return Err(CheckoutError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        let mut session = self.clone();
        session.status = next;
        session.updated_at = now;
        Ok(session)
    }

    pub fn approved(&self, now: DateTime<Utc>) -> Result<Self, CheckoutError> {
        self.transition(SessionStatus::Approved, now)
    }

    /// Takes the in-flight capture claim.
    pub fn claimed(&self, now: DateTime<Utc>) -> Result<Self, CheckoutError> {
        self.transition(SessionStatus::Capturing, now)
    }

    /// Gives the claim back after the processor confirmed nothing was captured.
    pub fn released(&self, now: DateTime<Utc>) -> Result<Self, CheckoutError> {
        self.transition(SessionStatus::Approved, now)
    }

    pub fn captured(
        &self,
        receipt: CaptureReceipt,
        now: DateTime<Utc>,
    ) -> Result<Self, CheckoutError> {
        let mut session = self.transition(SessionStatus::Captured, now)?;
        session.receipt = Some(receipt);
        Ok(session)
    }

    pub fn cancelled(&self, now: DateTime<Utc>) -> Result<Self, CheckoutError> {
        self.transition(SessionStatus::Cancelled, now)
    }

    pub fn failed(&self, reason: impl Into<String>, now: DateTime<Utc>) -> Result<Self, CheckoutError> {
        let mut session = self.transition(SessionStatus::Failed, now)?;
        session.failure_reason = Some(reason.into());
        Ok(session)
    }
}
