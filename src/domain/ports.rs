use super::catalogue::PricingCatalogue;
use super::processor::{OrderRequest, ProcessorOrder};
use super::registration::{CaptureClaim, CompletionOutcome, CompletionRecord, Registration};
use super::session::{CaptureReceipt, OrderId, PaymentSession, SessionStatus};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Result of a conditional session write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasOutcome {
    /// The stored status was one of the expected ones and the new session was written.
    Applied(PaymentSession),
    /// The stored status was something else; carries what is stored now.
    Rejected(PaymentSession),
    Missing,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert(&self, session: PaymentSession) -> Result<()>;
    async fn get(&self, order_id: &OrderId) -> Result<Option<PaymentSession>>;
    async fn find_by_registration(&self, registration_id: &str) -> Result<Vec<PaymentSession>>;
    /// Atomically replaces the session only if its stored status is in `expected`.
    async fn compare_and_set(
        &self,
        order_id: &OrderId,
        expected: &[SessionStatus],
        next: PaymentSession,
    ) -> Result<CasOutcome>;
}

#[async_trait]
pub trait RegistrationStore: Send + Sync {
    async fn get(&self, registration_id: &str) -> Result<Option<Registration>>;
    /// Binds a pending registration to a newly opened order. Applies only if the stored
    /// record is unpaid, has no capture in flight and is still bound to `expected_order`.
    async fn save_pending(
        &self,
        registration: Registration,
        expected_order: Option<&OrderId>,
    ) -> Result<()>;
    /// Atomically reserves the registration for capturing its bound order.
    async fn claim_capture(&self, registration_id: &str, order_id: &OrderId)
    -> Result<CaptureClaim>;
    /// Drops the reservation held by `order_id`, if any.
    async fn release_capture(&self, registration_id: &str, order_id: &OrderId) -> Result<()>;
    /// Marks the registration completed, only if it is pending and bound to the record's
    /// order at the record's amount.
    async fn complete_payment(&self, record: CompletionRecord) -> Result<CompletionOutcome>;
    /// Pending saves and completions this store has applied. Used to audit exactly-once
    /// completion.
    async fn write_count(&self) -> Result<u64>;
}

#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn create_order(&self, request: OrderRequest) -> Result<ProcessorOrder>;
    /// Read-only status lookup; safe to repeat.
    async fn get_order(&self, order_id: &OrderId) -> Result<ProcessorOrder>;
    /// Has a side effect on the processor. Never re-issued blindly.
    async fn capture_order(&self, order_id: &OrderId) -> Result<CaptureReceipt>;
}

#[async_trait]
pub trait CatalogueSource: Send + Sync {
    async fn snapshot(&self) -> Result<Arc<PricingCatalogue>>;
}

pub type SessionStoreBox = Box<dyn SessionStore>;
pub type RegistrationStoreBox = Box<dyn RegistrationStore>;
pub type PaymentProcessorBox = Box<dyn PaymentProcessor>;
pub type CatalogueSourceBox = Box<dyn CatalogueSource>;
pub type ClockBox = Box<dyn super::clock::Clock>;
