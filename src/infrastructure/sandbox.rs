use crate::domain::money::Money;
use crate::domain::ports::PaymentProcessor;
use crate::domain::processor::{OrderRequest, ProcessorOrder, ProcessorOrderStatus};
use crate::domain::session::{CaptureReceipt, OrderId};
use crate::error::{CheckoutError, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

/// How the next capture call misbehaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureFault {
    /// The processor refuses the capture; nothing is charged.
    Declined,
    /// The capture goes through but the response never arrives.
    LostResponse,
}

#[derive(Default)]
struct SandboxState {
    orders: Mutex<HashMap<OrderId, ProcessorOrder>>,
    create_calls: AtomicU64,
    capture_calls: AtomicU64,
    create_failures: AtomicU32,
    capture_fault: Mutex<Option<CaptureFault>>,
    create_delay: Mutex<Duration>,
    capture_delay: Mutex<Duration>,
    captured_amount_override: Mutex<Option<Money>>,
}

/// An in-process payment processor.
///
/// Behaves like a hosted orders API (orders must be approved by the buyer before they can
/// be captured, and an order captures at most once) while letting callers script faults
/// and count calls. Clones share state.
#[derive(Default, Clone)]
pub struct SandboxProcessor {
    state: Arc<SandboxState>,
}

impl SandboxProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates the buyer approving the order on the processor's page.
    pub async fn approve(&self, order_id: &OrderId) -> Result<()> {
        let mut orders = self.state.orders.lock().await;
        let order = orders
            .get_mut(order_id)
            .ok_or_else(|| CheckoutError::provider(format!("Unknown order {order_id}"), false))?;
        if order.status == ProcessorOrderStatus::Created {
            order.status = ProcessorOrderStatus::Approved;
        }
        Ok(())
    }

    /// The next `count` create calls fail with a retryable error.
    pub fn fail_next_creates(&self, count: u32) {
        self.state.create_failures.store(count, Ordering::SeqCst);
    }

    pub async fn fail_next_capture(&self, fault: CaptureFault) {
        *self.state.capture_fault.lock().await = Some(fault);
    }

    pub async fn set_create_delay(&self, delay: Duration) {
        *self.state.create_delay.lock().await = delay;
    }

    pub async fn set_capture_delay(&self, delay: Duration) {
        *self.state.capture_delay.lock().await = delay;
    }

    /// Makes captures report this amount regardless of the order amount.
    pub async fn override_captured_amount(&self, amount: Money) {
        *self.state.captured_amount_override.lock().await = Some(amount);
    }

    pub fn create_calls(&self) -> u64 {
        self.state.create_calls.load(Ordering::SeqCst)
    }

    pub fn capture_calls(&self) -> u64 {
        self.state.capture_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentProcessor for SandboxProcessor {
    async fn create_order(&self, request: OrderRequest) -> Result<ProcessorOrder> {
        self.state.create_calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.state.create_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.state
                .create_failures
                .store(remaining - 1, Ordering::SeqCst);
            return Err(CheckoutError::provider("SERVICE_UNAVAILABLE", true));
        }
        let delay = *self.state.create_delay.lock().await;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let order = ProcessorOrder {
            order_id: OrderId::new(Uuid::new_v4().simple().to_string().to_uppercase()),
            status: ProcessorOrderStatus::Created,
            amount: request.amount,
            currency: request.currency,
            capture: None,
        };
        self.state
            .orders
            .lock()
            .await
            .insert(order.order_id.clone(), order.clone());
        Ok(order)
    }

    async fn get_order(&self, order_id: &OrderId) -> Result<ProcessorOrder> {
        self.state
            .orders
            .lock()
            .await
            .get(order_id)
            .cloned()
            .ok_or_else(|| CheckoutError::provider(format!("RESOURCE_NOT_FOUND: {order_id}"), false))
    }

    async fn capture_order(&self, order_id: &OrderId) -> Result<CaptureReceipt> {
        self.state.capture_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.state.capture_delay.lock().await;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let fault = self.state.capture_fault.lock().await.take();
        let amount_override = *self.state.captured_amount_override.lock().await;

        let mut orders = self.state.orders.lock().await;
        let order = orders
            .get_mut(order_id)
            .ok_or_else(|| CheckoutError::provider(format!("RESOURCE_NOT_FOUND: {order_id}"), false))?;
        match order.status {
            ProcessorOrderStatus::Approved => {}
            ProcessorOrderStatus::Created => {
                return Err(CheckoutError::provider("ORDER_NOT_APPROVED", false));
            }
            ProcessorOrderStatus::Completed => {
                return Err(CheckoutError::provider("ORDER_ALREADY_CAPTURED", false));
            }
            ProcessorOrderStatus::Voided => {
                return Err(CheckoutError::provider("ORDER_VOIDED", false));
            }
        }
        if fault == Some(CaptureFault::Declined) {
            return Err(CheckoutError::provider("INSTRUMENT_DECLINED", false));
        }

        let receipt = CaptureReceipt {
            payment_id: format!("CAP-{}", Uuid::new_v4().simple()).to_uppercase(),
            amount: amount_override.unwrap_or(order.amount),
            currency: order.currency.clone(),
            captured_at: Utc::now(),
        };
        order.status = ProcessorOrderStatus::Completed;
        order.capture = Some(receipt.clone());

        if fault == Some(CaptureFault::LostResponse) {
            return Err(CheckoutError::NetworkTimeout(
                "Connection reset before capture response".to_string(),
            ));
        }
        Ok(receipt)
    }
}
