use crate::application::pricing::PricingEngine;
use crate::application::resolver::{Resolution, resolve};
use crate::config::CheckoutSettings;
use crate::domain::catalogue::PricingCatalogue;
use crate::domain::money::{Currency, Money};
use crate::domain::ports::{
    CasOutcome, CatalogueSourceBox, ClockBox, PaymentProcessorBox, RegistrationStoreBox,
    SessionStoreBox,
};
use crate::domain::processor::{OrderRequest, ProcessorOrder, ProcessorOrderStatus};
use crate::domain::quote::{PriceQuote, Selection};
use crate::domain::registration::{
    CaptureClaim, CompletionOutcome, CompletionRecord, PricingSnapshot, Registration,
};
use crate::domain::session::{CaptureReceipt, OrderId, PaymentSession, SessionStatus};
use crate::error::{CheckoutError, Result};
use std::sync::Arc;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, error, info, instrument, warn};

/// A checkout attempt as submitted by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutRequest {
    pub registration_id: String,
    pub selection: Selection,
    pub participant_count: u32,
    /// The total the client displayed. Checked against the server-side quote, never used.
    pub client_total: Option<Money>,
    pub currency: Option<Currency>,
}

/// Drives a payment session from order creation to a terminal state.
///
/// The orchestrator owns no state of its own: every transition goes through a conditional
/// write on the session store, so concurrent calls for the same order (a double click, a
/// webhook racing the client) settle on exactly one capture and one registration write.
pub struct CheckoutOrchestrator {
    sessions: SessionStoreBox,
    registrations: RegistrationStoreBox,
    processor: PaymentProcessorBox,
    catalogue: CatalogueSourceBox,
    clock: ClockBox,
    settings: CheckoutSettings,
}

impl CheckoutOrchestrator {
    pub fn new(
        sessions: SessionStoreBox,
        registrations: RegistrationStoreBox,
        processor: PaymentProcessorBox,
        catalogue: CatalogueSourceBox,
        clock: ClockBox,
        settings: CheckoutSettings,
    ) -> Self {
        Self {
            sessions,
            registrations,
            processor,
            catalogue,
            clock,
            settings,
        }
    }

    /// Quotes a selection against the current catalogue snapshot at the current instant.
    pub async fn quote(&self, selection: &Selection, participant_count: u32) -> Result<PriceQuote> {
        let engine = PricingEngine::new(self.catalogue.snapshot().await?);
        Ok(engine.quote_at(selection, participant_count, self.clock.now())?)
    }

    /// The current catalogue snapshot together with its resolution at the current instant.
    pub async fn pricing_view(&self) -> Result<(Arc<PricingCatalogue>, Resolution)> {
        let catalogue = self.catalogue.snapshot().await?;
        let resolution = resolve(&catalogue.periods, self.clock.now());
        Ok((catalogue, resolution))
    }

    /// Opens a processor order sized to the server-side quote and records a `Created`
    /// session plus a pending registration.
    ///
    /// The registration is bound to the new order with a conditional write: it fails if a
    /// concurrent checkout bound another order first or a capture is in flight. Earlier
    /// open sessions of the registration are cancelled, and only the bound order can be
    /// captured.
    #[instrument(skip(self, request), fields(registration_id = %request.registration_id))]
    pub async fn create_order(&self, request: CheckoutRequest) -> Result<PaymentSession> {
        let now = self.clock.now();
        let catalogue = self.catalogue.snapshot().await?;
        if !catalogue.is_open() {
            return Err(CheckoutError::QuoteValidation(
                "Registration is closed".to_string(),
            ));
        }

        let quote = PricingEngine::new(catalogue).quote_at(
            &request.selection,
            request.participant_count,
            now,
        )?;
        if !quote.total.is_positive() {
            return Err(CheckoutError::QuoteValidation(
                "Quote total must be positive".to_string(),
            ));
        }
        if let Some(client_total) = request.client_total
            && client_total != quote.total
        {
            return Err(CheckoutError::QuoteValidation(format!(
                "Submitted total {client_total} does not match current price {}",
                quote.total
            )));
        }
        if let Some(currency) = &request.currency
            && *currency != quote.currency
        {
            return Err(CheckoutError::QuoteValidation(format!(
                "Submitted currency {currency} does not match {}",
                quote.currency
            )));
        }
        let expected_order = match self.registrations.get(&request.registration_id).await? {
            Some(existing) => {
                existing.ensure_rebindable(existing.order_id.as_ref())?;
                existing.order_id
            }
            None => None,
        };

        let order = self
            .create_with_retry(OrderRequest {
                registration_id: request.registration_id.clone(),
                amount: quote.total,
                currency: quote.currency.clone(),
            })
            .await?;
        if order.amount != quote.total || order.currency != quote.currency {
            return Err(CheckoutError::provider(
                format!(
                    "Processor opened order {} for {} {}, expected {} {}",
                    order.order_id, order.amount, order.currency, quote.total, quote.currency
                ),
                false,
            ));
        }

        let session = PaymentSession::new(
            order.order_id.clone(),
            request.registration_id.clone(),
            quote.total,
            quote.currency.clone(),
            quote.resolved_period_id.clone(),
            now,
        );
        let snapshot = PricingSnapshot::from_quote(&quote, request.selection);
        if let Err(err) = self
            .registrations
            .save_pending(
                Registration::pending(
                    request.registration_id.clone(),
                    order.order_id.clone(),
                    snapshot,
                ),
                expected_order.as_ref(),
            )
            .await
        {
            warn!(order_id = %order.order_id, error = %err, "Processor order left unused");
            return Err(err);
        }
        self.sessions.insert(session.clone()).await?;
        self.supersede_open_sessions(&request.registration_id, &session.order_id)
            .await?;

        info!(order_id = %session.order_id, amount = %session.amount, "Payment session created");
        Ok(session)
    }

    /// Records that the user approved the order on the processor side.
    #[instrument(skip(self))]
    pub async fn approve(&self, order_id: &OrderId) -> Result<PaymentSession> {
        let session = self.load(order_id).await?;
        match session.status {
            SessionStatus::Created => {}
            SessionStatus::Approved | SessionStatus::Capturing | SessionStatus::Captured => {
                return Ok(session);
            }
            other => {
                return Err(CheckoutError::InvalidTransition {
                    from: other,
                    to: SessionStatus::Approved,
                });
            }
        }

        let approved = session.approved(self.clock.now())?;
        match self
            .sessions
            .compare_and_set(order_id, &[SessionStatus::Created], approved)
            .await?
        {
            CasOutcome::Applied(session) => {
                debug!("Payment session approved");
                Ok(session)
            }
            CasOutcome::Rejected(current)
                if matches!(
                    current.status,
                    SessionStatus::Approved | SessionStatus::Capturing | SessionStatus::Captured
                ) =>
            {
                Ok(current)
            }
            CasOutcome::Rejected(current) => Err(CheckoutError::InvalidTransition {
                from: current.status,
                to: SessionStatus::Approved,
            }),
            CasOutcome::Missing => Err(CheckoutError::SessionNotFound(order_id.clone())),
        }
    }

    /// Approves a `Created` session only once the processor reports the buyer's approval.
    /// Sessions in any other state are returned as stored.
    #[instrument(skip(self))]
    pub async fn sync_approval(&self, order_id: &OrderId) -> Result<PaymentSession> {
        let session = self.load(order_id).await?;
        if session.status != SessionStatus::Created {
            return Ok(session);
        }

        let order = match timeout(
            self.settings.create_timeout(),
            self.processor.get_order(order_id),
        )
        .await
        {
            Ok(order) => order?,
            Err(_) => {
                return Err(CheckoutError::NetworkTimeout(format!(
                    "Order lookup for {order_id} timed out"
                )));
            }
        };
        match order.status {
            ProcessorOrderStatus::Approved | ProcessorOrderStatus::Completed => {
                self.approve(order_id).await
            }
            ProcessorOrderStatus::Created | ProcessorOrderStatus::Voided => {
                debug!(status = ?order.status, "Processor has no buyer approval");
                Ok(session)
            }
        }
    }

    /// Abandons an open session. The registration is left untouched.
    #[instrument(skip(self))]
    pub async fn cancel(&self, order_id: &OrderId) -> Result<PaymentSession> {
        let session = self.load(order_id).await?;
        if session.status == SessionStatus::Cancelled {
            return Ok(session);
        }
        let cancelled = session.cancelled(self.clock.now())?;
        match self
            .sessions
            .compare_and_set(order_id, &SessionStatus::OPEN, cancelled)
            .await?
        {
            CasOutcome::Applied(session) => {
                info!("Payment session cancelled");
                Ok(session)
            }
            CasOutcome::Rejected(current) if current.status == SessionStatus::Cancelled => {
                Ok(current)
            }
            CasOutcome::Rejected(current) => Err(CheckoutError::InvalidTransition {
                from: current.status,
                to: SessionStatus::Cancelled,
            }),
            CasOutcome::Missing => Err(CheckoutError::SessionNotFound(order_id.clone())),
        }
    }

    /// Marks an open session failed, e.g. when the processor reported an error to the
    /// client during approval.
    #[instrument(skip(self))]
    pub async fn fail(&self, order_id: &OrderId, reason: &str) -> Result<PaymentSession> {
        let session = self.load(order_id).await?;
        if session.status == SessionStatus::Failed {
            return Ok(session);
        }
        let failed = session.failed(reason, self.clock.now())?;
        match self
            .sessions
            .compare_and_set(order_id, &SessionStatus::OPEN, failed)
            .await?
        {
            CasOutcome::Applied(session) => {
                warn!(reason, "Payment session failed");
                Ok(session)
            }
            CasOutcome::Rejected(current) if current.status == SessionStatus::Failed => Ok(current),
            CasOutcome::Rejected(current) => Err(CheckoutError::InvalidTransition {
                from: current.status,
                to: SessionStatus::Failed,
            }),
            CasOutcome::Missing => Err(CheckoutError::SessionNotFound(order_id.clone())),
        }
    }

    pub async fn session(&self, order_id: &OrderId) -> Result<PaymentSession> {
        self.load(order_id).await
    }

    /// Captures an approved order and completes its registration, exactly once.
    ///
    /// A repeated call for an order that is already captured returns the stored receipt
    /// without contacting the processor. A call that loses the race for the in-flight
    /// claim waits for the winner and returns its receipt.
    #[instrument(skip(self))]
    pub async fn capture(&self, order_id: &OrderId, registration_id: &str) -> Result<CaptureReceipt> {
        let session = self.load(order_id).await?;
        if session.registration_id != registration_id {
            return Err(CheckoutError::QuoteValidation(format!(
                "Order {order_id} does not belong to registration {registration_id}"
            )));
        }

        match session.status {
            SessionStatus::Captured => {
                debug!("Capture replayed from stored receipt");
                return captured_receipt(&session);
            }
            SessionStatus::Capturing => return self.await_settlement(order_id).await,
            SessionStatus::Failed | SessionStatus::Cancelled => {
                return Err(CheckoutError::InvalidTransition {
                    from: session.status,
                    to: SessionStatus::Captured,
                });
            }
            SessionStatus::Created | SessionStatus::Approved => {}
        }

        self.verify_quoted_amount(&session).await?;

        let claimed = session.claimed(self.clock.now())?;
        let claimed = match self
            .sessions
            .compare_and_set(order_id, &SessionStatus::OPEN, claimed)
            .await?
        {
            CasOutcome::Applied(claimed) => claimed,
            CasOutcome::Rejected(current) => {
                debug!(status = %current.status, "Lost capture claim to a concurrent call");
                return match current.status {
                    SessionStatus::Captured => captured_receipt(&current),
                    SessionStatus::Capturing => self.await_settlement(order_id).await,
                    other => Err(CheckoutError::InvalidTransition {
                        from: other,
                        to: SessionStatus::Captured,
                    }),
                };
            }
            CasOutcome::Missing => return Err(CheckoutError::SessionNotFound(order_id.clone())),
        };

        if let CaptureClaim::Denied(reason) = self
            .registrations
            .claim_capture(registration_id, order_id)
            .await?
        {
            warn!(%reason, "Registration is not bound to this order");
            self.mark_failed(&claimed, &reason).await?;
            return Err(CheckoutError::CaptureConflict(reason));
        }

        let outcome = match timeout(
            self.settings.capture_timeout(),
            self.processor.capture_order(order_id),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(CheckoutError::NetworkTimeout(format!(
                "Capture of {order_id} timed out after {:?}",
                self.settings.capture_timeout()
            ))),
        };

        match outcome {
            Ok(receipt) => self.finalize(claimed, receipt).await,
            Err(CheckoutError::NetworkTimeout(message)) => {
                // The processor may or may not have captured. The claim stays in place
                // until `reconcile` asks the processor what happened.
                warn!(%message, "Capture outcome unknown");
                Err(CheckoutError::NetworkTimeout(format!(
                    "{message}; re-query the session before retrying"
                )))
            }
            Err(err) => {
                warn!(error = %err, "Processor rejected capture");
                self.mark_failed(&claimed, &err.to_string()).await?;
                self.registrations
                    .release_capture(registration_id, order_id)
                    .await?;
                Err(err)
            }
        }
    }

    /// Settles a session left in `Capturing` by an inconclusive capture.
    ///
    /// Asks the processor for the order state (a read with no side effect). A completed
    /// capture is finalized exactly once; an order that was never captured gets its
    /// claim released back to `Approved` so capture can be attempted again.
    #[instrument(skip(self))]
    pub async fn reconcile(&self, order_id: &OrderId) -> Result<PaymentSession> {
        let session = self.load(order_id).await?;
        if session.status != SessionStatus::Capturing {
            return Ok(session);
        }

        let order: ProcessorOrder = match timeout(
            self.settings.capture_timeout(),
            self.processor.get_order(order_id),
        )
        .await
        {
            Ok(order) => order?,
            Err(_) => {
                return Err(CheckoutError::NetworkTimeout(format!(
                    "Order lookup for {order_id} timed out"
                )));
            }
        };

        match (order.status, order.capture) {
            (ProcessorOrderStatus::Completed, Some(receipt)) => {
                info!("Processor reports capture completed, finalizing");
                self.finalize(session, receipt).await?;
            }
            (ProcessorOrderStatus::Voided, _) => {
                self.mark_failed(&session, "Order voided by processor").await?;
                self.registrations
                    .release_capture(&session.registration_id, order_id)
                    .await?;
            }
            _ => {
                info!("Processor reports no capture, releasing claim");
                let released = session.released(self.clock.now())?;
                self.sessions
                    .compare_and_set(order_id, &[SessionStatus::Capturing], released)
                    .await?;
                self.registrations
                    .release_capture(&session.registration_id, order_id)
                    .await?;
            }
        }
        self.load(order_id).await
    }

    async fn finalize(&self, claimed: PaymentSession, receipt: CaptureReceipt) -> Result<CaptureReceipt> {
        let order_id = claimed.order_id.clone();
        if receipt.amount != claimed.amount || receipt.currency != claimed.currency {
            let reason = format!(
                "Captured {} {} but order {} was opened for {} {}",
                receipt.amount, receipt.currency, order_id, claimed.amount, claimed.currency
            );
            error!(payment_id = %receipt.payment_id, %reason, "Amount integrity violation");
            self.abandon_capture(&claimed, &reason).await?;
            return Err(CheckoutError::CaptureConflict(reason));
        }

        let record = CompletionRecord {
            registration_id: claimed.registration_id.clone(),
            order_id: order_id.clone(),
            payment_id: receipt.payment_id.clone(),
            amount: receipt.amount,
        };
        match self.registrations.complete_payment(record).await? {
            CompletionOutcome::Completed => {
                info!(payment_id = %receipt.payment_id, "Registration payment completed");
            }
            CompletionOutcome::AlreadyCompleted => {
                debug!(payment_id = %receipt.payment_id, "Registration already completed by this payment");
            }
            CompletionOutcome::Conflict {
                existing_payment_id,
            } => {
                let reason = format!(
                    "Registration {} already completed by payment {}",
                    claimed.registration_id,
                    existing_payment_id.as_deref().unwrap_or("unknown")
                );
                error!(payment_id = %receipt.payment_id, %reason, "Captured payment needs a refund");
                self.abandon_capture(&claimed, &reason).await?;
                return Err(CheckoutError::CaptureConflict(reason));
            }
            CompletionOutcome::Mismatch { reason } => {
                error!(payment_id = %receipt.payment_id, %reason, "Captured payment needs a refund");
                self.abandon_capture(&claimed, &reason).await?;
                return Err(CheckoutError::CaptureConflict(reason));
            }
        }

        let captured = claimed.captured(receipt.clone(), self.clock.now())?;
        match self
            .sessions
            .compare_and_set(&order_id, &[SessionStatus::Capturing], captured)
            .await?
        {
            CasOutcome::Applied(_) => Ok(receipt),
            CasOutcome::Rejected(current) if current.status == SessionStatus::Captured => {
                captured_receipt(&current)
            }
            CasOutcome::Rejected(current) => Err(CheckoutError::InvalidTransition {
                from: current.status,
                to: SessionStatus::Captured,
            }),
            CasOutcome::Missing => Err(CheckoutError::SessionNotFound(order_id)),
        }
    }

    /// Re-derives the order amount from the registration's stored selection, priced in
    /// the period recorded when the order was created.
    async fn verify_quoted_amount(&self, session: &PaymentSession) -> Result<()> {
        let registration = self
            .registrations
            .get(&session.registration_id)
            .await?
            .ok_or_else(|| CheckoutError::RegistrationNotFound(session.registration_id.clone()))?;
        let engine = PricingEngine::new(self.catalogue.snapshot().await?);
        let requote = engine.quote_in_period(
            &registration.pricing.selection,
            session.resolved_period_id.as_ref(),
            registration.pricing.participant_count,
        )?;

        if requote.total != session.amount || registration.pricing.total_price != session.amount {
            let reason = format!(
                "Order {} amount {} does not match re-derived price {}",
                session.order_id, session.amount, requote.total
            );
            error!(%reason, "Amount integrity violation");
            self.mark_failed(session, &reason).await?;
            return Err(CheckoutError::CaptureConflict(reason));
        }
        Ok(())
    }

    async fn await_settlement(&self, order_id: &OrderId) -> Result<CaptureReceipt> {
        let deadline = Instant::now() + self.settings.settle_wait();
        loop {
            let session = self.load(order_id).await?;
            match session.status {
                SessionStatus::Captured => return captured_receipt(&session),
                SessionStatus::Capturing if Instant::now() < deadline => {
                    sleep(self.settings.settle_poll()).await;
                }
                SessionStatus::Capturing => {
                    return Err(CheckoutError::NetworkTimeout(format!(
                        "Capture of {order_id} is still in progress; re-query the session"
                    )));
                }
                SessionStatus::Failed => {
                    return Err(CheckoutError::provider(
                        session
                            .failure_reason
                            .unwrap_or_else(|| "Capture failed".to_string()),
                        false,
                    ));
                }
                other => {
                    return Err(CheckoutError::InvalidTransition {
                        from: other,
                        to: SessionStatus::Captured,
                    });
                }
            }
        }
    }

    async fn create_with_retry(&self, request: OrderRequest) -> Result<ProcessorOrder> {
        let attempts = self.settings.create_retry_attempts.max(1);
        let mut backoff = self.settings.retry_backoff();
        let mut attempt = 1;
        loop {
            let result = match timeout(
                self.settings.create_timeout(),
                self.processor.create_order(request.clone()),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(CheckoutError::NetworkTimeout(format!(
                    "Order creation timed out after {:?}",
                    self.settings.create_timeout()
                ))),
            };

            match result {
                Ok(order) => return Ok(order),
                Err(err) if err.is_retryable() && attempt < attempts => {
                    warn!(attempt, error = %err, "Order creation failed, retrying");
                    sleep(backoff).await;
                    backoff *= 2;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn supersede_open_sessions(&self, registration_id: &str, current: &OrderId) -> Result<()> {
        let now = self.clock.now();
        for session in self.sessions.find_by_registration(registration_id).await? {
            if !session.status.is_open() || session.order_id == *current {
                continue;
            }
            let cancelled = session.cancelled(now)?;
            if let CasOutcome::Applied(_) = self
                .sessions
                .compare_and_set(&session.order_id, &SessionStatus::OPEN, cancelled)
                .await?
            {
                info!(order_id = %session.order_id, "Superseded open payment session");
            }
        }
        Ok(())
    }

    /// Fails a claimed session and frees its registration for a new order.
    async fn abandon_capture(&self, claimed: &PaymentSession, reason: &str) -> Result<()> {
        self.mark_failed(claimed, reason).await?;
        self.registrations
            .release_capture(&claimed.registration_id, &claimed.order_id)
            .await
    }

    async fn mark_failed(&self, session: &PaymentSession, reason: &str) -> Result<()> {
        let failed = session.failed(reason, self.clock.now())?;
        self.sessions
            .compare_and_set(&session.order_id, &[session.status], failed)
            .await?;
        Ok(())
    }

    async fn load(&self, order_id: &OrderId) -> Result<PaymentSession> {
        self.sessions
            .get(order_id)
            .await?
            .ok_or_else(|| CheckoutError::SessionNotFound(order_id.clone()))
    }
}

fn captured_receipt(session: &PaymentSession) -> Result<CaptureReceipt> {
    session.receipt.clone().ok_or_else(|| {
        CheckoutError::InternalError(
            format!("Captured session {} has no receipt", session.order_id).into(),
        )
    })
}
