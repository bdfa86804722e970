use crate::domain::ports::{CasOutcome, RegistrationStore, SessionStore};
use crate::domain::registration::{
    CaptureClaim, CompletionOutcome, CompletionRecord, Registration,
};
use crate::domain::session::{OrderId, PaymentSession, SessionStatus};
use crate::error::{CheckoutError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

/// A thread-safe in-memory store for payment sessions.
///
/// Uses `Arc<RwLock<HashMap<OrderId, PaymentSession>>>`; clones share the same map.
/// The conditional write checks and replaces under a single write guard.
#[derive(Default, Clone)]
pub struct InMemorySessionStore {
    sessions: Arc<RwLock<HashMap<OrderId, PaymentSession>>>,
}

impl InMemorySessionStore {
    /// Creates a new, empty in-memory session store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn insert(&self, session: PaymentSession) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session.order_id) {
            return Err(CheckoutError::InternalError(
                format!("Session {} already exists", session.order_id).into(),
            ));
        }
        sessions.insert(session.order_id.clone(), session);
        Ok(())
    }

    async fn get(&self, order_id: &OrderId) -> Result<Option<PaymentSession>> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(order_id).cloned())
    }

    async fn find_by_registration(&self, registration_id: &str) -> Result<Vec<PaymentSession>> {
        let sessions = self.sessions.read().await;
        let mut found: Vec<PaymentSession> = sessions
            .values()
            .filter(|s| s.registration_id == registration_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(found)
    }

    async fn compare_and_set(
        &self,
        order_id: &OrderId,
        expected: &[SessionStatus],
        next: PaymentSession,
    ) -> Result<CasOutcome> {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(order_id) {
            None => Ok(CasOutcome::Missing),
            Some(current) if !expected.contains(&current.status) => {
                Ok(CasOutcome::Rejected(current.clone()))
            }
            Some(current) => {
                *current = next.clone();
                Ok(CasOutcome::Applied(next))
            }
        }
    }
}

/// A thread-safe in-memory registration store that counts its writes.
#[derive(Default, Clone)]
pub struct InMemoryRegistrationStore {
    registrations: Arc<RwLock<HashMap<String, Registration>>>,
    writes: Arc<AtomicU64>,
}

impl InMemoryRegistrationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RegistrationStore for InMemoryRegistrationStore {
    async fn get(&self, registration_id: &str) -> Result<Option<Registration>> {
        let registrations = self.registrations.read().await;
        Ok(registrations.get(registration_id).cloned())
    }

    async fn save_pending(
        &self,
        registration: Registration,
        expected_order: Option<&OrderId>,
    ) -> Result<()> {
        let mut registrations = self.registrations.write().await;
        match registrations.get(&registration.id) {
            Some(existing) => existing.ensure_rebindable(expected_order)?,
            None if expected_order.is_some() => {
                return Err(CheckoutError::RegistrationNotFound(registration.id));
            }
            None => {}
        }
        registrations.insert(registration.id.clone(), registration);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn claim_capture(
        &self,
        registration_id: &str,
        order_id: &OrderId,
    ) -> Result<CaptureClaim> {
        let mut registrations = self.registrations.write().await;
        let registration = registrations
            .get_mut(registration_id)
            .ok_or_else(|| CheckoutError::RegistrationNotFound(registration_id.to_string()))?;
        Ok(registration.claim_capture(order_id))
    }

    async fn release_capture(&self, registration_id: &str, order_id: &OrderId) -> Result<()> {
        let mut registrations = self.registrations.write().await;
        if let Some(registration) = registrations.get_mut(registration_id) {
            registration.release_capture(order_id);
        }
        Ok(())
    }

    async fn complete_payment(&self, record: CompletionRecord) -> Result<CompletionOutcome> {
        let mut registrations = self.registrations.write().await;
        let registration = registrations
            .get_mut(&record.registration_id)
            .ok_or_else(|| CheckoutError::RegistrationNotFound(record.registration_id.clone()))?;

        let outcome = registration.complete(record);
        if outcome == CompletionOutcome::Completed {
            self.writes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(outcome)
    }

    async fn write_count(&self) -> Result<u64> {
        Ok(self.writes.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::{Currency, Money};
    use crate::domain::quote::Selection;
    use crate::domain::registration::{PaymentStatus, PricingSnapshot};
    use chrono::{TimeZone, Utc};

    fn session(order: &str, registration: &str) -> PaymentSession {
        PaymentSession::new(
            OrderId::new(order),
            registration,
            Money::from_major(699),
            Currency::new("USD").unwrap(),
            None,
            Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap(),
        )
    }

    fn registration(id: &str) -> Registration {
        Registration::pending(
            id,
            OrderId::new("ORDER-1"),
            PricingSnapshot {
                total_price: Money::from_major(699),
                currency: Currency::new("USD").unwrap(),
                selection: Selection::registration("delegate"),
                participant_count: 1,
                resolved_period_id: None,
            },
        )
    }

    fn completion(payment_id: &str) -> CompletionRecord {
        CompletionRecord {
            registration_id: "reg-1".into(),
            order_id: OrderId::new("ORDER-1"),
            payment_id: payment_id.into(),
            amount: Money::from_major(699),
        }
    }

    #[tokio::test]
    async fn test_in_memory_session_store() {
        let store = InMemorySessionStore::new();
        let s = session("ORDER-1", "reg-1");

        store.insert(s.clone()).await.unwrap();
        assert_eq!(store.get(&s.order_id).await.unwrap(), Some(s.clone()));
        assert!(store.get(&OrderId::new("ORDER-2")).await.unwrap().is_none());
        assert!(store.insert(s).await.is_err());
    }

    #[tokio::test]
    async fn test_compare_and_set() {
        let store = InMemorySessionStore::new();
        let s = session("ORDER-1", "reg-1");
        store.insert(s.clone()).await.unwrap();

        let approved = s.approved(s.created_at).unwrap();
        let outcome = store
            .compare_and_set(&s.order_id, &[SessionStatus::Created], approved.clone())
            .await
            .unwrap();
        assert_eq!(outcome, CasOutcome::Applied(approved.clone()));

        // Second writer expecting Created loses and sees the stored state.
        let outcome = store
            .compare_and_set(&s.order_id, &[SessionStatus::Created], approved.clone())
            .await
            .unwrap();
        assert_eq!(outcome, CasOutcome::Rejected(approved));

        let missing = store
            .compare_and_set(&OrderId::new("nope"), &[SessionStatus::Created], s)
            .await
            .unwrap();
        assert_eq!(missing, CasOutcome::Missing);
    }

    #[tokio::test]
    async fn test_find_by_registration() {
        let store = InMemorySessionStore::new();
        store.insert(session("ORDER-1", "reg-1")).await.unwrap();
        store.insert(session("ORDER-2", "reg-1")).await.unwrap();
        store.insert(session("ORDER-3", "reg-2")).await.unwrap();

        assert_eq!(store.find_by_registration("reg-1").await.unwrap().len(), 2);
        assert!(store.find_by_registration("reg-9").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_complete_payment_exactly_once() {
        let store = InMemoryRegistrationStore::new();
        store.save_pending(registration("reg-1"), None).await.unwrap();
        assert_eq!(store.write_count().await.unwrap(), 1);

        assert_eq!(
            store.complete_payment(completion("CAP-1")).await.unwrap(),
            CompletionOutcome::Completed
        );
        assert_eq!(
            store.complete_payment(completion("CAP-1")).await.unwrap(),
            CompletionOutcome::AlreadyCompleted
        );
        assert_eq!(
            store.complete_payment(completion("CAP-2")).await.unwrap(),
            CompletionOutcome::Conflict {
                existing_payment_id: Some("CAP-1".into())
            }
        );
        assert_eq!(store.write_count().await.unwrap(), 2);

        let stored = store.get("reg-1").await.unwrap().unwrap();
        assert_eq!(stored.payment_status, PaymentStatus::Completed);
        assert_eq!(stored.payment_id.as_deref(), Some("CAP-1"));
    }

    #[tokio::test]
    async fn test_completed_registration_not_overwritten() {
        let store = InMemoryRegistrationStore::new();
        store.save_pending(registration("reg-1"), None).await.unwrap();
        store.complete_payment(completion("CAP-1")).await.unwrap();

        assert!(matches!(
            store
                .save_pending(registration("reg-1"), Some(&OrderId::new("ORDER-1")))
                .await,
            Err(CheckoutError::QuoteValidation(_))
        ));
        assert!(matches!(
            store
                .complete_payment(CompletionRecord {
                    registration_id: "missing".into(),
                    ..completion("CAP-3")
                })
                .await,
            Err(CheckoutError::RegistrationNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_pending_save_is_conditional_on_bound_order() {
        let store = InMemoryRegistrationStore::new();
        store.save_pending(registration("reg-1"), None).await.unwrap();

        // A second checkout that also saw no order loses.
        let mut rival = registration("reg-1");
        rival.order_id = Some(OrderId::new("ORDER-2"));
        assert!(matches!(
            store.save_pending(rival.clone(), None).await,
            Err(CheckoutError::QuoteValidation(_))
        ));

        store
            .save_pending(rival, Some(&OrderId::new("ORDER-1")))
            .await
            .unwrap();
        let stored = store.get("reg-1").await.unwrap().unwrap();
        assert_eq!(stored.order_id, Some(OrderId::new("ORDER-2")));
    }

    #[tokio::test]
    async fn test_capture_claim_holds_off_new_orders() {
        let store = InMemoryRegistrationStore::new();
        let bound = OrderId::new("ORDER-1");
        store.save_pending(registration("reg-1"), None).await.unwrap();

        assert!(matches!(
            store.claim_capture("reg-1", &OrderId::new("ORDER-0")).await.unwrap(),
            CaptureClaim::Denied(_)
        ));
        assert_eq!(
            store.claim_capture("reg-1", &bound).await.unwrap(),
            CaptureClaim::Granted
        );
        assert!(
            store
                .save_pending(registration("reg-1"), Some(&bound))
                .await
                .is_err_and(|e| e.to_string().contains("payment in progress"))
        );

        store.release_capture("reg-1", &bound).await.unwrap();
        store
            .save_pending(registration("reg-1"), Some(&bound))
            .await
            .unwrap();
        assert_eq!(store.write_count().await.unwrap(), 2);
    }
}
