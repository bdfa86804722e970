use crate::domain::ports::{CasOutcome, RegistrationStore, SessionStore};
use crate::domain::registration::{
    CaptureClaim, CompletionOutcome, CompletionRecord, Registration,
};
use crate::domain::session::{OrderId, PaymentSession, SessionStatus};
use crate::error::{CheckoutError, Result};
use async_trait::async_trait;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

/// Column Family for storing payment sessions, keyed by order id.
pub const CF_SESSIONS: &str = "sessions";
/// Column Family for storing registrations, keyed by registration id.
pub const CF_REGISTRATIONS: &str = "registrations";

/// A persistent store implementation using RocksDB.
///
/// Sessions and registrations live in separate Column Families as JSON documents.
/// Read-modify-write operations (the session CAS, completing a payment) are serialized by
/// an async mutex, so the guarantees hold for every handle within one process.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    write_lock: Arc<Mutex<()>>,
    writes: Arc<AtomicU64>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path.
    ///
    /// Ensures that the required column families ("sessions" and "registrations") exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_sessions = ColumnFamilyDescriptor::new(CF_SESSIONS, Options::default());
        let cf_registrations = ColumnFamilyDescriptor::new(CF_REGISTRATIONS, Options::default());

        let db = DB::open_cf_descriptors(&opts, path, vec![cf_sessions, cf_registrations])?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
            writes: Arc::new(AtomicU64::new(0)),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db.cf_handle(name).ok_or_else(|| {
            CheckoutError::InternalError(Box::new(std::io::Error::other(format!(
                "{name} column family not found"
            ))))
        })
    }

    fn read<T: DeserializeOwned>(&self, cf_name: &str, key: &str) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        match self.db.get_pinned_cf(cf, key.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write<T: Serialize>(&self, cf_name: &str, key: &str, value: &T) -> Result<()> {
        let cf = self.cf(cf_name)?;
        let bytes = serde_json::to_vec(value)?;
        self.db.put_cf(cf, key.as_bytes(), bytes)?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for RocksDBStore {
    async fn insert(&self, session: PaymentSession) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let key = session.order_id.as_str();
        if self.read::<PaymentSession>(CF_SESSIONS, key)?.is_some() {
            return Err(CheckoutError::InternalError(
                format!("Session {} already exists", session.order_id).into(),
            ));
        }
        self.write(CF_SESSIONS, key, &session)
    }

    async fn get(&self, order_id: &OrderId) -> Result<Option<PaymentSession>> {
        self.read(CF_SESSIONS, order_id.as_str())
    }

    async fn find_by_registration(&self, registration_id: &str) -> Result<Vec<PaymentSession>> {
        let cf = self.cf(CF_SESSIONS)?;
        let mut found = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, value) = item?;
            let session: PaymentSession = serde_json::from_slice(&value)?;
            if session.registration_id == registration_id {
                found.push(session);
            }
        }
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(found)
    }

    async fn compare_and_set(
        &self,
        order_id: &OrderId,
        expected: &[SessionStatus],
        next: PaymentSession,
    ) -> Result<CasOutcome> {
        let _guard = self.write_lock.lock().await;
        match self.read::<PaymentSession>(CF_SESSIONS, order_id.as_str())? {
            None => Ok(CasOutcome::Missing),
            Some(current) if !expected.contains(&current.status) => {
                Ok(CasOutcome::Rejected(current))
            }
            Some(_) => {
                self.write(CF_SESSIONS, order_id.as_str(), &next)?;
                Ok(CasOutcome::Applied(next))
            }
        }
    }
}

#[async_trait]
impl RegistrationStore for RocksDBStore {
    async fn get(&self, registration_id: &str) -> Result<Option<Registration>> {
        self.read(CF_REGISTRATIONS, registration_id)
    }

    async fn save_pending(
        &self,
        registration: Registration,
        expected_order: Option<&OrderId>,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        match self.read::<Registration>(CF_REGISTRATIONS, &registration.id)? {
            Some(existing) => existing.ensure_rebindable(expected_order)?,
            None if expected_order.is_some() => {
                return Err(CheckoutError::RegistrationNotFound(registration.id));
            }
            None => {}
        }
        self.write(CF_REGISTRATIONS, &registration.id, &registration)?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn claim_capture(
        &self,
        registration_id: &str,
        order_id: &OrderId,
    ) -> Result<CaptureClaim> {
        let _guard = self.write_lock.lock().await;
        let mut registration = self
            .read::<Registration>(CF_REGISTRATIONS, registration_id)?
            .ok_or_else(|| CheckoutError::RegistrationNotFound(registration_id.to_string()))?;
        let claim = registration.claim_capture(order_id);
        if claim == CaptureClaim::Granted {
            self.write(CF_REGISTRATIONS, registration_id, &registration)?;
        }
        Ok(claim)
    }

    async fn release_capture(&self, registration_id: &str, order_id: &OrderId) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        if let Some(mut registration) =
            self.read::<Registration>(CF_REGISTRATIONS, registration_id)?
            && registration.release_capture(order_id)
        {
            self.write(CF_REGISTRATIONS, registration_id, &registration)?;
        }
        Ok(())
    }

    async fn complete_payment(&self, record: CompletionRecord) -> Result<CompletionOutcome> {
        let _guard = self.write_lock.lock().await;
        let mut registration = self
            .read::<Registration>(CF_REGISTRATIONS, &record.registration_id)?
            .ok_or_else(|| CheckoutError::RegistrationNotFound(record.registration_id.clone()))?;

        let before = registration.clone();
        let registration_id = record.registration_id.clone();
        let outcome = registration.complete(record);
        if registration != before {
            self.write(CF_REGISTRATIONS, &registration_id, &registration)?;
        }
        if outcome == CompletionOutcome::Completed {
            self.writes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(outcome)
    }

    /// Writes applied through this handle since it was opened.
    async fn write_count(&self) -> Result<u64> {
        Ok(self.writes.load(Ordering::SeqCst))
    }
}
