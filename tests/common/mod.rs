#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use regcheckout::application::checkout::{CheckoutOrchestrator, CheckoutRequest};
use regcheckout::config::CheckoutSettings;
use regcheckout::domain::catalogue::{
    AccommodationOption, PricingCatalogue, RegistrationSettings, RegistrationType, RoomRate,
    SponsorshipTier,
};
use regcheckout::domain::clock::FixedClock;
use regcheckout::domain::money::{Currency, Money};
use regcheckout::domain::period::{PeriodId, PricingPeriod};
use regcheckout::domain::quote::Selection;
use regcheckout::domain::session::PaymentSession;
use regcheckout::infrastructure::catalogue::StaticCatalogue;
use regcheckout::infrastructure::in_memory::{InMemoryRegistrationStore, InMemorySessionStore};
use regcheckout::infrastructure::sandbox::SandboxProcessor;
use regcheckout::interfaces::json::catalogue_reader::CatalogueDocument;
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;

pub fn at(month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, month, day, 0, 0, 0).unwrap()
}

pub fn period(id: &str, start: DateTime<Utc>, end: DateTime<Utc>, order: i32) -> PricingPeriod {
    PricingPeriod::new(id, id, start, end, order).unwrap()
}

fn prices(entries: &[(&str, i64)]) -> BTreeMap<PeriodId, Money> {
    entries
        .iter()
        .map(|(id, major)| (PeriodId::new(*id), Money::from_major(*major)))
        .collect()
}

/// Early bird until 27 April, regular until August, a gap, then onsite in September.
pub fn catalogue() -> PricingCatalogue {
    PricingCatalogue {
        currency: Currency::new("USD").unwrap(),
        periods: vec![
            period("regular", at(4, 27), at(8, 1), 2),
            period("early-bird", at(1, 1), at(4, 27), 1),
            period("onsite", at(9, 1), at(9, 10), 3),
        ],
        registration_types: vec![
            RegistrationType {
                category: "delegate".into(),
                label: "Delegate".into(),
                price_per_period: prices(&[("early-bird", 699), ("regular", 899), ("onsite", 999)]),
                fallback_price: None,
                closed_price: None,
                active: true,
            },
            RegistrationType {
                category: "student".into(),
                label: "Student".into(),
                price_per_period: prices(&[("early-bird", 299)]),
                fallback_price: Some(Money::from_major(449)),
                closed_price: None,
                active: true,
            },
        ],
        sponsorship_tiers: vec![SponsorshipTier {
            tier_id: "gold".into(),
            label: "Gold".into(),
            flat_price: Money::from_major(5000),
        }],
        accommodation_options: vec![AccommodationOption {
            hotel_id: "grand".into(),
            name: "Grand Hotel".into(),
            rooms: vec![
                RoomRate {
                    room_type: "single".into(),
                    price_per_night: Money::from_major(150),
                },
                RoomRate {
                    room_type: "double".into(),
                    price_per_night: Money::from_major(220),
                },
            ],
        }],
        settings: RegistrationSettings::default(),
    }
}

pub fn write_catalogue(catalogue: &PricingCatalogue) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    let document = CatalogueDocument::from(catalogue);
    write!(file, "{}", serde_json::to_string_pretty(&document).unwrap()).unwrap();
    file.flush().unwrap();
    file
}

/// Short timeouts so failure paths finish quickly.
pub fn fast_settings() -> CheckoutSettings {
    CheckoutSettings {
        create_timeout_secs: 1,
        capture_timeout_secs: 1,
        create_retry_attempts: 3,
        retry_backoff_ms: 1,
        settle_wait_ms: 3000,
        settle_poll_ms: 5,
    }
}

pub fn delegate_request(registration_id: &str) -> CheckoutRequest {
    CheckoutRequest {
        registration_id: registration_id.into(),
        selection: Selection::registration("delegate"),
        participant_count: 1,
        client_total: Some(Money::from_major(699)),
        currency: Some(Currency::new("USD").unwrap()),
    }
}

/// An orchestrator over in-memory stores and the sandbox processor, at 1 March 2025.
pub struct Harness {
    pub orchestrator: Arc<CheckoutOrchestrator>,
    pub processor: SandboxProcessor,
    pub sessions: InMemorySessionStore,
    pub registrations: InMemoryRegistrationStore,
    pub catalogue: StaticCatalogue,
    pub clock: FixedClock,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(fast_settings())
    }

    pub fn with_settings(settings: CheckoutSettings) -> Self {
        let processor = SandboxProcessor::new();
        let sessions = InMemorySessionStore::new();
        let registrations = InMemoryRegistrationStore::new();
        let catalogue = StaticCatalogue::new(catalogue());
        let clock = FixedClock::new(at(3, 1));
        let orchestrator = CheckoutOrchestrator::new(
            Box::new(sessions.clone()),
            Box::new(registrations.clone()),
            Box::new(processor.clone()),
            Box::new(catalogue.clone()),
            Box::new(clock.clone()),
            settings,
        );
        Self {
            orchestrator: Arc::new(orchestrator),
            processor,
            sessions,
            registrations,
            catalogue,
            clock,
        }
    }

    /// Creates an order for `request` and approves it on both sides.
    pub async fn approved_order(&self, request: CheckoutRequest) -> PaymentSession {
        let session = self.orchestrator.create_order(request).await.unwrap();
        self.processor.approve(&session.order_id).await.unwrap();
        self.orchestrator.approve(&session.order_id).await.unwrap()
    }
}
