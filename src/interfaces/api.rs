//! Request and response envelopes of the checkout endpoints.
//!
//! Every handler answers with `{ "success": true, ... }` or `{ "success": false, "error": ... }`;
//! errors never escape as `Err`.

use crate::application::checkout::{CheckoutOrchestrator, CheckoutRequest};
use crate::application::resolver::Resolution;
use crate::domain::catalogue::{
    AccommodationOption, PricingCatalogue, RegistrationSettings, RegistrationType,
    SponsorshipTier,
};
use crate::domain::money::{Currency, Money};
use crate::domain::period::PricingPeriod;
use crate::domain::quote::Selection;
use crate::domain::session::OrderId;
use crate::error::{CheckoutError, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

fn one() -> u32 {
    1
}

/// The client's view of what is being paid for. Only the selection is trusted; the price
/// is recomputed from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationSnapshot {
    #[serde(flatten)]
    pub selection: Selection,
    #[serde(default = "one")]
    pub participant_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub amount: Decimal,
    pub currency: String,
    pub registration_id: String,
    pub registration_snapshot: RegistrationSnapshot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureOrderRequest {
    pub order_id: String,
    pub registration_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureOrderResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CaptureOrderResponse {
    fn failure(error: &CheckoutError) -> Self {
        Self {
            success: false,
            payment_id: None,
            amount: None,
            currency: None,
            status: None,
            error: Some(error.to_string()),
        }
    }
}

/// Read model served to the registration page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DynamicPricingConfig {
    pub currency: Currency,
    pub pricing_periods: Vec<PricingPeriod>,
    pub active_period: Option<PricingPeriod>,
    pub registration_types: Vec<RegistrationType>,
    pub sponsorship_tiers: Vec<SponsorshipTier>,
    pub accommodation_options: Vec<AccommodationOption>,
    pub registration_settings: RegistrationSettings,
}

impl DynamicPricingConfig {
    pub fn new(catalogue: &PricingCatalogue, resolution: &Resolution) -> Self {
        let mut pricing_periods = catalogue.periods.clone();
        pricing_periods.sort_by(|a, b| {
            a.start_instant
                .cmp(&b.start_instant)
                .then(a.display_order.cmp(&b.display_order))
        });
        Self {
            currency: catalogue.currency.clone(),
            pricing_periods,
            active_period: resolution.active.clone(),
            registration_types: catalogue
                .registration_types
                .iter()
                .filter(|t| t.active)
                .cloned()
                .collect(),
            sponsorship_tiers: catalogue.sponsorship_tiers.clone(),
            accommodation_options: catalogue.accommodation_options.clone(),
            registration_settings: catalogue.settings,
        }
    }
}

/// Adapts orchestrator results to the wire envelopes.
#[derive(Clone)]
pub struct CheckoutApi {
    orchestrator: Arc<CheckoutOrchestrator>,
}

impl CheckoutApi {
    pub fn new(orchestrator: Arc<CheckoutOrchestrator>) -> Self {
        Self { orchestrator }
    }

    pub async fn pricing_config(&self) -> Result<DynamicPricingConfig> {
        let (catalogue, resolution) = self.orchestrator.pricing_view().await?;
        Ok(DynamicPricingConfig::new(&catalogue, &resolution))
    }

    pub async fn create_order(&self, request: CreateOrderRequest) -> CreateOrderResponse {
        match self.try_create_order(request).await {
            Ok(order_id) => CreateOrderResponse {
                success: true,
                order_id: Some(order_id.0),
                error: None,
            },
            Err(err) => {
                tracing::warn!(error = %err, "Create order request failed");
                CreateOrderResponse {
                    success: false,
                    order_id: None,
                    error: Some(err.to_string()),
                }
            }
        }
    }

    async fn try_create_order(&self, request: CreateOrderRequest) -> Result<OrderId> {
        let client_total = Money::try_from(request.amount)?;
        let currency = Currency::new(&request.currency)?;
        let session = self
            .orchestrator
            .create_order(CheckoutRequest {
                registration_id: request.registration_id,
                selection: request.registration_snapshot.selection,
                participant_count: request.registration_snapshot.participant_count,
                client_total: Some(client_total),
                currency: Some(currency),
            })
            .await?;
        Ok(session.order_id)
    }

    pub async fn capture_order(&self, request: CaptureOrderRequest) -> CaptureOrderResponse {
        let order_id = OrderId::new(request.order_id);
        match self
            .orchestrator
            .capture(&order_id, &request.registration_id)
            .await
        {
            Ok(receipt) => CaptureOrderResponse {
                success: true,
                payment_id: Some(receipt.payment_id),
                amount: Some(receipt.amount.to_decimal()),
                currency: Some(receipt.currency.code().to_string()),
                status: Some("completed".to_string()),
                error: None,
            },
            Err(err) => {
                tracing::warn!(%order_id, error = %err, "Capture order request failed");
                CaptureOrderResponse::failure(&err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::resolver::resolve;
    use crate::config::CheckoutSettings;
    use crate::domain::clock::FixedClock;
    use crate::infrastructure::catalogue::StaticCatalogue;
    use crate::infrastructure::in_memory::{InMemoryRegistrationStore, InMemorySessionStore};
    use crate::infrastructure::sandbox::SandboxProcessor;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn catalogue() -> PricingCatalogue {
        let early = PricingPeriod::new(
            "early-bird",
            "Early Bird",
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 4, 27, 0, 0, 0).unwrap(),
            1,
        )
        .unwrap();
        PricingCatalogue {
            currency: Currency::new("USD").unwrap(),
            registration_types: vec![RegistrationType {
                category: "delegate".into(),
                label: "Delegate".into(),
                price_per_period: BTreeMap::from([(early.id.clone(), Money::from_major(699))]),
                fallback_price: None,
                closed_price: None,
                active: true,
            }],
            periods: vec![early],
            sponsorship_tiers: vec![],
            accommodation_options: vec![],
            settings: RegistrationSettings::default(),
        }
    }

    fn api() -> (CheckoutApi, SandboxProcessor) {
        let processor = SandboxProcessor::new();
        let orchestrator = CheckoutOrchestrator::new(
            Box::new(InMemorySessionStore::new()),
            Box::new(InMemoryRegistrationStore::new()),
            Box::new(processor.clone()),
            Box::new(StaticCatalogue::new(catalogue())),
            Box::new(FixedClock::new(
                Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap(),
            )),
            CheckoutSettings::default(),
        );
        (CheckoutApi::new(Arc::new(orchestrator)), processor)
    }

    fn create_request(amount: Decimal) -> CreateOrderRequest {
        serde_json::from_value(json!({
            "amount": amount,
            "currency": "USD",
            "registrationId": "reg-1",
            "registrationSnapshot": {"registrationType": "delegate"}
        }))
        .unwrap()
    }

    #[test]
    fn test_request_snapshot_defaults_to_one_participant() {
        let request = create_request(dec!(699));
        assert_eq!(request.registration_snapshot.participant_count, 1);
        assert_eq!(
            request.registration_snapshot.selection,
            Selection::registration("delegate")
        );
    }

    #[tokio::test]
    async fn test_create_and_capture_envelopes() {
        let (api, processor) = api();
        let created = api.create_order(create_request(dec!(699.00))).await;
        assert!(created.success, "{:?}", created.error);
        let order_id = created.order_id.unwrap();
        processor.approve(&OrderId::new(order_id.clone())).await.unwrap();

        let captured = api
            .capture_order(CaptureOrderRequest {
                order_id,
                registration_id: "reg-1".into(),
            })
            .await;
        assert!(captured.success);
        assert_eq!(captured.amount, Some(dec!(699.00)));
        assert_eq!(captured.status.as_deref(), Some("completed"));

        let body = serde_json::to_value(&captured).unwrap();
        assert_eq!(body["currency"], "USD");
        assert!(body.get("error").is_none());
    }

    #[tokio::test]
    async fn test_stale_client_total_is_rejected() {
        let (api, processor) = api();
        let response = api.create_order(create_request(dec!(599))).await;

        assert!(!response.success);
        assert!(response.order_id.is_none());
        assert!(response.error.unwrap().contains("does not match"));
        assert_eq!(processor.create_calls(), 0);
    }

    #[tokio::test]
    async fn test_pricing_config_reports_active_period() {
        let (api, _) = api();
        let config = api.pricing_config().await.unwrap();
        assert_eq!(config.active_period.unwrap().id.as_str(), "early-bird");

        let body = serde_json::to_value(
            DynamicPricingConfig::new(
                &catalogue(),
                &resolve(&catalogue().periods, Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()),
            ),
        )
        .unwrap();
        assert!(body["activePeriod"].is_null());
        assert_eq!(body["registrationSettings"]["registrationStatus"]["isOpen"], true);
    }
}
