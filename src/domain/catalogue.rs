use super::money::{Currency, Money};
use super::period::{PeriodId, PricingPeriod};
use crate::error::CheckoutError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

fn default_true() -> bool {
    true
}

/// Per-period prices for one registration category (e.g. `delegate`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationType {
    pub category: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub price_per_period: BTreeMap<PeriodId, Money>,
    /// Used when the active period has no explicit entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_price: Option<Money>,
    /// Used when no period is active at all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_price: Option<Money>,
    #[serde(default = "default_true")]
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SponsorshipTier {
    pub tier_id: String,
    #[serde(default)]
    pub label: String,
    pub flat_price: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomRate {
    pub room_type: String,
    pub price_per_night: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccommodationOption {
    pub hotel_id: String,
    #[serde(default)]
    pub name: String,
    pub rooms: Vec<RoomRate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationStatus {
    pub is_open: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationSettings {
    pub registration_status: RegistrationStatus,
}

impl Default for RegistrationSettings {
    fn default() -> Self {
        Self {
            registration_status: RegistrationStatus { is_open: true },
        }
    }
}

/// An immutable snapshot of everything pricing depends on.
///
/// Snapshots are validated once when they are built and then shared behind an `Arc`.
/// A configuration change produces a new snapshot; nothing edits one in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricingCatalogue {
    pub currency: Currency,
    pub periods: Vec<PricingPeriod>,
    pub registration_types: Vec<RegistrationType>,
    pub sponsorship_tiers: Vec<SponsorshipTier>,
    pub accommodation_options: Vec<AccommodationOption>,
    pub settings: RegistrationSettings,
}

impl PricingCatalogue {
    /// Checks the structural invariants of the catalogue.
    ///
    /// Every period must satisfy `start < end`, period ids must be unique, and every price
    /// entry must refer to a period that exists. Prices may not be negative.
    pub fn validate(&self) -> Result<(), CheckoutError> {
        let mut ids = HashSet::new();
        for period in &self.periods {
            period.validate()?;
            if !ids.insert(&period.id) {
                return Err(CheckoutError::Configuration(format!(
                    "Duplicate pricing period id '{}'",
                    period.id
                )));
            }
        }

        let mut categories = HashSet::new();
        for reg_type in &self.registration_types {
            if !categories.insert(reg_type.category.as_str()) {
                return Err(CheckoutError::Configuration(format!(
                    "Duplicate registration type '{}'",
                    reg_type.category
                )));
            }
            for (period_id, price) in &reg_type.price_per_period {
                if !ids.contains(period_id) {
                    return Err(CheckoutError::Configuration(format!(
                        "Registration type '{}' prices unknown period '{}'",
                        reg_type.category, period_id
                    )));
                }
                ensure_non_negative(*price, &reg_type.category)?;
            }
            for price in reg_type.fallback_price.iter().chain(&reg_type.closed_price) {
                ensure_non_negative(*price, &reg_type.category)?;
            }
        }

        for tier in &self.sponsorship_tiers {
            ensure_non_negative(tier.flat_price, &tier.tier_id)?;
        }
        for option in &self.accommodation_options {
            for room in &option.rooms {
                ensure_non_negative(room.price_per_night, &option.hotel_id)?;
            }
        }
        Ok(())
    }

    pub fn period(&self, id: &PeriodId) -> Option<&PricingPeriod> {
        self.periods.iter().find(|p| &p.id == id)
    }

    pub fn registration_type(&self, category: &str) -> Option<&RegistrationType> {
        self.registration_types
            .iter()
            .find(|t| t.category == category && t.active)
    }

    pub fn sponsorship_tier(&self, tier_id: &str) -> Option<&SponsorshipTier> {
        self.sponsorship_tiers.iter().find(|t| t.tier_id == tier_id)
    }

    pub fn room_rate(&self, hotel_id: &str, room_type: &str) -> Option<&RoomRate> {
        self.accommodation_options
            .iter()
            .find(|o| o.hotel_id == hotel_id)
            .and_then(|o| o.rooms.iter().find(|r| r.room_type == room_type))
    }

    pub fn is_open(&self) -> bool {
        self.settings.registration_status.is_open
    }

    /// Active registration types lacking a price for a current or future period, with
    /// no fallback to cover the gap. Each entry is a configuration error waiting to be
    /// hit by a quote.
    pub fn coverage_gaps(&self, now: DateTime<Utc>) -> Vec<(String, PeriodId)> {
        let mut gaps = Vec::new();
        for reg_type in self.registration_types.iter().filter(|t| t.active) {
            if reg_type.fallback_price.is_some() {
                continue;
            }
            for period in self.periods.iter().filter(|p| p.end_instant > now) {
                if !reg_type.price_per_period.contains_key(&period.id) {
                    gaps.push((reg_type.category.clone(), period.id.clone()));
                }
            }
        }
        gaps
    }
}

fn ensure_non_negative(price: Money, owner: &str) -> Result<(), CheckoutError> {
    if price.minor() < 0 {
        Err(CheckoutError::Configuration(format!(
            "Negative price configured for '{owner}'"
        )))
    } else {
        Ok(())
    }
}
