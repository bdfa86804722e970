use super::money::{Currency, Money};
use super::period::PeriodId;
use crate::error::CheckoutError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccommodationSelection {
    pub hotel_id: String,
    pub room_type: String,
    pub nights: u32,
}

/// What the registrant picked. Registration type and sponsorship tier are mutually
/// exclusive; the caller clears one before asking for a quote.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sponsorship_tier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accommodation: Option<AccommodationSelection>,
}

impl Selection {
    pub fn registration(category: impl Into<String>) -> Self {
        Self {
            registration_type: Some(category.into()),
            ..Self::default()
        }
    }

    pub fn sponsorship(tier_id: impl Into<String>) -> Self {
        Self {
            sponsorship_tier: Some(tier_id.into()),
            ..Self::default()
        }
    }

    pub fn with_accommodation(
        mut self,
        hotel_id: impl Into<String>,
        room_type: impl Into<String>,
        nights: u32,
    ) -> Self {
        self.accommodation = Some(AccommodationSelection {
            hotel_id: hotel_id.into(),
            room_type: room_type.into(),
            nights,
        });
        self
    }
}

/// The derived, never-persisted price of a selection in a period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceQuote {
    pub registration_component: Money,
    pub accommodation_component: Money,
    pub participant_count: u32,
    pub total: Money,
    pub currency: Currency,
    pub resolved_period_id: Option<PeriodId>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PriceResolutionError {
    #[error("A registration type and a sponsorship tier cannot both be selected")]
    ConflictingSelection,
    #[error("Select a registration type or a sponsorship tier")]
    EmptySelection,
    #[error("At least one participant is required")]
    NoParticipants,
    #[error("Accommodation requires at least one night")]
    NoNights,
    #[error("Unknown registration type '{0}'")]
    UnknownRegistrationType(String),
    #[error("Unknown sponsorship tier '{0}'")]
    UnknownSponsorshipTier(String),
    #[error("Unknown room '{room_type}' at hotel '{hotel_id}'")]
    UnknownRoom { hotel_id: String, room_type: String },
    #[error("Registration type '{category}' has no price for period '{period_id}'")]
    MissingPeriodPrice { category: String, period_id: PeriodId },
    #[error("Unknown pricing period '{0}'")]
    UnknownPeriod(PeriodId),
    #[error("Registration is closed and '{0}' has no closed-period price")]
    RegistrationClosed(String),
    #[error("Quote total overflows")]
    Overflow,
}

impl PriceResolutionError {
    /// Errors an operator must fix in the catalogue, as opposed to selections the
    /// registrant can correct.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            PriceResolutionError::MissingPeriodPrice { .. }
                | PriceResolutionError::UnknownPeriod(_)
                | PriceResolutionError::Overflow
        )
    }
}

impl From<PriceResolutionError> for CheckoutError {
    fn from(err: PriceResolutionError) -> Self {
        if err.is_configuration_error() {
            CheckoutError::Configuration(err.to_string())
        } else {
            CheckoutError::QuoteValidation(err.to_string())
        }
    }
}
