use crate::domain::catalogue::{
    AccommodationOption, PricingCatalogue, RegistrationSettings, RegistrationType,
    SponsorshipTier,
};
use crate::domain::money::Currency;
use crate::domain::period::PricingPeriod;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// On-disk shape of the dynamic pricing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogueDocument {
    pub currency: Currency,
    pub pricing_periods: Vec<PricingPeriod>,
    #[serde(default)]
    pub registration_types: Vec<RegistrationType>,
    #[serde(default)]
    pub sponsorship_tiers: Vec<SponsorshipTier>,
    #[serde(default)]
    pub accommodation_options: Vec<AccommodationOption>,
    #[serde(default)]
    pub registration_settings: RegistrationSettings,
}

impl From<CatalogueDocument> for PricingCatalogue {
    fn from(doc: CatalogueDocument) -> Self {
        Self {
            currency: doc.currency,
            periods: doc.pricing_periods,
            registration_types: doc.registration_types,
            sponsorship_tiers: doc.sponsorship_tiers,
            accommodation_options: doc.accommodation_options,
            settings: doc.registration_settings,
        }
    }
}

impl From<&PricingCatalogue> for CatalogueDocument {
    fn from(catalogue: &PricingCatalogue) -> Self {
        Self {
            currency: catalogue.currency.clone(),
            pricing_periods: catalogue.periods.clone(),
            registration_types: catalogue.registration_types.clone(),
            sponsorship_tiers: catalogue.sponsorship_tiers.clone(),
            accommodation_options: catalogue.accommodation_options.clone(),
            registration_settings: catalogue.settings,
        }
    }
}

/// Reads a pricing catalogue from a JSON source.
///
/// The result is validated before it is returned, so a catalogue obtained through this
/// reader is always structurally sound.
pub struct CatalogueReader<R: Read> {
    source: R,
}

impl<R: Read> CatalogueReader<R> {
    /// Creates a new `CatalogueReader` from any `Read` source (e.g., File, Stdin).
    pub fn new(source: R) -> Self {
        Self { source }
    }

    pub fn read(self) -> Result<PricingCatalogue> {
        let document: CatalogueDocument = serde_json::from_reader(self.source)?;
        let catalogue = PricingCatalogue::from(document);
        catalogue.validate()?;
        Ok(catalogue)
    }
}

impl CatalogueReader<BufReader<File>> {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<PricingCatalogue> {
        let file = File::open(path)?;
        CatalogueReader::new(BufReader::new(file)).read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::Money;
    use crate::domain::period::PeriodId;
    use crate::error::CheckoutError;

    const DOC: &str = r#"{
        "currency": "usd",
        "pricingPeriods": [
            {"id": "early-bird", "title": "Early Bird",
             "startInstant": "2025-01-01T00:00:00Z", "endInstant": "2025-04-27T00:00:00Z",
             "displayOrder": 1},
            {"id": "regular", "title": "Regular",
             "startInstant": "2025-04-27T00:00:00Z", "endInstant": "2025-06-01T00:00:00Z",
             "displayOrder": 2}
        ],
        "registrationTypes": [
            {"category": "delegate", "label": "Delegate",
             "pricePerPeriod": {"early-bird": "699.00", "regular": "899.00"}}
        ],
        "sponsorshipTiers": [{"tierId": "gold", "flatPrice": "5000"}],
        "accommodationOptions": [
            {"hotelId": "grand", "rooms": [{"roomType": "single", "pricePerNight": "150.00"}]}
        ]
    }"#;

    #[test]
    fn test_reader_valid_document() {
        let catalogue = CatalogueReader::new(DOC.as_bytes()).read().unwrap();

        assert_eq!(catalogue.currency.code(), "USD");
        assert_eq!(catalogue.periods.len(), 2);
        assert!(catalogue.is_open());
        let delegate = catalogue.registration_type("delegate").unwrap();
        assert_eq!(
            delegate.price_per_period.get(&PeriodId::new("early-bird")),
            Some(&Money::from_major(699))
        );
        assert_eq!(
            catalogue.room_rate("grand", "single").unwrap().price_per_night,
            Money::from_major(150)
        );
    }

    #[test]
    fn test_reader_rejects_inverted_period() {
        let doc = DOC.replace("2025-06-01T00:00:00Z", "2025-04-01T00:00:00Z");
        let result = CatalogueReader::new(doc.as_bytes()).read();
        assert!(matches!(result, Err(CheckoutError::Configuration(_))));
    }

    #[test]
    fn test_reader_malformed_json() {
        let result = CatalogueReader::new("{\"currency\": \"USD\"".as_bytes()).read();
        assert!(matches!(result, Err(CheckoutError::Json(_))));
    }
}
