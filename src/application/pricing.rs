use crate::application::resolver::resolve;
use crate::domain::catalogue::PricingCatalogue;
use crate::domain::money::Money;
use crate::domain::period::{PeriodId, PricingPeriod};
use crate::domain::quote::{PriceQuote, PriceResolutionError, Selection};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Computes quotes against one immutable catalogue snapshot.
///
/// Holds nothing but the snapshot, so identical inputs always produce identical quotes.
#[derive(Debug, Clone)]
pub struct PricingEngine {
    catalogue: Arc<PricingCatalogue>,
}

impl PricingEngine {
    pub fn new(catalogue: Arc<PricingCatalogue>) -> Self {
        Self { catalogue }
    }

    pub fn catalogue(&self) -> &PricingCatalogue {
        &self.catalogue
    }

    /// Prices `selection` for `participant_count` people in `active_period`.
    ///
    /// Registration cost scales with participants; accommodation is per room and scales
    /// with nights only.
    pub fn quote(
        &self,
        selection: &Selection,
        active_period: Option<&PricingPeriod>,
        participant_count: u32,
    ) -> Result<PriceQuote, PriceResolutionError> {
        if participant_count == 0 {
            return Err(PriceResolutionError::NoParticipants);
        }

        let unit_price = self.unit_price(selection, active_period)?;
        let registration_component = unit_price
            .checked_mul(participant_count)
            .ok_or(PriceResolutionError::Overflow)?;
        let accommodation_component = self.accommodation_price(selection)?;
        let total = registration_component
            .checked_add(accommodation_component)
            .ok_or(PriceResolutionError::Overflow)?;

        Ok(PriceQuote {
            registration_component,
            accommodation_component,
            participant_count,
            total,
            currency: self.catalogue.currency.clone(),
            resolved_period_id: active_period.map(|p| p.id.clone()),
        })
    }

    /// Resolves the active period at `now` and quotes in it.
    pub fn quote_at(
        &self,
        selection: &Selection,
        participant_count: u32,
        now: DateTime<Utc>,
    ) -> Result<PriceQuote, PriceResolutionError> {
        let resolution = resolve(&self.catalogue.periods, now);
        self.quote(selection, resolution.active.as_ref(), participant_count)
    }

    /// Quotes pinned to a period by id, as recorded on an earlier quote.
    pub fn quote_in_period(
        &self,
        selection: &Selection,
        period_id: Option<&PeriodId>,
        participant_count: u32,
    ) -> Result<PriceQuote, PriceResolutionError> {
        let period = match period_id {
            Some(id) => Some(
                self.catalogue
                    .period(id)
                    .ok_or_else(|| PriceResolutionError::UnknownPeriod(id.clone()))?,
            ),
            None => None,
        };
        self.quote(selection, period, participant_count)
    }

    fn unit_price(
        &self,
        selection: &Selection,
        active_period: Option<&PricingPeriod>,
    ) -> Result<Money, PriceResolutionError> {
        match (&selection.registration_type, &selection.sponsorship_tier) {
            (Some(_), Some(_)) => Err(PriceResolutionError::ConflictingSelection),
            (None, None) => Err(PriceResolutionError::EmptySelection),
            (None, Some(tier_id)) => self
                .catalogue
                .sponsorship_tier(tier_id)
                .map(|tier| tier.flat_price)
                .ok_or_else(|| PriceResolutionError::UnknownSponsorshipTier(tier_id.clone())),
            (Some(category), None) => {
                let reg_type = self.catalogue.registration_type(category).ok_or_else(|| {
                    PriceResolutionError::UnknownRegistrationType(category.clone())
                })?;
                match active_period {
                    Some(period) => reg_type
                        .price_per_period
                        .get(&period.id)
                        .copied()
                        .or(reg_type.fallback_price)
                        .ok_or_else(|| PriceResolutionError::MissingPeriodPrice {
                            category: category.clone(),
                            period_id: period.id.clone(),
                        }),
                    None => reg_type
                        .closed_price
                        .ok_or_else(|| PriceResolutionError::RegistrationClosed(category.clone())),
                }
            }
        }
    }

    fn accommodation_price(&self, selection: &Selection) -> Result<Money, PriceResolutionError> {
        let Some(stay) = &selection.accommodation else {
            return Ok(Money::ZERO);
        };
        if stay.nights == 0 {
            return Err(PriceResolutionError::NoNights);
        }
        let rate = self
            .catalogue
            .room_rate(&stay.hotel_id, &stay.room_type)
            .ok_or_else(|| PriceResolutionError::UnknownRoom {
                hotel_id: stay.hotel_id.clone(),
                room_type: stay.room_type.clone(),
            })?;
        rate.price_per_night
            .checked_mul(stay.nights)
            .ok_or(PriceResolutionError::Overflow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::catalogue::{
        AccommodationOption, RegistrationSettings, RegistrationType, RoomRate, SponsorshipTier,
    };
    use crate::domain::money::Currency;
    use chrono::TimeZone;
    use std::collections::BTreeMap;

    fn at(m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, m, d, 0, 0, 0).unwrap()
    }

    fn engine() -> PricingEngine {
        let catalogue = PricingCatalogue {
            currency: Currency::new("USD").unwrap(),
            periods: vec![
                PricingPeriod::new("early", "Early Bird", at(1, 1), at(4, 27), 0).unwrap(),
                PricingPeriod::new("standard", "Standard", at(4, 27), at(8, 1), 1).unwrap(),
                PricingPeriod::new("onsite", "On-site", at(9, 1), at(9, 10), 2).unwrap(),
            ],
            registration_types: vec![
                RegistrationType {
                    category: "delegate".into(),
                    label: "Delegate".into(),
                    price_per_period: BTreeMap::from([
                        (PeriodId::new("early"), Money::from_major(699)),
                        (PeriodId::new("standard"), Money::from_major(899)),
                    ]),
                    fallback_price: None,
                    closed_price: None,
                    active: true,
                },
                RegistrationType {
                    category: "student".into(),
                    label: "Student".into(),
                    price_per_period: BTreeMap::from([(
                        PeriodId::new("early"),
                        Money::from_major(299),
                    )]),
                    fallback_price: Some(Money::from_major(349)),
                    closed_price: Some(Money::from_major(399)),
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
                rooms: vec![RoomRate {
                    room_type: "double".into(),
                    price_per_night: Money::from_minor(18_050),
                }],
            }],
            settings: RegistrationSettings::default(),
        };
        PricingEngine::new(Arc::new(catalogue))
    }

    #[test]
    fn test_early_bird_delegate() {
        let engine = engine();
        let quote = engine
            .quote_at(&Selection::registration("delegate"), 1, at(3, 1))
            .unwrap();
        assert_eq!(quote.total, Money::from_major(699));
        assert_eq!(quote.accommodation_component, Money::ZERO);
        assert_eq!(quote.resolved_period_id, Some(PeriodId::new("early")));
        assert_eq!(quote.currency.code(), "USD");
    }

    #[test]
    fn test_participants_scale_registration_only() {
        let engine = engine();
        let selection = Selection::registration("delegate").with_accommodation("grand", "double", 2);
        let one = engine.quote_at(&selection, 1, at(3, 1)).unwrap();
        let three = engine.quote_at(&selection, 3, at(3, 1)).unwrap();

        assert_eq!(three.registration_component, Money::from_major(699 * 3));
        assert_eq!(one.accommodation_component, three.accommodation_component);
        assert_eq!(three.accommodation_component, Money::from_minor(36_100));
        assert_eq!(three.total, Money::from_minor(699 * 3 * 100 + 36_100));
    }

    #[test]
    fn test_nights_scale_accommodation_only() {
        let engine = engine();
        let two = Selection::registration("delegate").with_accommodation("grand", "double", 2);
        let five = Selection::registration("delegate").with_accommodation("grand", "double", 5);
        let q2 = engine.quote_at(&two, 1, at(3, 1)).unwrap();
        let q5 = engine.quote_at(&five, 1, at(3, 1)).unwrap();

        assert_eq!(q2.registration_component, q5.registration_component);
        assert_eq!(q5.accommodation_component, Money::from_minor(18_050 * 5));
    }

    #[test]
    fn test_quote_is_repeatable() {
        let engine = engine();
        let selection = Selection::registration("delegate").with_accommodation("grand", "double", 3);
        let first = engine.quote_at(&selection, 2, at(5, 1)).unwrap();
        for _ in 0..10 {
            assert_eq!(engine.quote_at(&selection, 2, at(5, 1)).unwrap(), first);
        }
    }

    #[test]
    fn test_conflicting_selection_rejected() {
        let mut selection = Selection::registration("delegate");
        selection.sponsorship_tier = Some("gold".into());
        assert_eq!(
            engine().quote_at(&selection, 1, at(3, 1)),
            Err(PriceResolutionError::ConflictingSelection)
        );
        assert_eq!(
            engine().quote_at(&Selection::default(), 1, at(3, 1)),
            Err(PriceResolutionError::EmptySelection)
        );
    }

    #[test]
    fn test_sponsorship_is_flat_across_periods() {
        let engine = engine();
        let selection = Selection::sponsorship("gold");
        let early = engine.quote_at(&selection, 1, at(3, 1)).unwrap();
        let standard = engine.quote_at(&selection, 1, at(6, 1)).unwrap();
        let closed = engine.quote_at(&selection, 1, at(8, 15)).unwrap();
        assert_eq!(early.total, Money::from_major(5000));
        assert_eq!(early.total, standard.total);
        assert_eq!(early.total, closed.total);
    }

    #[test]
    fn test_missing_period_price_is_configuration_error() {
        let err = engine()
            .quote_at(&Selection::registration("delegate"), 1, at(9, 2))
            .unwrap_err();
        assert_eq!(
            err,
            PriceResolutionError::MissingPeriodPrice {
                category: "delegate".into(),
                period_id: PeriodId::new("onsite"),
            }
        );
        assert!(err.is_configuration_error());
    }

    #[test]
    fn test_fallback_and_closed_prices() {
        let engine = engine();
        let selection = Selection::registration("student");
        assert_eq!(
            engine.quote_at(&selection, 1, at(9, 2)).unwrap().total,
            Money::from_major(349)
        );
        let closed = engine.quote_at(&selection, 1, at(8, 15)).unwrap();
        assert_eq!(closed.total, Money::from_major(399));
        assert_eq!(closed.resolved_period_id, None);

        assert_eq!(
            engine.quote_at(&Selection::registration("delegate"), 1, at(8, 15)),
            Err(PriceResolutionError::RegistrationClosed("delegate".into()))
        );
    }

    #[test]
    fn test_invalid_inputs() {
        let engine = engine();
        assert_eq!(
            engine.quote_at(&Selection::registration("delegate"), 0, at(3, 1)),
            Err(PriceResolutionError::NoParticipants)
        );
        assert_eq!(
            engine.quote_at(
                &Selection::registration("delegate").with_accommodation("grand", "double", 0),
                1,
                at(3, 1)
            ),
            Err(PriceResolutionError::NoNights)
        );
        assert!(matches!(
            engine.quote_at(
                &Selection::registration("delegate").with_accommodation("grand", "suite", 1),
                1,
                at(3, 1)
            ),
            Err(PriceResolutionError::UnknownRoom { .. })
        ));
        assert!(matches!(
            engine.quote_at(&Selection::sponsorship("platinum"), 1, at(3, 1)),
            Err(PriceResolutionError::UnknownSponsorshipTier(_))
        ));
    }

    #[test]
    fn test_quote_in_recorded_period() {
        let engine = engine();
        let selection = Selection::registration("delegate");
        let pinned = engine
            .quote_in_period(&selection, Some(&PeriodId::new("early")), 1)
            .unwrap();
        assert_eq!(pinned.total, Money::from_major(699));
        assert_eq!(
            engine.quote_in_period(&selection, Some(&PeriodId::new("gone")), 1),
            Err(PriceResolutionError::UnknownPeriod(PeriodId::new("gone")))
        );
    }

    #[test]
    fn test_overflow_detected() {
        let engine = engine();
        let selection = Selection::sponsorship("gold");
        assert_eq!(
            engine.quote_at(&selection, u32::MAX, at(3, 1)).map(|q| q.total > Money::ZERO),
            Ok(true)
        );
        let mut catalogue = engine.catalogue().clone();
        catalogue.sponsorship_tiers[0].flat_price = Money::from_minor(i64::MAX / 2);
        let engine = PricingEngine::new(Arc::new(catalogue));
        assert_eq!(
            engine.quote_at(&selection, 3, at(3, 1)),
            Err(PriceResolutionError::Overflow)
        );
    }
}
