use crate::error::CheckoutError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier of a pricing period, as issued by the configuration authority.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeriodId(pub String);

impl PeriodId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeriodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A half-open time window `[start, end)` during which one price table applies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingPeriod {
    pub id: PeriodId,
    pub title: String,
    pub start_instant: DateTime<Utc>,
    pub end_instant: DateTime<Utc>,
    /// Declared priority. Lower wins when windows overlap.
    #[serde(default)]
    pub display_order: i32,
}

impl PricingPeriod {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        start_instant: DateTime<Utc>,
        end_instant: DateTime<Utc>,
        display_order: i32,
    ) -> Result<Self, CheckoutError> {
        let period = Self {
            id: PeriodId::new(id),
            title: title.into(),
            start_instant,
            end_instant,
            display_order,
        };
        period.validate()?;
        Ok(period)
    }

    pub fn validate(&self) -> Result<(), CheckoutError> {
        if self.start_instant < self.end_instant {
            Ok(())
        } else {
            Err(CheckoutError::Configuration(format!(
                "Pricing period '{}' must start before it ends",
                self.id
            )))
        }
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start_instant <= instant && instant < self.end_instant
    }
}
