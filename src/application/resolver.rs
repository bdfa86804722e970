//! Pure period resolution.
//!
//! [`resolve`] answers "which pricing period applies at this instant" from an unsorted
//! collection of half-open windows. It holds no state between calls; detecting a change of
//! active period and rate-limiting warnings is the job of [`PeriodWatcher`], which diffs
//! consecutive resolutions on the caller's side.

use crate::domain::period::{PeriodId, PricingPeriod};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    pub now: DateTime<Utc>,
    pub active: Option<PricingPeriod>,
    /// Latest period that ended at or before `now`.
    pub previous: Option<PricingPeriod>,
    /// Earliest period starting after `now`.
    pub next: Option<PricingPeriod>,
    /// Every period containing `now`, in priority order, when more than one does.
    pub overlapping: Vec<PeriodId>,
    #[serde(skip)]
    pub time_until_active_ends: Option<Duration>,
    /// Time until the next period boundary, i.e. the next instant the answer can change.
    #[serde(skip)]
    pub time_until_next_update: Option<Duration>,
}

impl Resolution {
    pub fn active_id(&self) -> Option<&PeriodId> {
        self.active.as_ref().map(|p| &p.id)
    }

    pub fn is_ambiguous(&self) -> bool {
        self.overlapping.len() > 1
    }
}

/// Resolves the active, previous and next pricing periods at `now`.
///
/// Periods are ordered by `start_instant`, then `display_order`, then id. When several
/// periods contain `now` the one with the lowest `display_order` wins.
pub fn resolve(periods: &[PricingPeriod], now: DateTime<Utc>) -> Resolution {
    let mut sorted: Vec<&PricingPeriod> = periods.iter().collect();
    sorted.sort_by(|a, b| {
        a.start_instant
            .cmp(&b.start_instant)
            .then(a.display_order.cmp(&b.display_order))
            .then(a.id.cmp(&b.id))
    });

    let mut candidates: Vec<&PricingPeriod> =
        sorted.iter().copied().filter(|p| p.contains(now)).collect();
    // Stable: equal display orders keep the earlier start.
    candidates.sort_by_key(|p| p.display_order);
    let active = candidates.first().copied();

    let previous = sorted
        .iter()
        .copied()
        .filter(|p| p.end_instant <= now)
        .min_by(|a, b| {
            b.end_instant
                .cmp(&a.end_instant)
                .then(a.display_order.cmp(&b.display_order))
        });

    let next = sorted.iter().copied().find(|p| p.start_instant > now);

    let time_until_next_update = sorted
        .iter()
        .flat_map(|p| [p.start_instant, p.end_instant])
        .filter(|boundary| *boundary > now)
        .min()
        .map(|boundary| boundary - now);

    Resolution {
        now,
        active: active.cloned(),
        previous: previous.cloned(),
        next: next.cloned(),
        overlapping: if candidates.len() > 1 {
            candidates.iter().map(|p| p.id.clone()).collect()
        } else {
            Vec::new()
        },
        time_until_active_ends: active.map(|p| p.end_instant - now),
        time_until_next_update,
    }
}

/// Signals derived by comparing consecutive resolutions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeriodEvent {
    Transitioned {
        from: Option<PeriodId>,
        to: Option<PeriodId>,
    },
    EndingSoon {
        period_id: PeriodId,
        remaining: Duration,
    },
    Overlap {
        chosen: PeriodId,
        candidates: Vec<PeriodId>,
    },
}

/// Caller-side memory between resolution ticks.
#[derive(Debug)]
pub struct PeriodWatcher {
    warning_threshold: Duration,
    last_active: Option<Option<PeriodId>>,
    // Keyed by end instant too, so a period whose end moves can warn again.
    warned: HashSet<(PeriodId, DateTime<Utc>)>,
    last_overlap: Vec<PeriodId>,
}

impl PeriodWatcher {
    pub fn new(warning_threshold: Duration) -> Self {
        Self {
            warning_threshold,
            last_active: None,
            warned: HashSet::new(),
            last_overlap: Vec::new(),
        }
    }

    /// Folds a fresh resolution into the watcher and returns what changed.
    ///
    /// The first observation only records the active period. An ending-soon warning
    /// fires the first time the remaining time is at or below the threshold, once per
    /// period instance.
    pub fn observe(&mut self, resolution: &Resolution) -> Vec<PeriodEvent> {
        let mut events = Vec::new();
        let current = resolution.active_id().cloned();

        if let Some(previous) = &self.last_active
            && *previous != current
        {
            events.push(PeriodEvent::Transitioned {
                from: previous.clone(),
                to: current.clone(),
            });
        }
        self.last_active = Some(current);

        if resolution.overlapping != self.last_overlap {
            if let Some(chosen) = resolution.active_id()
                && resolution.is_ambiguous()
            {
                events.push(PeriodEvent::Overlap {
                    chosen: chosen.clone(),
                    candidates: resolution.overlapping.clone(),
                });
            }
            self.last_overlap = resolution.overlapping.clone();
        }

        // Periods that have ended can no longer warn.
        self.warned.retain(|(_, end)| *end > resolution.now);
        if let (Some(active), Some(remaining)) =
            (&resolution.active, resolution.time_until_active_ends)
            && remaining <= self.warning_threshold
            && self.warned.insert((active.id.clone(), active.end_instant))
        {
            events.push(PeriodEvent::EndingSoon {
                period_id: active.id.clone(),
                remaining,
            });
        }

        events
    }
}

/// Display-tick breakdown of a remaining duration.
///
/// Derived from an existing [`Resolution`]; ticking it every second never re-runs
/// resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Countdown {
    pub days: i64,
    pub hours: i64,
    pub minutes: i64,
    pub seconds: i64,
}

impl Countdown {
    pub fn until(end: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        let total = (end - now).num_seconds().max(0);
        Self {
            days: total / 86_400,
            hours: (total % 86_400) / 3_600,
            minutes: (total % 3_600) / 60,
            seconds: total % 60,
        }
    }

    /// Countdown to the end of the resolved active period, if any.
    pub fn for_active(resolution: &Resolution, now: DateTime<Utc>) -> Option<Self> {
        resolution
            .active
            .as_ref()
            .map(|p| Self::until(p.end_instant, now))
    }

    pub fn is_elapsed(&self) -> bool {
        *self == Self::default()
    }
}

impl fmt::Display for Countdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}d {:02}h {:02}m {:02}s",
            self.days, self.hours, self.minutes, self.seconds
        )
    }
}
