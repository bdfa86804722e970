//! Interval-driven period resolution.
//!
//! The poller re-runs [`resolve`] on a fixed tick and immediately whenever a new catalogue
//! snapshot is published. Period changes leave as [`PeriodEvent`]s on an mpsc channel; the
//! latest [`Resolution`] is kept in a watch channel for display code, which may tick a
//! [`Countdown`](crate::application::resolver::Countdown) as often as it likes without
//! resolving again.

use crate::application::resolver::{PeriodEvent, PeriodWatcher, Resolution, resolve};
use crate::config::PeriodSettings;
use crate::domain::catalogue::PricingCatalogue;
use crate::domain::clock::Clock;
use crate::domain::ports::CatalogueSource;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

const EVENT_BUFFER: usize = 64;

/// Receiving side of a running poller.
pub struct PollerHandle {
    pub events: mpsc::Receiver<PeriodEvent>,
    pub resolution: watch::Receiver<Option<Resolution>>,
    task: JoinHandle<()>,
}

impl PollerHandle {
    pub fn stop(self) {
        self.task.abort();
    }
}

pub struct PeriodPoller {
    catalogue: watch::Receiver<Arc<PricingCatalogue>>,
    clock: Arc<dyn Clock>,
    tick: Duration,
    watcher: PeriodWatcher,
}

impl PeriodPoller {
    pub fn new(
        catalogue: watch::Receiver<Arc<PricingCatalogue>>,
        clock: Arc<dyn Clock>,
        settings: &PeriodSettings,
    ) -> Self {
        Self {
            catalogue,
            clock,
            tick: settings.poll_interval(),
            watcher: PeriodWatcher::new(settings.warning_threshold()),
        }
    }

    /// Starts polling on the current runtime. The first resolution happens right away.
    pub fn spawn(self) -> PollerHandle {
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        let (resolution_tx, resolution_rx) = watch::channel(None);
        let task = tokio::spawn(self.run(event_tx, resolution_tx));
        PollerHandle {
            events: event_rx,
            resolution: resolution_rx,
            task,
        }
    }

    async fn run(
        mut self,
        events: mpsc::Sender<PeriodEvent>,
        resolutions: watch::Sender<Option<Resolution>>,
    ) {
        let mut ticker = interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = self.catalogue.changed() => {
                    if changed.is_err() {
                        debug!("Catalogue feed closed, stopping poller");
                        return;
                    }
                    debug!("Catalogue snapshot changed, re-resolving");
                }
            }

            let resolution = {
                let catalogue = self.catalogue.borrow_and_update();
                resolve(&catalogue.periods, self.clock.now())
            };
            for event in self.watcher.observe(&resolution) {
                log_event(&event);
                // Nobody listening for events is fine; the resolution is still published.
                let _ = events.send(event).await;
            }
            resolutions.send_replace(Some(resolution));
        }
    }
}

fn log_event(event: &PeriodEvent) {
    match event {
        PeriodEvent::Transitioned { from, to } => info!(
            from = from.as_ref().map(|p| p.as_str()).unwrap_or("none"),
            to = to.as_ref().map(|p| p.as_str()).unwrap_or("none"),
            "Active pricing period changed"
        ),
        PeriodEvent::EndingSoon {
            period_id,
            remaining,
        } => warn!(
            %period_id,
            remaining_secs = remaining.num_seconds(),
            "Active pricing period is about to end"
        ),
        PeriodEvent::Overlap { chosen, candidates } => warn!(
            %chosen,
            ?candidates,
            "Overlapping pricing periods, picked lowest display order"
        ),
    }
}

/// Fetches a catalogue snapshot from `source` once per `tick` and publishes it when it
/// differs from the previous one. A failed fetch keeps the last good snapshot.
pub fn feed_catalogue(
    source: Arc<dyn CatalogueSource>,
    initial: Arc<PricingCatalogue>,
    tick: Duration,
) -> (watch::Receiver<Arc<PricingCatalogue>>, JoinHandle<()>) {
    let (sender, receiver) = watch::channel(initial);
    let task = tokio::spawn(async move {
        let mut ticker = interval(tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The initial snapshot is already published.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if sender.is_closed() {
                return;
            }
            match source.snapshot().await {
                Ok(fresh) => {
                    sender.send_if_modified(|current| {
                        if **current == *fresh {
                            false
                        } else {
                            *current = fresh;
                            true
                        }
                    });
                }
                Err(err) => warn!(error = %err, "Catalogue refresh failed, keeping last snapshot"),
            }
        }
    });
    (receiver, task)
}
