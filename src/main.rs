use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use miette::{IntoDiagnostic, Result, miette};
use regcheckout::application::checkout::{CheckoutOrchestrator, CheckoutRequest};
use regcheckout::application::poller::{PeriodPoller, feed_catalogue};
use regcheckout::application::pricing::PricingEngine;
use regcheckout::application::resolver::{Countdown, PeriodEvent, Resolution, resolve};
use regcheckout::config::Settings;
use regcheckout::domain::clock::{Clock, FixedClock, SystemClock};
use regcheckout::domain::money::Money;
use regcheckout::domain::ports::{
    CatalogueSource, PaymentProcessorBox, RegistrationStoreBox, SessionStoreBox,
};
use regcheckout::domain::quote::Selection;
use regcheckout::domain::session::{OrderId, SessionStatus};
use regcheckout::infrastructure::catalogue::JsonFileCatalogue;
use regcheckout::infrastructure::http::HttpPaymentProcessor;
use regcheckout::infrastructure::in_memory::{InMemoryRegistrationStore, InMemorySessionStore};
#[cfg(feature = "storage-rocksdb")]
use regcheckout::infrastructure::rocksdb::RocksDBStore;
use regcheckout::infrastructure::sandbox::SandboxProcessor;
use regcheckout::interfaces::api::DynamicPricingConfig;
use regcheckout::interfaces::json::catalogue_reader::CatalogueReader;
use regcheckout::telemetry;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Pricing catalogue JSON file
    #[arg(long, global = true, default_value = "catalogue.json")]
    catalogue: PathBuf,

    /// Runtime settings TOML file (optional)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Resolve the active, previous and next pricing periods
    Resolve {
        /// Instant to resolve at (RFC 3339). Defaults to now.
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },
    /// Price a selection in the period active at the given instant
    Quote {
        #[command(flatten)]
        selection: SelectionArgs,
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },
    /// Print the dynamic pricing configuration served to clients
    PricingConfig {
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },
    /// Create an order and, against the sandbox processor, approve and capture it
    Checkout {
        #[arg(long)]
        registration_id: String,
        #[command(flatten)]
        selection: SelectionArgs,
        /// Total the client displayed; rejected if it differs from the server-side quote
        #[arg(long)]
        amount: Option<Decimal>,
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },
    /// Capture an order approved on the processor side
    Capture {
        #[arg(long)]
        order_id: String,
        #[arg(long)]
        registration_id: String,
    },
    /// Settle a capture whose outcome was unknown
    Reconcile {
        #[arg(long)]
        order_id: String,
    },
    /// Poll the catalogue and print period events as JSON lines
    Watch {
        /// Stop after this many seconds instead of waiting for Ctrl-C
        #[arg(long)]
        for_secs: Option<u64>,
    },
}

#[derive(Args, Clone)]
struct SelectionArgs {
    /// Registration category, e.g. `delegate`
    #[arg(long = "type")]
    registration_type: Option<String>,
    #[arg(long)]
    sponsorship: Option<String>,
    #[arg(long, default_value_t = 1)]
    participants: u32,
    #[arg(long, requires_all = ["room", "nights"])]
    hotel: Option<String>,
    #[arg(long)]
    room: Option<String>,
    #[arg(long)]
    nights: Option<u32>,
}

impl SelectionArgs {
    fn selection(&self) -> Selection {
        let selection = Selection {
            registration_type: self.registration_type.clone(),
            sponsorship_tier: self.sponsorship.clone(),
            accommodation: None,
        };
        match (&self.hotel, &self.room, self.nights) {
            (Some(hotel), Some(room), Some(nights)) => {
                selection.with_accommodation(hotel, room, nights)
            }
            _ => selection,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ResolveOutput<'a> {
    #[serde(flatten)]
    resolution: &'a Resolution,
    countdown: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::init_logger(cli.verbose, cli.json_logs);

    let settings = match &cli.settings {
        Some(path) => Settings::load(path).into_diagnostic()?,
        None => Settings::default(),
    };

    match &cli.command {
        Command::Resolve { at } => {
            let catalogue = CatalogueReader::from_path(&cli.catalogue).into_diagnostic()?;
            let now = at.unwrap_or_else(Utc::now);
            let resolution = resolve(&catalogue.periods, now);
            let countdown = Countdown::for_active(&resolution, now).map(|c| c.to_string());
            print_json(&ResolveOutput {
                resolution: &resolution,
                countdown,
            })?;
        }
        Command::Quote { selection, at } => {
            let catalogue = CatalogueReader::from_path(&cli.catalogue).into_diagnostic()?;
            for (category, period) in catalogue.coverage_gaps(at.unwrap_or_else(Utc::now)) {
                tracing::warn!(%category, %period, "No price configured for upcoming period");
            }
            let engine = PricingEngine::new(Arc::new(catalogue));
            let quote = engine
                .quote_at(
                    &selection.selection(),
                    selection.participants,
                    at.unwrap_or_else(Utc::now),
                )
                .into_diagnostic()?;
            print_json(&quote)?;
        }
        Command::PricingConfig { at } => {
            let catalogue = CatalogueReader::from_path(&cli.catalogue).into_diagnostic()?;
            let resolution = resolve(&catalogue.periods, at.unwrap_or_else(Utc::now));
            print_json(&DynamicPricingConfig::new(&catalogue, &resolution))?;
        }
        Command::Checkout {
            registration_id,
            selection,
            amount,
            at,
        } => {
            let (processor, sandbox) = processor(&settings)?;
            let orchestrator = orchestrator(&cli, &settings, processor, clock(*at))?;
            let client_total = amount
                .map(Money::try_from)
                .transpose()
                .into_diagnostic()?;

            let session = orchestrator
                .create_order(CheckoutRequest {
                    registration_id: registration_id.clone(),
                    selection: selection.selection(),
                    participant_count: selection.participants,
                    client_total,
                    currency: None,
                })
                .await
                .into_diagnostic()?;

            let Some(sandbox) = sandbox else {
                // A real processor needs the buyer to approve on its own page first.
                print_json(&json!({ "session": session }))?;
                return Ok(());
            };
            sandbox
                .approve(&session.order_id)
                .await
                .into_diagnostic()?;
            orchestrator
                .approve(&session.order_id)
                .await
                .into_diagnostic()?;
            let receipt = orchestrator
                .capture(&session.order_id, registration_id)
                .await
                .into_diagnostic()?;
            let session = orchestrator
                .session(&session.order_id)
                .await
                .into_diagnostic()?;
            print_json(&json!({ "session": session, "receipt": receipt }))?;
        }
        Command::Capture {
            order_id,
            registration_id,
        } => {
            let (processor, _) = processor(&settings)?;
            let orchestrator = orchestrator(&cli, &settings, processor, clock(None))?;
            let order_id = OrderId::new(order_id.as_str());
            let session = orchestrator
                .sync_approval(&order_id)
                .await
                .into_diagnostic()?;
            if session.status == SessionStatus::Created {
                return Err(miette!("Order {order_id} has not been approved by the buyer yet"));
            }
            let receipt = orchestrator
                .capture(&order_id, registration_id)
                .await
                .into_diagnostic()?;
            print_json(&receipt)?;
        }
        Command::Reconcile { order_id } => {
            let (processor, _) = processor(&settings)?;
            let orchestrator = orchestrator(&cli, &settings, processor, clock(None))?;
            let session = orchestrator
                .reconcile(&OrderId::new(order_id.as_str()))
                .await
                .into_diagnostic()?;
            print_json(&session)?;
        }
        Command::Watch { for_secs } => {
            watch(&cli.catalogue, &settings, *for_secs).await?;
        }
    }

    Ok(())
}

fn clock(at: Option<DateTime<Utc>>) -> Box<dyn Clock> {
    match at {
        Some(at) => Box::new(FixedClock::new(at)),
        None => Box::new(SystemClock),
    }
}

fn processor(settings: &Settings) -> Result<(PaymentProcessorBox, Option<SandboxProcessor>)> {
    match &settings.processor.base_url {
        Some(base_url) => {
            let http = HttpPaymentProcessor::new(
                base_url,
                settings.processor.access_token.clone(),
                settings.checkout.capture_timeout(),
            )
            .into_diagnostic()?;
            Ok((Box::new(http), None))
        }
        None => {
            let sandbox = SandboxProcessor::new();
            Ok((Box::new(sandbox.clone()), Some(sandbox)))
        }
    }
}

fn stores(db_path: Option<&Path>) -> Result<(SessionStoreBox, RegistrationStoreBox)> {
    #[cfg(feature = "storage-rocksdb")]
    if let Some(db_path) = db_path {
        let store = RocksDBStore::open(db_path).into_diagnostic()?;
        return Ok((Box::new(store.clone()), Box::new(store)));
    }

    #[cfg(not(feature = "storage-rocksdb"))]
    if db_path.is_some() {
        eprintln!(
            "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
        );
    }

    Ok((
        Box::new(InMemorySessionStore::new()),
        Box::new(InMemoryRegistrationStore::new()),
    ))
}

fn orchestrator(
    cli: &Cli,
    settings: &Settings,
    processor: PaymentProcessorBox,
    clock: Box<dyn Clock>,
) -> Result<CheckoutOrchestrator> {
    let (sessions, registrations) = stores(cli.db_path.as_deref())?;
    Ok(CheckoutOrchestrator::new(
        sessions,
        registrations,
        processor,
        Box::new(JsonFileCatalogue::new(&cli.catalogue)),
        clock,
        settings.checkout.clone(),
    ))
}

async fn watch(catalogue: &Path, settings: &Settings, for_secs: Option<u64>) -> Result<()> {
    let source: Arc<dyn CatalogueSource> = Arc::new(JsonFileCatalogue::new(catalogue));
    let initial = source.snapshot().await.into_diagnostic()?;
    let (snapshots, feed) = feed_catalogue(source, initial, settings.periods.poll_interval());
    let mut handle = PeriodPoller::new(snapshots, Arc::new(SystemClock), &settings.periods).spawn();

    let stop = async {
        match for_secs {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    };
    tokio::pin!(stop);

    loop {
        tokio::select! {
            _ = &mut stop => break,
            Some(event) = handle.events.recv() => print_line(&event_json(&event))?,
            Ok(()) = handle.resolution.changed() => {
                let line = handle.resolution.borrow_and_update().as_ref().map(|resolution| {
                    json!({
                        "event": "resolved",
                        "now": resolution.now,
                        "active": resolution.active_id(),
                        "next": resolution.next.as_ref().map(|p| &p.id),
                        "countdown": Countdown::for_active(resolution, resolution.now)
                            .map(|c| c.to_string()),
                    })
                });
                if let Some(line) = line {
                    print_line(&line)?;
                }
            }
        }
    }

    handle.stop();
    feed.abort();
    Ok(())
}

fn event_json(event: &PeriodEvent) -> serde_json::Value {
    match event {
        PeriodEvent::Transitioned { from, to } => {
            json!({ "event": "transitioned", "from": from, "to": to })
        }
        PeriodEvent::EndingSoon {
            period_id,
            remaining,
        } => json!({
            "event": "endingSoon",
            "periodId": period_id,
            "remainingSecs": remaining.num_seconds(),
        }),
        PeriodEvent::Overlap { chosen, candidates } => {
            json!({ "event": "overlap", "chosen": chosen, "candidates": candidates })
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).into_diagnostic()?);
    Ok(())
}

fn print_line(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string(value).into_diagnostic()?);
    Ok(())
}
