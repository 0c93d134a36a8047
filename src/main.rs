//! raspa server binary

use clap::Parser;
use raspa::accounts::AccountService;
use raspa::api::monitoring::MetricsRegistry;
use raspa::api::{ApiServer, AppState};
use raspa::catalog::CatalogService;
use raspa::config::RaspaConfig;
use raspa::engine::WeightedEngine;
use raspa::ledger::{Ledger, LedgerDb};
use raspa::payments::{LocalReferenceProvider, PaymentService};
use raspa::plays::PlayCreditTracker;
use raspa::prizes::PrizeClaimWorkflow;
use raspa::purchases::PurchaseLedger;
use raspa::sessions::SessionAuthority;
use raspa::types::{CatalogEntry, Prize, PrizeKind};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "raspa", version, about = "Scratch-card storefront server")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "raspa.toml")]
    config: String,

    /// Seed a small demo catalog on startup
    #[arg(long)]
    seed_demo: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "raspa=info,tower_http=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = if Path::new(&cli.config).exists() {
        RaspaConfig::load(&cli.config)?
    } else {
        info!("config file {} not found, using defaults", cli.config);
        RaspaConfig::default()
    };
    config.validate()?;

    let ledger: Arc<dyn Ledger> = Arc::new(LedgerDb::open(
        &config.storage.data_directory,
        config.storage.write_buffer_size_mb,
        config.storage.txn_retry_limit,
    )?);
    info!(path = %config.storage.data_directory, "ledger opened");

    let sessions = Arc::new(SessionAuthority::new(ledger.clone(), &config.sessions));
    let accounts = Arc::new(AccountService::new(ledger.clone()));
    let catalog = Arc::new(CatalogService::new(ledger.clone()));
    let payments = Arc::new(PaymentService::new(
        ledger.clone(),
        Arc::new(LocalReferenceProvider),
        config.provider_timeout(),
    ));
    let purchases = Arc::new(PurchaseLedger::new(
        ledger.clone(),
        payments.clone(),
        config.payment_window(),
    ));
    let plays = Arc::new(PlayCreditTracker::new(
        ledger.clone(),
        Arc::new(WeightedEngine),
        config.engine_timeout(),
    ));
    let prizes = Arc::new(PrizeClaimWorkflow::new(ledger.clone()));

    if let (Ok(email), Ok(password)) = (
        std::env::var("RASPA_ADMIN_EMAIL"),
        std::env::var("RASPA_ADMIN_PASSWORD"),
    ) {
        accounts.ensure_admin(&email, &password)?;
        info!(email, "admin account ensured");
    }

    if cli.seed_demo {
        seed_demo_catalog(&catalog)?;
        info!("demo catalog seeded");
    }

    let state = Arc::new(AppState {
        sessions,
        accounts,
        catalog,
        purchases,
        plays,
        prizes,
        payments,
        metrics: Arc::new(MetricsRegistry::new()),
        version: env!("CARGO_PKG_VERSION").to_string(),
    });

    ApiServer::new(config.server.clone(), state).run().await
}

fn seed_demo_catalog(catalog: &CatalogService) -> Result<(), Box<dyn std::error::Error>> {
    let now = chrono::Utc::now();
    let card = CatalogEntry {
        id: "demo-premios".to_string(),
        title: "Raspadinha Prêmios".to_string(),
        category: Some("premios".to_string()),
        price_cents: 500,
        is_active: true,
        created_at: now,
    };
    catalog.upsert_card(&card)?;
    catalog.upsert_prize(&Prize {
        id: "demo-cash-100".to_string(),
        card_id: card.id.clone(),
        name: "R$ 100".to_string(),
        value_cents: 10_000,
        kind: PrizeKind::Cash,
        total_quantity: 50,
        remaining_quantity: 50,
        probability_bp: 400,
    })?;
    catalog.upsert_prize(&Prize {
        id: "demo-phone".to_string(),
        card_id: card.id.clone(),
        name: "Smartphone".to_string(),
        value_cents: 150_000,
        kind: PrizeKind::Item,
        total_quantity: 2,
        remaining_quantity: 2,
        probability_bp: 10,
    })?;
    Ok(())
}
