use actix_web::{App, HttpServer, web};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use marketpay::application::engine::{Engine, EnginePorts};
use marketpay::application::ledger::{DateRange, PaymentLedger};
use marketpay::application::locks::OrderLocks;
use marketpay::config::GatewayConfig;
use marketpay::domain::ports::{OrderStoreRef, PaymentStoreRef};
use marketpay::infrastructure::events::TracingEventSink;
use marketpay::infrastructure::gateways::{ProviderClients, gateway_set};
use marketpay::infrastructure::in_memory::{
    InMemoryCatalog, InMemoryOrderStore, InMemoryPaymentStore, InMemoryUserDirectory,
};
#[cfg(feature = "storage-rocksdb")]
use marketpay::infrastructure::rocksdb::RocksDBStore;
use marketpay::interfaces::csv::seed_reader::SeedReader;
use marketpay::interfaces::csv::stats_writer::StatsWriter;
use marketpay::interfaces::http::{AppState, configure_routes};
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_actix_web::TracingLogger;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the order and payment HTTP API
    Serve {
        #[arg(long, env = "HOST", default_value = "127.0.0.1")]
        host: String,

        #[arg(long, env = "PORT", default_value_t = 8080)]
        port: u16,

        /// Path to persistent database (optional). If provided, uses RocksDB.
        #[arg(long)]
        db_path: Option<PathBuf>,

        /// Catalog CSV (`id,name,price,active`)
        #[arg(long)]
        products: Option<PathBuf>,

        /// User CSV (`id`)
        #[arg(long)]
        users: Option<PathBuf>,
    },
    /// Print payment statistics as CSV
    Stats {
        /// Path to persistent database (optional). If provided, uses RocksDB.
        #[arg(long)]
        db_path: Option<PathBuf>,

        /// Inclusive lower bound (RFC 3339)
        #[arg(long)]
        from: Option<DateTime<Utc>>,

        /// Exclusive upper bound (RFC 3339)
        #[arg(long)]
        to: Option<DateTime<Utc>>,
    },
}

#[actix_web::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Serve {
            host,
            port,
            db_path,
            products,
            users,
        } => serve(host, port, db_path, products, users).await,
        Command::Stats { db_path, from, to } => stats(db_path, DateRange { from, to }).await,
    }
}

fn open_stores(db_path: Option<PathBuf>) -> Result<(OrderStoreRef, PaymentStoreRef)> {
    if let Some(path) = db_path {
        #[cfg(feature = "storage-rocksdb")]
        {
            let store = RocksDBStore::open(path).into_diagnostic()?;
            return Ok((Arc::new(store.clone()), Arc::new(store)));
        }
        #[cfg(not(feature = "storage-rocksdb"))]
        {
            let _ = path;
            eprintln!(
                "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
            );
        }
    }
    Ok((
        Arc::new(InMemoryOrderStore::new()),
        Arc::new(InMemoryPaymentStore::new()),
    ))
}

async fn seed_catalog(path: Option<PathBuf>) -> Result<InMemoryCatalog> {
    let catalog = InMemoryCatalog::new();
    if let Some(path) = path {
        let reader = SeedReader::new(File::open(path).into_diagnostic()?);
        for product in reader.products() {
            match product {
                Ok(product) => catalog.upsert(product).await,
                Err(e) => eprintln!("Error reading product: {}", e),
            }
        }
    }
    Ok(catalog)
}

async fn seed_users(path: Option<PathBuf>) -> Result<InMemoryUserDirectory> {
    let users = InMemoryUserDirectory::new();
    if let Some(path) = path {
        let reader = SeedReader::new(File::open(path).into_diagnostic()?);
        for user in reader.users() {
            match user {
                Ok(user_id) => users.add(user_id).await,
                Err(e) => eprintln!("Error reading user: {}", e),
            }
        }
    }
    Ok(users)
}

async fn serve(
    host: String,
    port: u16,
    db_path: Option<PathBuf>,
    products: Option<PathBuf>,
    users: Option<PathBuf>,
) -> Result<()> {
    let config = GatewayConfig::from_env().into_diagnostic()?;
    let (orders, payments) = open_stores(db_path)?;
    let ports = EnginePorts {
        orders,
        payments,
        catalog: Arc::new(seed_catalog(products).await?),
        users: Arc::new(seed_users(users).await?),
        events: Arc::new(TracingEventSink),
    };

    let clients = ProviderClients::from_config(&config).into_diagnostic()?;
    let engine = Engine::new(
        ports,
        |ledger| gateway_set(ledger, &config, clients),
        config.default_return_url(),
    )
    .into_diagnostic()?;
    let app_state = AppState::new(engine);

    tracing::info!(%host, port, "Starting order and payment API");
    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(TracingLogger::default())
            .configure(configure_routes)
    })
    .bind((host.as_str(), port))
    .into_diagnostic()?
    .run()
    .await
    .into_diagnostic()
}

async fn stats(db_path: Option<PathBuf>, range: DateRange) -> Result<()> {
    let (orders, payments) = open_stores(db_path)?;
    let ledger = PaymentLedger::new(orders, payments, OrderLocks::new(), Arc::new(TracingEventSink));
    let statistics = ledger.statistics(range).await.into_diagnostic()?;

    let stdout = io::stdout();
    let mut writer = StatsWriter::new(stdout.lock());
    writer.write_statistics(&statistics).into_diagnostic()?;

    Ok(())
}
