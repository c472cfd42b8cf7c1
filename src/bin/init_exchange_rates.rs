//! Seeds the exchange-rate table with every ordered pair derived from the
//! reference USDT prices. Existing rows are overwritten.

use sqlx::postgres::PgPoolOptions;
use stakehouse::config::Config;
use stakehouse::routes::staking::{ledger, model::ExchangeRate};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().expect("Failed to load configuration");
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&config.database_url)
        .await
        .expect("Failed to connect to Postgres");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run database migrations");

    let prices = ledger::default_usdt_prices();
    match ExchangeRate::seed(&pool, &prices).await {
        Ok((created, updated)) => {
            tracing::info!(created, updated, assets = prices.len(), "exchange rates seeded");
            println!("Exchange rates initialized: {created} created, {updated} updated.");
        }
        Err(e) => {
            tracing::error!(error = %e, "seeding exchange rates failed");
            std::process::exit(1);
        }
    }
}
