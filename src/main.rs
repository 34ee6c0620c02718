use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use dotenvy::dotenv;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use entrada_server::config::Config;
use entrada_server::handlers::AppState;
use entrada_server::routes::create_routes;
use entrada_server::services::{HmacQrSigner, PaymentSignatureVerifier, ServiceContext};
use entrada_server::store::postgres::PgStore;
use entrada_server::utils::clock::SystemClock;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("entrada_server=info,tower_http=info")),
        )
        .init();

    let config = Config::from_env()?;

    let store = PgStore::connect(&config).await?;
    tracing::info!("Successfully connected to database");

    sqlx::migrate!().run(store.pool()).await?;
    tracing::info!("Migrations run successfully");

    let ctx = ServiceContext::new(
        Arc::new(store),
        Arc::new(SystemClock),
        config.tx_timeout,
        config.utc_offset,
    );
    let signer = Arc::new(HmacQrSigner::new(&config.qr_signing_secret));
    let payments = Arc::new(PaymentSignatureVerifier::new(&config.payment_webhook_secret));
    let app: Router = create_routes(AppState::new(ctx, signer, payments), &config.http);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Server running at http://{}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
