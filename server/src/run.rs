use axum::Router;
use axum::http::Method;
use backing_chain_jpyc::{JpycSettlement, JpycTokenProvider};
use backing_chain_jpyc::chain::PolygonRelayProvider;
use backing_checkout::util::{SigDown, Telemetry};
use backing_checkout::{CheckoutService, handlers};
use backing_paypal::PayPalClient;
use backing_store::{Catalog, GoogleSheetsStore, OrderStore, ServiceAccountTokenSource, TokenSource};
use dotenvy::dotenv;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors;

use crate::config::Config;

/// Starts the checkout server.
///
/// - Loads `.env` variables and the JSON configuration.
/// - Initializes logging, and OpenTelemetry export when configured.
/// - Connects the order and catalog spreadsheets and every configured payment rail.
/// - Serves the checkout endpoints until SIGTERM or SIGINT.
pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    rustls::crypto::CryptoProvider::install_default(rustls::crypto::ring::default_provider())
        .expect("Failed to initialize rustls crypto provider");

    dotenv().ok();

    let telemetry = Telemetry::new()
        .with_name(env!("CARGO_PKG_NAME"))
        .with_version(env!("CARGO_PKG_VERSION"))
        .register();

    let config = Config::load()?;

    let store = config.store();
    let tokens: Arc<dyn TokenSource> = Arc::new(ServiceAccountTokenSource::new(
        store.service_account_email.inner().clone(),
        store.private_key.expose(),
        store.timeout(),
    )?);
    let order_sheets =
        GoogleSheetsStore::new(store.spreadsheet_id.inner().clone(), tokens.clone(), store.timeout())?;
    let catalog_sheets = GoogleSheetsStore::new(
        store.catalog_spreadsheet_id.inner().clone(),
        tokens,
        store.timeout(),
    )?;

    let mut service = CheckoutService::new(
        Catalog::new(Arc::new(catalog_sheets)),
        OrderStore::new(Arc::new(order_sheets)),
    );

    match config.paypal() {
        Some(paypal) if paypal.active_credentials().is_some() => {
            tracing::info!(mode = ?paypal.mode, "PayPal payments enabled");
            service = service.with_paypal(PayPalClient::new(paypal));
        }
        Some(paypal) => {
            tracing::warn!(mode = ?paypal.mode, "PayPal credentials missing for the active mode");
        }
        None => tracing::warn!("No paypal section configured, PayPal payments are disabled"),
    }

    match config.jpyc() {
        Some(jpyc) => {
            let provider = PolygonRelayProvider::try_new(jpyc)?;
            tracing::info!(
                chain_id = jpyc.chain_id,
                token = %jpyc.token.inner(),
                relay = %provider.relay_address(),
                "JPYC relay enabled"
            );
            let settlement = JpycSettlement::new(provider).with_expected_chain_id(jpyc.chain_id);
            service = service.with_jpyc(Arc::new(settlement));
        }
        None => tracing::warn!("No jpyc section configured, JPYC payments are disabled"),
    }

    match config.bank() {
        Some(bank) => service = service.with_bank_details(bank.clone()),
        None => tracing::warn!("No bank section configured, bank details are unavailable"),
    }

    let axum_state = Arc::new(service);
    let http_endpoints = Router::new()
        .nest(config.base_path(), handlers::routes().with_state(axum_state))
        .layer(telemetry.http_tracing())
        .layer(
            cors::CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers(cors::Any),
        );

    let addr = SocketAddr::new(config.host(), config.port());
    tracing::info!("Starting server at http://{}{}", addr, config.base_path());

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .inspect_err(|e| tracing::error!("Failed to bind to {}: {}", addr, e))?;

    let sig_down = SigDown::try_new()?;
    axum::serve(listener, http_endpoints)
        .with_graceful_shutdown(sig_down.shutdown())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}
