use std::net::SocketAddr;
use std::sync::Arc;
use transit_api::{app, AppState};
use transit_booking::WizardSettings;
use transit_catalog::FareResolver;
use transit_store::{Config, HttpBookingBackend};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "transit_api=debug,transit_booking=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load()?;
    tracing::info!("Starting booking desk on port {}", config.server.port);

    let backend = HttpBookingBackend::from_config(&config)?;
    let settings = WizardSettings {
        default_payment_method: config.booking.default_payment_method,
        fares: FareResolver::new(config.booking.pricing()),
    };
    tracing::info!(
        "Default payment {}, missing prices {:?}, amounts in {}",
        settings.default_payment_method,
        config.booking.missing_price_policy,
        config.booking.currency
    );

    let state = AppState::new(Arc::new(backend), settings, config.booking.search_delay());
    let app = app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
