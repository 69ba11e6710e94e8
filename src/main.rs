//! Aquarius relay server.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use aquarius::{api, config, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let dotenv = config::load_dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "aquarius=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match dotenv {
        Ok(Some(path)) => tracing::info!("Loaded environment from {}", path.display()),
        Ok(None) => {}
        Err(e) => tracing::warn!("Ignoring unreadable .env file: {}", e),
    }

    let config = Config::from_env()?;
    tracing::info!(
        "Starting Aquarius relay (model: {}, mode: {})",
        config.gemini_model,
        config.mode.as_str()
    );

    api::serve(config).await
}
