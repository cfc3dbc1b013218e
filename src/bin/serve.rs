//! eventrec server: loads the model artifacts and serves them over HTTP.
use clap::Parser;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use eventrec::config::Config;
use eventrec::recommender::Recommender;
use eventrec::refresh::{PapermillRunner, RefreshScheduler};
use eventrec::registry::ModelRegistry;
use eventrec::server::{self, AppState};

#[tokio::main]
async fn main() -> Result<(), failure::Error> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::parse();
    let recommender_paths = config.recommender_paths();

    let registry = ModelRegistry::load(&config.models_dir, &[recommender_paths.dir.clone()])?;
    info!(models = ?registry.names(), "Model registry loaded");

    let recommender = Recommender::load(&recommender_paths);

    let mut state = AppState::new(registry, recommender);

    let refresh = match config.refresh_config() {
        Some(refresh_config) => {
            let runner = PapermillRunner::new(config.papermill.clone(), config.jupyter.clone());
            let handle = RefreshScheduler::with_runner(refresh_config, runner).spawn();
            state = state.with_refresh(handle.subscribe());
            Some(handle)
        }
        None => {
            info!("Scheduled refresh disabled");
            None
        }
    };

    server::serve(config.listen, state, server::shutdown_signal()).await?;

    if let Some(handle) = refresh {
        handle.shutdown().await;
    }

    Ok(())
}
