use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use stockroom_api as api;
use tokio::signal;
use tracing::{debug, info};

/// How often abandoned OAuth2 authorizations are dropped.
const OAUTH_STATE_PURGE_INTERVAL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = api::config::load_config().context("failed to load configuration")?;
    api::config::init_tracing(cfg.log_level(), cfg.log_json);
    api::handlers::health::init_start_time();

    info!(
        environment = %cfg.environment,
        version = env!("CARGO_PKG_VERSION"),
        "Starting stockroom-api"
    );

    let db = api::db::establish_connection_from_app_config(&cfg)
        .await
        .context("failed to connect to the database")?;

    if cfg.auto_migrate {
        api::db::run_migrations(&db)
            .await
            .context("failed to run database migrations")?;
    }

    let (event_sender, event_receiver) = api::events::EventSender::channel(cfg.event_channel_capacity);
    tokio::spawn(api::events::process_events(event_receiver));

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", cfg.host, cfg.port))?;

    let state = api::AppState::new(
        Arc::new(db),
        cfg,
        event_sender,
        Arc::new(api::notifications::LogNotifier),
    );

    tokio::spawn(api::auth::cleanup_rate_limits(state.rate_limiter.clone()));

    let oauth = state.oauth.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(OAUTH_STATE_PURGE_INTERVAL);
        loop {
            ticker.tick().await;
            let purged = oauth.state_store().purge_expired();
            if purged > 0 {
                debug!(purged, "Dropped expired OAuth2 authorizations");
            }
        }
    });

    let app = api::build_router(state);

    info!("stockroom-api listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

    info!("stockroom-api stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
