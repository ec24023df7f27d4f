use anyhow::Context;
use axum::http::HeaderValue;
use orderflow_api::{
    config::{init_tracing, load_config},
    db,
    events::{process_events, EventSender},
    notifications::{HttpMailer, LogMailer, Mailer},
    AppState,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::{net::TcpListener, sync::mpsc};
use tower_http::{
    compression::CompressionLayer, cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer,
};
use tracing::{info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 1024;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Arc::new(load_config().context("failed to load configuration")?);
    init_tracing(config.log_level(), config.log_json);

    info!(
        environment = %config.environment,
        host = %config.host,
        port = config.port,
        "starting order engine"
    );

    let db = Arc::new(
        db::establish_connection_from_app_config(&config)
            .await
            .context("failed to connect to database")?,
    );

    if config.auto_migrate {
        db::run_migrations(&db)
            .await
            .context("database migration failed")?;
    }

    let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let event_sender = EventSender::new(event_tx);

    let mailer: Arc<dyn Mailer> = match &config.mail_gateway_url {
        Some(endpoint) => {
            info!(%endpoint, "using HTTP mail gateway");
            Arc::new(HttpMailer::new(endpoint.clone(), config.mail_from.clone()))
        }
        None => {
            warn!("no mail gateway configured; outbound email is log-only");
            Arc::new(LogMailer)
        }
    };
    tokio::spawn(process_events(event_rx, mailer));

    let state = AppState::new(db, config.clone(), event_sender);
    let app = orderflow_api::app_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(CompressionLayer::new())
        .layer(cors_layer(&config)?);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("shutdown complete");
    Ok(())
}

fn cors_layer(config: &orderflow_api::config::AppConfig) -> anyhow::Result<CorsLayer> {
    match &config.cors_allowed_origins {
        Some(origins) => {
            let parsed: Vec<HeaderValue> = origins
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(|o| {
                    o.parse::<HeaderValue>()
                        .with_context(|| format!("invalid CORS origin '{o}'"))
                })
                .collect::<anyhow::Result<_>>()?;
            Ok(CorsLayer::new()
                .allow_origin(parsed)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any))
        }
        None if config.is_development() => Ok(CorsLayer::permissive()),
        None => anyhow::bail!("cors_allowed_origins must be set outside development"),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install ctrl-c handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl-c"),
        _ = terminate => info!("received SIGTERM"),
    }
}
