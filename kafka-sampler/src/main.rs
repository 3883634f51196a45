use std::sync::Arc;

use anyhow::Context;
use axum::{routing::get, Router};
use envconfig::Envconfig;
use tokio::signal;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use kafka_sampler::app::{create_router, AppState};
use kafka_sampler::config::Config;
use kafka_sampler::kafka::RdKafkaClient;
use kafka_sampler::metrics::{register_metrics, setup_metrics_recorder};
use kafka_sampler::orchestrator::ListMessagesService;

async fn shutdown() {
    let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())
        .expect("failed to register SIGTERM handler");

    let mut interrupt = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .expect("failed to register SIGINT handler");

    tokio::select! {
        _ = term.recv() => {},
        _ = interrupt.recv() => {},
    };

    tracing::info!("Shutting down gracefully...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let config = Config::init_from_env().context("failed to load configuration from env")?;

    let client = RdKafkaClient::new(config.kafka.clone()).context("failed to create Kafka client")?;
    let service = ListMessagesService::new(Arc::new(client), config.list_messages_settings());

    let state = AppState {
        service,
        event_buffer: config.event_channel_capacity,
        version: config.version.clone(),
    };

    let mut app: Router = create_router(state);
    if config.export_prometheus {
        let recorder = setup_metrics_recorder().context("failed to install metrics recorder")?;
        register_metrics();
        app = app.route(
            "/metrics",
            get(move || std::future::ready(recorder.render())),
        );
    }

    let bind = config.bind();
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    tracing::info!("Listening on {}", bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown())
        .await
        .context("server error")?;

    Ok(())
}
