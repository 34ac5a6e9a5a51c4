use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod backend;
mod codec;
mod config;
mod dispatch;
mod messaging;
mod metrics;
mod models;
mod readiness;
mod utils;

use backend::{BackendAdapter, SoapClient};
use config::BridgeConfig;
use dispatch::Dispatcher;
use messaging::{KafkaRequestConsumer, KafkaResponsePublisher};
use readiness::{ReadinessError, ReadinessGate};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Default to INFO with debug for the bridge itself; RUST_LOG overrides.
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,kyc_bridge=debug")))
        .init();

    tracing::info!("Starting KYC bridge");

    let config = BridgeConfig::from_env()?;
    tracing::info!(
        brokers = %config.bootstrap_servers,
        backend = %config.soap_service_url,
        request_topic = %config.request_topic,
        response_topic = %config.response_topic,
        group = %config.consumer_group,
        "Configuration loaded"
    );

    // === 1. Metrics ===
    let metrics = Arc::new(metrics::Metrics::new()?);
    if let Some(port) = config.metrics_port {
        let registry = Arc::new(metrics.registry().clone());
        std::thread::spawn(move || {
            let system = actix_web::rt::System::new();
            if let Err(e) = system.block_on(metrics::start_metrics_server(registry, port)) {
                tracing::error!(error = %e, "Metrics server error");
            }
        });
    }

    // === 2. Wait for Kafka and the KYC service ===
    let gate = ReadinessGate::new(config.readiness());
    if let Err(e) = gate
        .await_dependencies(&config.bootstrap_servers, &config.soap_service_url)
        .await
    {
        if let ReadinessError::Timeout { pending, .. } = &e {
            for component in pending {
                tracing::error!(
                    component = %component.name,
                    attempts = component.attempts,
                    last_check = %component.last_check,
                    "Dependency never became ready"
                );
            }
        }
        return Err(e.into());
    }

    // === 3. Wire the loop ===
    let consumer = KafkaRequestConsumer::new(
        &config.bootstrap_servers,
        &config.consumer_group,
        &config.request_topic,
        config.poll_timeout,
    )?;
    let publisher = KafkaResponsePublisher::new(
        &config.bootstrap_servers,
        &config.response_topic,
        config.publish_timeout,
    )?;
    let soap = SoapClient::new(config.soap_service_url.clone(), config.backend_timeout)?;
    let adapter = BackendAdapter::new(soap, metrics.clone());

    let mut dispatcher = Dispatcher::new(consumer, publisher, adapter, metrics);

    // === 4. Shutdown on ctrl-c ===
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Received shutdown signal");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
                // Dropping the sender would read as a shutdown request.
                std::future::pending::<()>().await;
                drop(shutdown_tx);
            }
        }
    });

    let outcome = dispatcher.run(shutdown_rx).await;
    tracing::debug!(state = ?dispatcher.state(), "Dispatch loop returned, flushing producer");

    // librdkafka's flush blocks the calling thread.
    let publisher = dispatcher.into_sink();
    tokio::task::spawn_blocking(move || publisher.flush()).await?;
    tracing::info!("KYC bridge stopped");

    outcome.map_err(Into::into)
}
