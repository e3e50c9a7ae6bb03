//! BSN adaptation engine binary
//!
//! Connects to NATS, waits for the QoS formula, and runs the control loop
//! until Ctrl+C.

use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bsn_engine::{
    telemetry::export_metrics,
    transport::{nats, NatsActuator, NatsRepository},
    AdaptationEngine, EngineConfig,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting BSN adaptation engine v{}", bsn_common::VERSION);

    let config_path = std::env::args().nth(1);
    let config = EngineConfig::load(config_path.as_deref())?;
    info!(
        setpoint = config.setpoint,
        gain = config.gain,
        monitor_freq = config.monitor_freq,
        actuation_freq = config.actuation_freq,
        "Loaded configuration"
    );

    let client = nats::connect(&config.transport.nats_url).await?;
    let repository = Arc::new(NatsRepository::new(
        client.clone(),
        config.transport.repository_subject.clone(),
    ));
    let actuator = Arc::new(NatsActuator::new(
        client.clone(),
        config.transport.strategy_subject.clone(),
    ));

    let mut engine = AdaptationEngine::new(config.clone(), repository, actuator)?;
    if let Some(model) = &config.goal_model {
        let tree = model.build()?;
        info!(actor = tree.actor(), nodes = tree.size(), "Loaded goal model");
        engine = engine.with_goal_model(tree);
    }
    let engine = Arc::new(engine);

    let registry = prometheus::Registry::new();
    engine.metrics().register(&registry)?;
    let metrics_server = tokio::spawn(nats::serve_metrics(
        client.clone(),
        config.transport.metrics_subject.clone(),
        registry.clone(),
    ));

    let exceptions = nats::exception_stream(&client, &config.transport.exception_subject).await?;
    let consumer = engine.clone().spawn_exception_consumer(exceptions);

    let service = tokio::spawn(nats::serve_engine_requests(
        client,
        config.transport.service_subject.clone(),
        engine.clone(),
    ));

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
        }
        info!("Received shutdown signal");
    };
    engine.clone().run(shutdown).await?;

    consumer.abort();
    service.abort();
    metrics_server.abort();
    match export_metrics(&registry) {
        Ok(text) => debug!("Final metrics:\n{text}"),
        Err(e) => error!(error = %e, "Failed to encode final metrics"),
    }
    info!(
        ticks = engine.metrics().ticks_total.get(),
        plans = engine.metrics().plans_total.get(),
        "BSN adaptation engine stopped"
    );
    Ok(())
}
