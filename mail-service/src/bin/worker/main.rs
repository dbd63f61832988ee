use std::sync::Arc;

use mail_service::config::Config;
use mail_service::domain::delivery::worker::DeliveryWorker;
use mail_service::inbound::events::KafkaMessageSource;
use mail_service::outbound::smtp::SmtpMailer;
use mail_service::outbound::templates::ActivationTemplate;
use tokio::sync::watch;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mail_service=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        service = "mail-service",
        version = env!("CARGO_PKG_VERSION"),
        "Service starting"
    );

    let config = Config::load()?;

    tracing::info!(
        kafka_brokers = %config.kafka.brokers,
        kafka_topic = %config.kafka.topic,
        kafka_group_id = %config.kafka.group_id,
        smtp_host = %config.smtp.host,
        smtp_port = config.smtp.port,
        max_attempts = config.delivery.max_attempts,
        "Configuration loaded"
    );

    let mailer = Arc::new(SmtpMailer::new(&config.smtp)?);
    let renderer = Arc::new(ActivationTemplate::new(config.activation.url.clone()));
    let worker = DeliveryWorker::new(mailer, renderer, config.delivery.policy());

    let mut source = KafkaMessageSource::new(&config.kafka)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
            // Dropping the sender would stop the worker
            std::future::pending::<()>().await;
        }
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let summary = worker.run(&mut source, shutdown_rx).await;

    tracing::info!(
        processed = summary.total(),
        delivered = summary.delivered,
        gave_up = summary.gave_up,
        rejected = summary.rejected,
        "Service stopped"
    );
    Ok(())
}
