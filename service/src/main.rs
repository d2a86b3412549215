//! # User Reporting Service
//!
//! Binary wiring the registration pipeline end to end:
//!
//! - a Kafka subscription feeding the [`ConsumerLoop`], which projects
//!   `UserRegistered` facts into the Postgres read model
//! - an [`ExportScheduler`] materializing the read model into daily
//!   CSV artifacts
//!
//! Both loops run until Ctrl-C, then shut down gracefully: the consumer
//! settles its in-flight envelope and the scheduler finishes any run in
//! progress before the process exits.

use anyhow::Context;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use user_reporting_core::fact::{Fact, UserRegisteredFact};
use user_reporting_core::handler::HandlerRegistry;
use user_reporting_export::{ExportJob, ExportScheduler};
use user_reporting_kafka::KafkaMessageBus;
use user_reporting_reporting::{ConsumerLoop, PostgresReportRepository, UserRegisteredHandler};

mod config;

use config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!(
        topic = %config.topic,
        consumer_group = %config.consumer_group,
        export_cron = %config.export_cron,
        export_dir = %config.export_dir,
        "Starting user-reporting service"
    );

    let repository = Arc::new(
        PostgresReportRepository::connect(&config.database_url)
            .await
            .context("Failed to connect to the reporting database")?,
    );
    repository
        .ensure_schema()
        .await
        .context("Failed to ensure the read-model schema")?;

    let bus = Arc::new(
        KafkaMessageBus::builder()
            .brokers(&config.brokers)
            .consumer_group(&config.consumer_group)
            .build()
            .context("Failed to create the Kafka message bus")?,
    );

    let mut registry = HandlerRegistry::new();
    registry.register(
        UserRegisteredFact::FACT_TYPE,
        Arc::new(UserRegisteredHandler::new(repository.clone())),
    );

    let (mut consumer, consumer_shutdown) =
        ConsumerLoop::new(bus, Arc::new(registry), config.topic.clone());
    let consumer_handle = tokio::spawn(async move { consumer.run().await });

    let job = ExportJob::new(repository, config.export_dir.clone());
    let (scheduler, scheduler_shutdown) = ExportScheduler::new(job, &config.export_cron)
        .with_context(|| format!("Invalid EXPORT_CRON '{}'", config.export_cron))?;
    let scheduler_handle = tokio::spawn(scheduler.run());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received, stopping");

    consumer_shutdown.send(true).ok();
    scheduler_shutdown.send(true).ok();

    consumer_handle
        .await
        .context("Consumer task panicked")?
        .context("Consumer loop failed")?;
    scheduler_handle.await.context("Scheduler task panicked")?;

    tracing::info!("Service stopped");
    Ok(())
}
