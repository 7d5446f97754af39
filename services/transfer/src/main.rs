use anyhow::{bail, Context, Result};
use dataset_transfer::{
    Config, DataLakeClient, GrpcDatasetConnector, ImagePersister, PipelineSettings, SinkUploader,
    TransferPipeline,
};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level, &config.service.log_format);

    info!(
        service = %config.service.name,
        version = env!("CARGO_PKG_VERSION"),
        dataset_id = %config.dataset.dataset_id,
        "Starting dataset transfer service"
    );

    config.validate().context("Invalid configuration")?;

    if let Some(port) = config.service.metrics_port {
        init_metrics(port)?;
    }

    let connector = Arc::new(GrpcDatasetConnector::new(config.dataset.clone()));
    let store = DataLakeClient::new(&config.storage)
        .context("Failed to initialize Data Lake client")?;

    let mut pipeline = TransferPipeline::new(
        connector,
        SinkUploader::new(Arc::new(store)),
        PipelineSettings::from(&config),
    );

    if config.persist.save_persisted_images {
        if let Some(ref output_dir) = config.persist.output_dir {
            info!(output_dir = %output_dir.display(), "Persisting fetched images");
            pipeline = pipeline.with_observer(Arc::new(ImagePersister::new(output_dir)));
        }
    }

    let summary = match pipeline.run().await {
        Ok(summary) => summary,
        Err(e) => {
            error!(error = %e, "Dataset transfer aborted");
            return Err(e.into());
        }
    };

    println!(
        "{}",
        serde_json::to_string_pretty(&summary).context("Failed to serialize run summary")?
    );

    if !summary.is_success() {
        warn!(
            failed = summary.failed(),
            skipped = summary.skipped,
            "Dataset transfer finished with failures"
        );
        bail!(
            "{} of {} listed records were not uploaded",
            summary.failed() + summary.skipped,
            summary.listed
        );
    }

    info!(uploaded = summary.uploaded, "Dataset transfer completed successfully");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str, log_format: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    if log_format == "pretty" {
        registry.with(fmt::layer().pretty()).init();
    } else {
        registry.with(fmt::layer().json()).init();
    }
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}
