use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use futures::future::join_all;
use std::path::{Path, PathBuf};
use std::time::Duration;
use stream_producer::config::StreamConfig;
use stream_producer::connector::{configure_connector, HttpConnectClient};
use stream_producer::kafka::{DeliveryStatus, ProvisionOutcome};
use stream_producer::{Config, ProducerContext, StreamProducer, StreamSpec};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const REPORT_WAIT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "stream-producer")]
#[command(about = "Kafka topic provisioning, schema-governed publishing and Kafka Connect setup", long_about = None)]
struct Args {
    #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
    config: PathBuf,

    #[arg(short, long, help = "Enable JSON output for logs")]
    json_logs: bool,

    #[arg(short, long, help = "Verbose logging")]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the JDBC source connector unless Kafka Connect already has it
    Connector,
    /// Ensure every configured stream has its topic and registered schemas
    Provision,
    /// Publish one record to a configured stream
    Publish {
        #[arg(long)]
        stream: String,
        #[arg(long, help = "Record key as JSON")]
        key: String,
        #[arg(long, help = "Record value as JSON")]
        value: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(args.json_logs, args.verbose);

    info!("Starting stream-producer");
    let config = load_config(&args.config)?;

    info!(
        kafka_brokers = ?config.kafka.brokers,
        schema_registry = %config.schema_registry.url,
        kafka_connect = %config.connector.connect_url,
        streams = config.streams.len(),
        "Configuration summary"
    );

    match args.command {
        Command::Connector => run_connector(&config).await,
        Command::Provision => run_provision(&config).await,
        Command::Publish { stream, key, value } => {
            run_publish(&config, &stream, &key, value.as_deref()).await
        }
    }
}

fn load_config(path: &Path) -> anyhow::Result<Config> {
    if !path.exists() {
        warn!("Configuration file {:?} not found, using defaults", path);
        return Ok(Config::default());
    }

    info!("Loading configuration from {:?}", path);
    match Config::from_file(path) {
        Ok(cfg) => {
            info!("Configuration loaded successfully");
            Ok(cfg)
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            Err(e.into())
        }
    }
}

async fn run_connector(config: &Config) -> anyhow::Result<()> {
    let client = HttpConnectClient::new(&config.connector)?;
    let outcome = configure_connector(&client, &config.connector)
        .await
        .context("failed to configure Kafka Connect connector")?;
    info!(?outcome, "Connector configuration finished");
    Ok(())
}

async fn run_provision(config: &Config) -> anyhow::Result<()> {
    if config.streams.is_empty() {
        warn!("No streams configured, nothing to provision");
        return Ok(());
    }

    let (context, _reports) = ProducerContext::from_config(config)?;
    let results = join_all(
        config
            .streams
            .iter()
            .map(|stream| provision_stream(config, stream, &context)),
    )
    .await;

    let mut failed = 0;
    for (stream, result) in config.streams.iter().zip(results) {
        match result {
            Ok(outcome) if outcome.is_provisioned() => {
                info!(stream = %stream.name, ?outcome, "Stream provisioned");
            }
            Ok(outcome) => {
                failed += 1;
                error!(stream = %stream.name, ?outcome, "Topic could not be provisioned");
            }
            Err(e) => {
                failed += 1;
                error!(stream = %stream.name, "Stream setup failed: {:#}", e);
            }
        }
    }

    if failed > 0 {
        bail!("{} of {} streams failed", failed, config.streams.len());
    }
    Ok(())
}

async fn provision_stream(
    config: &Config,
    stream: &StreamConfig,
    context: &ProducerContext,
) -> anyhow::Result<ProvisionOutcome> {
    let spec = StreamSpec::from_config(stream, &config.topic_defaults)
        .await
        .with_context(|| format!("failed to read schemas for '{}'", stream.name))?;
    let mut producer = StreamProducer::new(spec, context).await?;
    let outcome = producer.provision_outcome().clone();
    producer.close().await;
    Ok(outcome)
}

async fn run_publish(
    config: &Config,
    stream_name: &str,
    key: &str,
    value: Option<&str>,
) -> anyhow::Result<()> {
    let stream = config
        .stream(stream_name)
        .ok_or_else(|| anyhow!("stream '{}' is not configured", stream_name))?;
    let spec = StreamSpec::from_config(stream, &config.topic_defaults).await?;

    let key: serde_json::Value = serde_json::from_str(key).context("--key must be valid JSON")?;
    let value: Option<serde_json::Value> = value
        .map(serde_json::from_str)
        .transpose()
        .context("--value must be valid JSON")?;

    let (context, mut reports) = ProducerContext::from_config(config)?;
    let mut producer = StreamProducer::new(spec, &context).await?;

    match &value {
        Some(value) => producer.publish(&key, value).await?,
        None => producer.publish_raw(&key, None).await?,
    }
    let drain = producer.close().await;
    info!(?drain, "Producer drained");

    match tokio::time::timeout(REPORT_WAIT, reports.recv()).await {
        Ok(Some(report)) => match report.status {
            DeliveryStatus::Delivered { partition, offset } => {
                info!(topic = %report.topic, partition, offset, "Record delivered");
            }
            DeliveryStatus::Failed(reason) => bail!("delivery failed: {}", reason),
        },
        _ => warn!("No delivery report received"),
    }
    Ok(())
}

fn init_logging(json: bool, verbose: bool) {
    let env_filter = if verbose {
        EnvFilter::new("stream_producer=debug,info")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("stream_producer=info,warn"))
    };

    let fmt_layer = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .with_span_list(false)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
