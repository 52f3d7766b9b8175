//! Command line client for publishing and consuming raw JSON messages.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::redundant_pub_crate)]

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use courier_messaging::{
    Broker, Connection, ConnectionOptions, Destination, Envelope, MessagingConfig, Payload,
    Producer, ScramAlgorithm, SessionState, Subscriber, TraceContext,
};
use courier_messaging_kafka::KafkaBroker;
use courier_messaging_memory::MemoryBroker;
use courier_messaging_nats::NatsBroker;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

/// CLI-specific error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid JSON body on the command line.
    #[error("invalid JSON body: {0}")]
    Body(#[from] serde_json::Error),

    /// Messaging error.
    #[error(transparent)]
    Messaging(#[from] courier_messaging::Error),

    /// Signal handler could not be installed.
    #[error("failed to install signal handler: {0}")]
    Signal(std::io::Error),

    /// Tracing subscriber could not be installed.
    #[error("failed to install tracing subscriber: {0}")]
    Tracing(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Broker implementation to talk to.
#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
enum Backend {
    Kafka,
    Memory,
    Nats,
}

#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Broker backend
    #[arg(long, value_enum, default_value_t = Backend::Nats, env = "COURIER_BACKEND")]
    backend: Backend,

    /// Comma-separated broker addresses
    #[arg(long, default_value = "localhost:4222", env = "COURIER_SERVERS")]
    servers: String,

    /// Application name used to namespace consumer groups
    #[arg(long, env = "COURIER_APP_NAME")]
    app_name: String,

    /// User name for SASL SCRAM or NATS authentication
    #[arg(long, env = "COURIER_USERNAME")]
    username: Option<String>,

    /// Password for SASL SCRAM or NATS authentication
    #[arg(long, env = "COURIER_PASSWORD")]
    password: Option<String>,

    /// SCRAM algorithm (sha256 or sha512)
    #[arg(long, env = "COURIER_ALGORITHM")]
    algorithm: Option<String>,

    /// CA certificate file; enables TLS
    #[arg(long, env = "COURIER_CA_FILE")]
    ca_file: Option<PathBuf>,

    /// Client certificate file
    #[arg(long, env = "COURIER_CERT_FILE")]
    cert_file: Option<PathBuf>,

    /// Client key file
    #[arg(long, env = "COURIER_KEY_FILE")]
    key_file: Option<PathBuf>,

    /// Skip server certificate verification
    #[arg(long, default_value_t = false, env = "COURIER_TLS_SKIP_VERIFY")]
    tls_skip_verify: bool,

    /// Time allowed for in-flight handlers to finish on shutdown
    #[arg(long, default_value_t = 10_000, env = "COURIER_SHUTDOWN_TIMEOUT_MS")]
    shutdown_timeout_ms: u64,

    /// Partition count for destinations this command provisions
    #[arg(long, env = "COURIER_PARTITIONS")]
    partitions: Option<i32>,

    /// Replication factor for destinations this command provisions
    #[arg(long, env = "COURIER_REPLICATION")]
    replication: Option<i32>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Debug, Subcommand)]
enum Command {
    /// Publish one JSON message
    Publish {
        /// Destination name
        #[arg(long)]
        destination: String,

        /// Ordering key
        #[arg(long)]
        key: Option<String>,

        /// Trace id to propagate; generated when absent
        #[arg(long)]
        trace_id: Option<String>,

        /// Message body
        body: String,
    },

    /// Print every message a consumer group receives until interrupted
    Subscribe {
        /// Destination name
        #[arg(long)]
        destination: String,

        /// Consumer group, namespaced by the app name
        #[arg(long)]
        group: String,
    },
}

/// Any JSON document, carried as-is.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(transparent)]
struct RawEvent(serde_json::Value);

impl Payload for RawEvent {}

fn messaging_config(args: &Args) -> Result<MessagingConfig, Error> {
    let mut config = MessagingConfig::new(args.servers.clone(), args.app_name.clone());

    config.username.clone_from(&args.username);
    config.password.clone_from(&args.password);
    config.algorithm = args
        .algorithm
        .as_deref()
        .map(str::parse::<ScramAlgorithm>)
        .transpose()?;
    config.ca_file.clone_from(&args.ca_file);
    config.cert_file.clone_from(&args.cert_file);
    config.key_file.clone_from(&args.key_file);
    config.tls_skip_verify = args.tls_skip_verify;
    config.shutdown_timeout_ms = args.shutdown_timeout_ms;

    config.validate()?;

    Ok(config)
}

fn destination(name: &str, args: &Args) -> Destination {
    let mut destination = Destination::new(name);

    if let Some(partitions) = args.partitions {
        destination = destination.with_partitions(partitions);
    }

    if let Some(replication) = args.replication {
        destination = destination.with_replication(replication);
    }

    destination
}

async fn wait_for_signal() -> Result<(), Error> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = signal(SignalKind::terminate()).map_err(Error::Signal)?;
        let mut sigint = signal(SignalKind::interrupt()).map_err(Error::Signal)?;

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.map_err(Error::Signal)?;
        info!("Received interrupt signal");
    }

    Ok(())
}

async fn publish<B>(
    connection: Connection<B>,
    destination: Destination,
    key: Option<String>,
    trace_id: Option<String>,
    body: &str,
) -> Result<(), Error>
where
    B: Broker,
{
    let payload = RawEvent(serde_json::from_str(body)?);
    let ctx = trace_id.map_or_else(
        || TraceContext::generate(connection.ids()),
        TraceContext::new,
    );

    let producer = connection.producer();
    let published = producer
        .publish_to(&ctx, &destination, key.as_deref(), &payload)
        .await;
    producer.shutdown().await?;

    let message_id = published?;
    info!("published {} to {}", message_id, destination);
    println!("{message_id}");

    Ok(())
}

async fn subscribe<B>(
    connection: Connection<B>,
    destination: Destination,
    group: &str,
    shutdown_token: CancellationToken,
) -> Result<(), Error>
where
    B: Broker,
{
    let subscriber = connection.subscriber::<RawEvent>();

    let subscription = subscriber
        .subscribe_to(destination, group, |envelope: Envelope<RawEvent>| async move {
            let line = serde_json::json!({
                "message_id": envelope.message_id,
                "trace_id": envelope.trace_id,
                "timestamp": envelope.timestamp,
                "body": envelope.body.0,
            });
            println!("{line}");
            true
        })
        .await?;

    info!(
        "consuming {} as {}",
        subscription.destination(),
        subscription.group()
    );

    tokio::select! {
        biased;
        () = shutdown_token.cancelled() => {}
        state = subscription.finished() => {
            if state == SessionState::Failed {
                warn!("session for {} failed", subscription.group());
            }
        }
    }

    info!("Shutting down");
    subscriber.shutdown().await?;

    Ok(())
}

async fn run<B>(
    broker: B,
    config: &MessagingConfig,
    args: Args,
    shutdown_token: CancellationToken,
) -> Result<(), Error>
where
    B: Broker,
{
    let connection = Connection::new(broker, ConnectionOptions::from_config(config));

    match &args.command {
        Command::Publish {
            destination: name,
            key,
            trace_id,
            body,
        } => {
            publish(
                connection,
                destination(name, &args),
                key.clone(),
                trace_id.clone(),
                body,
            )
            .await
        }
        Command::Subscribe {
            destination: name,
            group,
        } => subscribe(connection, destination(name, &args), group, shutdown_token).await,
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing::subscriber::set_global_default(
        FmtSubscriber::builder()
            .with_max_level(Level::INFO)
            .with_writer(std::io::stderr)
            .finish(),
    )?;

    let args = Args::parse();
    let config = messaging_config(&args)?;

    let shutdown_token = CancellationToken::new();

    let signal_shutdown_token = shutdown_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_signal().await {
            warn!("{}", e);
        }

        signal_shutdown_token.cancel();
    });

    match args.backend {
        Backend::Kafka => {
            let broker = KafkaBroker::connect(&config).await?;
            run(broker, &config, args, shutdown_token).await
        }
        Backend::Memory => run(MemoryBroker::default(), &config, args, shutdown_token).await,
        Backend::Nats => {
            let broker = NatsBroker::connect(&config).await?;
            run(broker, &config, args, shutdown_token).await
        }
    }
}
