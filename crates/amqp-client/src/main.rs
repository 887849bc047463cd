//! amqp-client: command-line front end for the AMQP 0-9-1 client library.
//!
//! # Usage
//!
//! ```text
//! amqp-client [OPTIONS] <COMMAND>
//!
//! Commands:
//!   publish <EXCHANGE> <ROUTING_KEY> <BODY>   Publish one message
//!   get     <QUEUE>                           Fetch one message
//!   consume <QUEUE>                           Print deliveries until stopped
//!
//! Options:
//!   --config <FILE>        TOML configuration file
//!   --host <HOST>          Broker host
//!   --port <PORT>          Broker port
//!   --vhost <VHOST>        Virtual host
//!   --username / --password
//!   --transport <tcp|websocket>
//!   --url <URL>            WebSocket endpoint
//!   --name <NAME>          Connection name shown by the broker
//! ```
//!
//! # Environment variable overrides
//!
//! Every connection option can also be set with an `AMQP_*` variable
//! (`AMQP_HOST`, `AMQP_PORT`, ...).  Command-line arguments win over the
//! environment, and both win over the configuration file.
//!
//! Received messages are printed to stdout as one JSON object per line so
//! the output can be piped into `jq`.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use amqp_client::{
    connect, BasicProperties, ClientConfig, ConsumeOptions, Message, PublishOptions, TransportKind,
};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// AMQP 0-9-1 command-line client.
#[derive(Debug, Parser)]
#[command(name = "amqp-client", about = "Publish and receive AMQP 0-9-1 messages", version)]
struct Cli {
    /// TOML configuration file; options below override its values.
    #[arg(long, env = "AMQP_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[arg(long, env = "AMQP_HOST", global = true)]
    host: Option<String>,

    #[arg(long, env = "AMQP_PORT", global = true)]
    port: Option<u16>,

    #[arg(long, env = "AMQP_VHOST", global = true)]
    vhost: Option<String>,

    #[arg(long, env = "AMQP_USERNAME", global = true)]
    username: Option<String>,

    #[arg(long, env = "AMQP_PASSWORD", global = true, hide_env_values = true)]
    password: Option<String>,

    #[arg(long, value_enum, env = "AMQP_TRANSPORT", global = true)]
    transport: Option<TransportArg>,

    /// WebSocket endpoint, e.g. `ws://localhost:15670/ws`.
    #[arg(long, env = "AMQP_URL", global = true)]
    url: Option<String>,

    /// Connection name reported to the broker.
    #[arg(long, env = "AMQP_CONNECTION_NAME", global = true)]
    name: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum TransportArg {
    Tcp,
    Websocket,
}

impl From<TransportArg> for TransportKind {
    fn from(arg: TransportArg) -> Self {
        match arg {
            TransportArg::Tcp => TransportKind::Tcp,
            TransportArg::Websocket => TransportKind::WebSocket,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Publish one message.
    Publish {
        exchange: String,
        routing_key: String,
        body: String,
        /// Mark the message persistent (delivery mode 2).
        #[arg(long)]
        persistent: bool,
        #[arg(long)]
        content_type: Option<String>,
        /// Wait for the broker to confirm the publish.
        #[arg(long)]
        confirm: bool,
        /// Ask the broker to return the message if it is unroutable.
        #[arg(long)]
        mandatory: bool,
    },
    /// Fetch one message from a queue.
    Get {
        queue: String,
        /// Let the broker consider the message acknowledged on delivery.
        #[arg(long)]
        no_ack: bool,
    },
    /// Print deliveries from a queue until stopped.
    Consume {
        queue: String,
        /// Stop after this many messages.
        #[arg(long)]
        count: Option<usize>,
        /// Stop after this many seconds without a message.
        #[arg(long)]
        timeout: Option<u64>,
        #[arg(long, default_value_t = 10)]
        prefetch: u16,
    },
}

impl Cli {
    /// Loads the configuration file (if any) and applies the overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if the
    /// resulting configuration is invalid.
    fn build_config(&self) -> anyhow::Result<ClientConfig> {
        let mut config = match &self.config {
            Some(path) => ClientConfig::load(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None => ClientConfig::default(),
        };
        let conn = &mut config.connection;
        if let Some(host) = &self.host {
            conn.host = host.clone();
        }
        if let Some(port) = self.port {
            conn.port = port;
        }
        if let Some(vhost) = &self.vhost {
            conn.vhost = vhost.clone();
        }
        if let Some(username) = &self.username {
            conn.username = username.clone();
        }
        if let Some(password) = &self.password {
            conn.password = password.clone();
        }
        if let Some(transport) = self.transport {
            conn.transport = transport.into();
        }
        if let Some(url) = &self.url {
            conn.url = Some(url.clone());
        }
        if let Some(name) = &self.name {
            conn.name = Some(name.clone());
        }
        if conn.name.is_none() {
            conn.name = Some(format!("amqp-client-{}", uuid::Uuid::new_v4()));
        }
        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

/// One line of output for a received message.
fn message_json(message: &Message) -> serde_json::Value {
    serde_json::json!({
        "exchange": message.exchange,
        "routing_key": message.routing_key,
        "delivery_tag": message.delivery_tag,
        "redelivered": message.redelivered,
        "consumer_tag": message.consumer_tag,
        "message_count": message.message_count,
        "properties": message.properties,
        "body": message.body_string(),
    })
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.build_config()?;

    // RUST_LOG wins; otherwise the configured level.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.log_level)),
        )
        .init();

    info!(
        host = %config.connection.host,
        port = config.connection.port,
        transport = ?config.connection.transport,
        "connecting"
    );
    let conn = connect(&config.connection)
        .await
        .context("failed to open AMQP connection")?;
    let channel = conn.channel(None).await.context("failed to open channel")?;

    match cli.command {
        Command::Publish {
            exchange,
            routing_key,
            body,
            persistent,
            content_type,
            confirm,
            mandatory,
        } => {
            if confirm {
                channel.confirm_select().await.context("confirm.select failed")?;
            }
            if mandatory {
                channel.on_return(|message| {
                    warn!(
                        code = ?message.reply_code,
                        reason = ?message.reply_text,
                        routing_key = %message.routing_key,
                        "message returned by broker"
                    );
                })?;
            }
            let properties = BasicProperties {
                delivery_mode: persistent.then_some(2),
                content_type,
                ..Default::default()
            };
            let options = PublishOptions {
                mandatory,
                immediate: false,
            };
            let tag = channel
                .basic_publish(&exchange, &routing_key, body.as_bytes(), &properties, options)
                .await
                .context("publish failed")?;
            match tag {
                Some(tag) => info!(delivery_tag = tag, "publish confirmed"),
                None => info!("message published"),
            }
        }
        Command::Get { queue, no_ack } => {
            match channel.basic_get(&queue, no_ack).await.context("basic.get failed")? {
                Some(message) => {
                    println!("{}", message_json(&message));
                    if !no_ack {
                        message.ack(false)?;
                    }
                }
                None => info!(%queue, "queue is empty"),
            }
        }
        Command::Consume {
            queue,
            count,
            timeout,
            prefetch,
        } => {
            channel.prefetch(prefetch).await.context("basic.qos failed")?;
            let (tx, mut rx) = mpsc::unbounded_channel();
            let consumer = channel
                .basic_consume(&queue, ConsumeOptions::default(), move |message| {
                    let _ = tx.send(message);
                })
                .await
                .context("basic.consume failed")?;
            info!(tag = consumer.tag(), %queue, "consuming");

            let idle = timeout.map(Duration::from_secs);
            let mut received = 0usize;
            loop {
                let next = async {
                    match idle {
                        Some(limit) => tokio::time::timeout(limit, rx.recv()).await.ok().flatten(),
                        None => rx.recv().await,
                    }
                };
                let message = tokio::select! {
                    message = next => message,
                    _ = tokio::signal::ctrl_c() => {
                        info!("received Ctrl+C, stopping");
                        None
                    }
                };
                let Some(message) = message else { break };
                println!("{}", message_json(&message));
                message.ack(false)?;
                received += 1;
                if count.is_some_and(|n| received >= n) {
                    break;
                }
            }
            if !consumer.is_closed() {
                consumer.cancel().await.context("basic.cancel failed")?;
            }
            info!(received, "consumer stopped");
        }
    }

    channel.close(200, "done").await.context("channel close failed")?;
    conn.close(200, "bye").await.context("connection close failed")?;
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
