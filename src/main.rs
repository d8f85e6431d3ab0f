//! CLI for pubwire
//!
//! Subcommands:
//! - `server`: run the broker
//! - `pub`: publish a single message and exit
//! - `sub`: subscribe to topics and print incoming messages

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use pubwire::broker::{Broker, run_stats_reporter};
use pubwire::client::Client;
use pubwire::config::{Settings, load_config};
use pubwire::transport::{Frame, start_tcp_server, start_websocket_server};
use pubwire::utils::{BrokerError, logging};
use tracing::{error, info};

const DEFAULT_ADDR: &str = "127.0.0.1:1883";

#[derive(Parser)]
#[command(name = "pubwire", version)]
enum Command {
    /// Start the broker
    Server,
    /// Publish one message and exit
    Pub {
        topic: String,
        payload: String,
        /// Keep the message as the topic's retained message
        #[arg(long)]
        retain: bool,
        #[arg(long, default_value = DEFAULT_ADDR)]
        addr: String,
    },
    /// Subscribe to one or more topics and print messages as they arrive
    Sub {
        #[arg(required = true)]
        topics: Vec<String>,
        #[arg(long, default_value = DEFAULT_ADDR)]
        addr: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cmd = Command::parse();

    let settings = match load_config() {
        Ok(settings) => settings,
        Err(e) => {
            logging::init("info");
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    logging::init(&settings.logging.level);

    let result = match cmd {
        Command::Server => run_server(settings).await,
        Command::Pub {
            topic,
            payload,
            retain,
            addr,
        } => run_publish(&addr, &topic, &payload, retain).await,
        Command::Sub { topics, addr } => run_subscribe(&addr, &topics).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run_server(settings: Settings) -> Result<(), BrokerError> {
    let broker = Arc::new(Broker::new(settings.broker.clone()));

    if let Some(interval) = settings.broker.stats_interval() {
        tokio::spawn(run_stats_reporter(broker.clone(), interval));
    }

    let tcp_addr = settings.server.tcp_addr();
    let ws_server = {
        let broker = broker.clone();
        let ws_addr = settings.server.ws_addr();
        async move {
            match ws_addr {
                Some(addr) => start_websocket_server(&addr, broker).await,
                None => std::future::pending().await,
            }
        }
    };

    let result = tokio::select! {
        res = start_tcp_server(&tcp_addr, broker.clone()) => res,
        res = ws_server => res,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
            Ok(())
        }
    };

    let closed = broker.shutdown();
    let stats = broker.stats();
    info!(
        closed_sessions = closed,
        total_connections = stats.total_connections,
        total_messages = stats.total_messages,
        uptime_secs = stats.uptime_secs,
        "Broker stopped"
    );
    result
}

async fn run_publish(
    addr: &str,
    topic: &str,
    payload: &str,
    retain: bool,
) -> Result<(), BrokerError> {
    let mut client = Client::connect(addr).await?;
    client.publish(topic, payload, retain).await?;
    // the pong confirms the broker handled the publish before we hang up
    client.ping().await?;
    while let Some(frame) = client.next_frame().await? {
        if let Frame::Pong { .. } = frame {
            break;
        }
    }
    client.close().await
}

async fn run_subscribe(addr: &str, topics: &[String]) -> Result<(), BrokerError> {
    let mut client = Client::connect(addr).await?;
    for topic in topics {
        client.subscribe(topic).await?;
    }
    info!("Subscribed to {} topic(s) on {addr}", topics.len());

    loop {
        let frame = tokio::select! {
            frame = client.next_frame() => frame?,
            _ = tokio::signal::ctrl_c() => break,
        };
        match frame {
            Some(Frame::Message {
                topic,
                payload,
                timestamp,
                from_client,
            }) => println!("[{timestamp}] {topic} <{from_client}> {payload}"),
            Some(_) => {}
            None => {
                info!("Broker closed the connection");
                break;
            }
        }
    }
    client.close().await
}
