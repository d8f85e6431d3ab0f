use std::time::Duration;

use serde::Deserialize;

/// Top-level configuration settings for the application.
///
/// Includes settings for the listeners, the message broker and logging.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub broker: BrokerSettings,
    pub logging: LoggingSettings,
}

/// Configuration settings for the server.
///
/// Defines the host and port the TCP listener binds to. `ws_port` enables an
/// additional WebSocket listener on the same host.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub ws_port: Option<u16>,
}

/// Configuration settings for the broker.
#[derive(Debug, Deserialize, Clone)]
pub struct BrokerSettings {
    pub max_connections: usize,
    /// Longest accepted frame in bytes, newline excluded
    pub max_frame_size: usize,
    /// Frames queued per session before deliveries start failing
    pub outbound_queue_capacity: usize,
    /// Seconds between stats reports; `0` disables the reporter
    pub stats_interval_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSettings {
    pub level: String,
}

impl ServerSettings {
    pub fn tcp_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn ws_addr(&self) -> Option<String> {
        self.ws_port.map(|port| format!("{}:{}", self.host, port))
    }
}

impl BrokerSettings {
    pub fn stats_interval(&self) -> Option<Duration> {
        match self.stats_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values can be filled using defaults.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub broker: Option<PartialBrokerSettings>,
    pub logging: Option<PartialLoggingSettings>,
}

#[derive(Debug, Deserialize)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub ws_port: Option<u16>,
}

#[derive(Debug, Deserialize)]
pub struct PartialBrokerSettings {
    pub max_connections: Option<usize>,
    pub max_frame_size: Option<usize>,
    pub outbound_queue_capacity: Option<usize>,
    pub stats_interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct PartialLoggingSettings {
    pub level: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 1883,
                ws_port: None,
            },
            broker: BrokerSettings::default(),
            logging: LoggingSettings {
                level: "info".to_string(),
            },
        }
    }
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            max_connections: 1000,
            max_frame_size: 64 * 1024,
            outbound_queue_capacity: 1024,
            stats_interval_secs: 30,
        }
    }
}

impl PartialSettings {
    /// Fill every missing field from `Settings::default()`.
    pub fn merge_with_defaults(self) -> Settings {
        let default = Settings::default();
        let server = self.server;
        let broker = self.broker;
        let logging = self.logging;

        Settings {
            server: ServerSettings {
                host: server
                    .as_ref()
                    .and_then(|s| s.host.clone())
                    .unwrap_or(default.server.host),
                port: server
                    .as_ref()
                    .and_then(|s| s.port)
                    .unwrap_or(default.server.port),
                ws_port: server.as_ref().and_then(|s| s.ws_port),
            },
            broker: BrokerSettings {
                max_connections: broker
                    .as_ref()
                    .and_then(|b| b.max_connections)
                    .unwrap_or(default.broker.max_connections),
                max_frame_size: broker
                    .as_ref()
                    .and_then(|b| b.max_frame_size)
                    .unwrap_or(default.broker.max_frame_size),
                outbound_queue_capacity: broker
                    .as_ref()
                    .and_then(|b| b.outbound_queue_capacity)
                    .unwrap_or(default.broker.outbound_queue_capacity),
                stats_interval_secs: broker
                    .as_ref()
                    .and_then(|b| b.stats_interval_secs)
                    .unwrap_or(default.broker.stats_interval_secs),
            },
            logging: LoggingSettings {
                level: logging
                    .and_then(|l| l.level)
                    .unwrap_or(default.logging.level),
            },
        }
    }
}
