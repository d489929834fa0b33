//! volmq - MQTT volume bridge for ALSA mixers
//!
//! Usage:
//!   volmq [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>    Configuration file path
//!   -H, --host <HOST>      Broker host (overrides MQTT_HOST)
//!   -p, --port <PORT>      Broker port (overrides MQTT_PORT)
//!   -l, --log-level        Log level (error, warn, info, debug, trace)
//!   -h, --help             Print help

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use volmq::bridge::Bridge;
use volmq::client::{ConnectOptions, MqttConnector};
use volmq::config::Config;
use volmq::mixer::Amixer;
use volmq::topic::{self, Topics};

/// Log level for CLI
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum LogLevel {
    /// Only errors
    Error,
    /// Warnings and errors
    Warn,
    /// Informational messages
    #[default]
    Info,
    /// Debug messages
    Debug,
    /// Trace messages (very verbose)
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }

    fn from_config(level: &str) -> Self {
        match level.to_lowercase().as_str() {
            "error" => LogLevel::Error,
            "warn" => LogLevel::Warn,
            "debug" => LogLevel::Debug,
            "trace" => LogLevel::Trace,
            _ => LogLevel::Info,
        }
    }
}

/// volmq - MQTT volume bridge
#[derive(Parser, Debug)]
#[command(name = "volmq")]
#[command(version)]
#[command(about = "Applies MQTT volume commands to an ALSA mixer control")]
struct Args {
    /// Configuration file path (TOML format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Broker host
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// Broker port
    #[arg(short, long)]
    port: Option<u16>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, value_enum)]
    log_level: Option<LogLevel>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // defaults < file < environment < CLI
    let mut config = match Config::load(args.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            std::process::exit(1);
        }
    };
    if let Some(host) = args.host {
        config.mqtt.host = host;
    }
    if let Some(port) = args.port {
        config.mqtt.port = port;
    }
    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    let log_level = args
        .log_level
        .unwrap_or_else(|| LogLevel::from_config(&config.log.level));

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level.to_tracing_level())
        .with_target(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set up logging: {}", e);
        std::process::exit(1);
    }

    if let Some(path) = &args.config {
        info!("Loaded configuration from {:?}", path);
    }

    let device = match config.device.name.clone() {
        Some(name) => name,
        None => topic::device_name()?,
    };

    let topics = Topics::new(&config.mqtt.base_topic, &device);
    if let Err(e) = topics.validate() {
        eprintln!("Invalid topic for device {:?}: {}", device, e);
        std::process::exit(1);
    }

    let mixer = Amixer::from_config(&config.mixer);
    info!(
        "Mixer: card {} control {} range {}..={}",
        config.mixer.card,
        mixer.control(),
        config.mixer.min,
        config.mixer.max
    );

    let connector = MqttConnector::new(ConnectOptions::from_config(&config.mqtt, &device));
    let mut bridge = Bridge::new(connector, mixer, topics, device, &config);

    tokio::select! {
        _ = bridge.run() => {}
        signal = shutdown_signal() => {
            signal?;
            info!("Shutting down");
        }
    }

    Ok(())
}

/// Wait for SIGINT or SIGTERM
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result,
            _ = terminate.recv() => Ok(()),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}
