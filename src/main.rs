//! GatewayMQ - authorization and topic tooling for the broker core
//!
//! Usage:
//!   gatewaymq [OPTIONS] <COMMAND>
//!
//! Commands:
//!   connect  Authenticate a username/password against the configured servers
//!   match    Check whether a topic matches a subscription filter
//!
//! Options:
//!   -c, --config <FILE>    Configuration file path
//!   -l, --log-level        Log level (error, warn, info, debug, trace)
//!   -h, --help             Print help

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use gatewaymq::auth::{AccessControl, ConnectInfo};
use gatewaymq::config::Config;
use gatewaymq::topic;

/// Log level for CLI
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum LogLevel {
    /// Only errors
    Error,
    /// Warnings and errors
    #[default]
    Warn,
    /// Informational messages
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
}

/// GatewayMQ - broker authorization core
#[derive(Parser, Debug)]
#[command(name = "gatewaymq")]
#[command(author = "GatewayMQ Contributors")]
#[command(version)]
#[command(about = "Authorization, retention and fan-out core of the GatewayMQ broker")]
struct Args {
    /// Configuration file path (TOML format)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, value_enum, global = true)]
    log_level: Option<LogLevel>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Authenticate a username/password and print the resulting access
    Connect {
        /// Gateway or application ID, or a superuser name
        #[arg(short, long)]
        username: String,

        /// Access key in the form <server>.<key>, or a superuser password
        #[arg(short, long)]
        password: String,

        /// Remote address reported in logs
        #[arg(long, default_value = "127.0.0.1:0")]
        remote_addr: String,
    },
    /// Check whether a topic matches a subscription filter
    Match {
        /// Topic name
        #[arg(short, long)]
        topic: String,

        /// Subscription filter, may contain + and #
        #[arg(short, long)]
        filter: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load configuration file if specified, otherwise defaults plus environment
    let file_config = match &args.config {
        Some(config_path) => Config::load(config_path),
        None => Config::from_env(),
    };
    let file_config = match file_config {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            std::process::exit(1);
        }
    };

    // Setup logging - CLI overrides config, config overrides default (warn)
    let log_level = args.log_level.unwrap_or_else(|| {
        match file_config.log.level.to_lowercase().as_str() {
            "error" => LogLevel::Error,
            "warn" => LogLevel::Warn,
            "info" => LogLevel::Info,
            "debug" => LogLevel::Debug,
            "trace" => LogLevel::Trace,
            _ => LogLevel::Warn,
        }
    });

    // Logs go to stderr so stdout stays machine readable
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level.to_tracing_level())
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    if let Some(path) = &args.config {
        info!("Loaded configuration from {:?}", path);
    }

    match args.command {
        Command::Connect {
            username,
            password,
            remote_addr,
        } => {
            let access_control = AccessControl::from_config(&file_config.auth)?;
            info!(
                "Authenticating against {} account server(s), {} superuser(s)",
                file_config.auth.servers.len(),
                file_config.auth.superusers.len()
            );

            let mut connect = ConnectInfo::new(username, password, remote_addr);
            match access_control.connect(&mut connect).await {
                Ok(()) => {
                    let access = connect.access.unwrap_or_default();
                    println!("{}", serde_json::to_string_pretty(&access)?);
                }
                Err(e) => {
                    eprintln!("Connect denied: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Command::Match {
            topic: topic_name,
            filter,
        } => {
            if let Err(e) = topic::validate_topic_filter(&filter) {
                eprintln!("Invalid filter: {}", e);
                std::process::exit(1);
            }
            println!("{}", topic::match_filter(&topic_name, &filter));
        }
    }

    Ok(())
}
