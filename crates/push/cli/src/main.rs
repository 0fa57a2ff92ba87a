//! Push CLI - send a single test notification to one device.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use color_eyre::eyre::WrapErr as _;
use push_core::{DeliveryResult, Device};
use push_dispatch::{Notification, PushConfig};
use push_gateway::Environment;

const DEFAULT_TITLE: &str = "Notification test";

#[derive(Parser)]
#[command(name = "push")]
#[command(about = "Send push notifications to APNs and GCM devices", long_about = None)]
struct Cli {
    /// Configuration file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a push notification to an APNs device
    Apns {
        /// The device token
        token: String,
        /// The notification message
        message: String,
        /// The notification title
        title: Option<String>,
        /// The Apple certificate path
        #[arg(long)]
        certificate: Option<PathBuf>,
        /// The Apple certificate password
        #[arg(long)]
        password: Option<String>,
        /// The Apple push environment (production or sandbox)
        #[arg(long)]
        environment: Option<Environment>,
    },

    /// Send a push notification to a GCM device
    Gcm {
        /// The device token
        token: String,
        /// The notification message
        message: String,
        /// The notification title
        title: Option<String>,
        /// The GCM API key
        #[arg(long = "sender-id")]
        sender_id: Option<String>,
    },
}

#[tokio::main]
async fn main() -> color_eyre::eyre::Result<()> {
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => PushConfig::from_path(path),
        None => PushConfig::load(),
    }
    .wrap_err("failed to load configuration")?;

    let results = match cli.command {
        Commands::Apns {
            token,
            message,
            title,
            certificate,
            password,
            environment,
        } => cmd_apns(config, token, message, title, certificate, password, environment).await?,
        Commands::Gcm {
            token,
            message,
            title,
            sender_id,
        } => cmd_gcm(config, token, message, title, sender_id).await?,
    };

    report(&results);
    Ok(())
}

async fn cmd_apns(
    mut config: PushConfig,
    token: String,
    message: String,
    title: Option<String>,
    certificate: Option<PathBuf>,
    password: Option<String>,
    environment: Option<Environment>,
) -> color_eyre::eyre::Result<DeliveryResult> {
    if let Some(certificate) = certificate {
        config.apns.certificate = Some(certificate);
    }
    if let Some(password) = password {
        config.apns.password = Some(password);
    }
    if let Some(environment) = environment {
        config.apns.environment = environment;
    }

    send_one(config, Device::apns(token)?, message, title).await
}

async fn cmd_gcm(
    mut config: PushConfig,
    token: String,
    message: String,
    title: Option<String>,
    sender_id: Option<String>,
) -> color_eyre::eyre::Result<DeliveryResult> {
    if let Some(key) = sender_id {
        config.gcm.key = key;
    }

    send_one(config, Device::gcm(token)?, message, title).await
}

async fn send_one(
    config: PushConfig,
    device: Device,
    message: String,
    title: Option<String>,
) -> color_eyre::eyre::Result<DeliveryResult> {
    let title = title.unwrap_or_else(|| DEFAULT_TITLE.to_string());
    let mut notification = Notification::with_config(title, message, config).with_device(device);

    notification
        .send()
        .await
        .wrap_err("failed to send notification")
}

fn report(results: &DeliveryResult) {
    for device in &results.failures {
        eprintln!("Device {} has failed", device.token());
    }

    for update in &results.updates {
        eprintln!("Device {} has been updated", update.device.token());
    }

    for error in &results.local_errors {
        eprintln!("Device {} was not sent: {}", error.device.token(), error.reason);
    }
}
