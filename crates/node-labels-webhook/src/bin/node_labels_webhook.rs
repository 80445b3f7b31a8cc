/*
 * 5D Labs Agent Platform - Node Labels Webhook Service
 * Copyright (C) 2025 5D Labs
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

//! Node labels webhook service
//!
//! Serves the Pod mutating admission webhook and the `/sync-pod` callback used
//! by the injected init container.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use node_labels_webhook::config::ConfigOverrides;
use node_labels_webhook::server::{self, AppState};
use node_labels_webhook::sync::KubeClusterOps;
use node_labels_webhook::WebhookConfig;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Mutating admission webhook exposing node labels to pods.
#[derive(Parser)]
#[command(name = "node-labels-webhook")]
#[command(version, about = "Inject node labels into pods through a generated ConfigMap")]
struct Cli {
    /// Mounted YAML configuration file
    #[arg(long, env = "WEBHOOK_CONFIG_PATH", default_value = "/config/config.yaml")]
    config: PathBuf,

    /// Externally reachable base URL of this webhook
    #[arg(long, env = "WEBHOOK_EXTERNAL_BASE_URL")]
    webhook_external_base_url: Option<String>,

    /// ConfigMap name prefix for pods without `generateName`
    #[arg(long, env = "DEFAULT_CONFIG_MAP_PREFIX")]
    default_config_map_prefix: Option<String>,

    /// Address to listen on
    #[arg(long, env = "LISTEN_ADDR")]
    listen_addr: Option<String>,

    /// PEM certificate for HTTPS
    #[arg(long, env = "TLS_CERT_PATH")]
    tls_cert: Option<PathBuf>,

    /// PEM private key for HTTPS
    #[arg(long, env = "TLS_KEY_PATH")]
    tls_key: Option<PathBuf>,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value = "text")]
    log_format: LogFormat,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

fn load_config(cli: &Cli) -> WebhookConfig {
    let config_path = cli.config.display().to_string();

    let config = if Path::new(&cli.config).exists() {
        match WebhookConfig::from_mounted_file(&config_path) {
            Ok(cfg) => {
                info!("Loaded webhook configuration from {}", config_path);
                cfg
            }
            Err(err) => {
                warn!(
                    "Failed to load configuration from {}: {}. Using defaults.",
                    config_path, err
                );
                WebhookConfig::default()
            }
        }
    } else {
        info!("No configuration file at {}, using defaults", config_path);
        WebhookConfig::default()
    };

    config.with_overrides(ConfigOverrides {
        webhook_external_base_url: cli.webhook_external_base_url.clone(),
        default_config_map_prefix: cli.default_config_map_prefix.clone(),
        listen_addr: cli.listen_addr.clone(),
        tls_cert_path: cli.tls_cert.clone(),
        tls_key_path: cli.tls_key.clone(),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    info!(
        "Starting node-labels-webhook v{}",
        env!("CARGO_PKG_VERSION")
    );

    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        anyhow::bail!("failed to install rustls crypto provider: {e:?}");
    }

    let config = load_config(&cli);
    config.validate().context("Invalid webhook configuration")?;
    info!(
        base_url = %config.webhook_external_base_url,
        default_prefix = %config.default_config_map_prefix,
        tls = config.tls.is_some(),
        "Webhook configuration ready"
    );

    let client = kube::Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    info!("Connected to Kubernetes cluster");

    let state = AppState::new(
        config.injection_settings(),
        Arc::new(KubeClusterOps::new(client)),
    );

    server::serve(&config, state)
        .await
        .context("Webhook server failed")?;

    Ok(())
}
