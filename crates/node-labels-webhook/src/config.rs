//! Webhook Configuration
//!
//! Loaded from a mounted YAML file, then overridden by CLI flags or
//! environment variables.

use std::net::SocketAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::mutation::InjectionSettings;

/// Default listen address (HTTPS port used by the webhook Service)
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8443";

/// Default ConfigMap name prefix for pods without `generateName`
pub const DEFAULT_CONFIG_MAP_PREFIX: &str = "node-labels-";

/// Main webhook configuration structure
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookConfig {
    /// Externally reachable base URL of this webhook (e.g. `https://node-labels.kube-system.svc`)
    #[serde(default)]
    pub webhook_external_base_url: String,

    /// ConfigMap name prefix used when a pod has no `generateName`
    #[serde(default = "default_config_map_prefix")]
    pub default_config_map_prefix: String,

    /// Address the HTTP server binds to
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,

    /// TLS certificate and key; plain HTTP when absent
    #[serde(default)]
    pub tls: Option<TlsConfig>,
}

/// TLS configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsConfig {
    /// PEM certificate chain
    pub cert_path: PathBuf,

    /// PEM private key
    pub key_path: PathBuf,
}

/// Values supplied on the command line or through the environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub webhook_external_base_url: Option<String>,
    pub default_config_map_prefix: Option<String>,
    pub listen_addr: Option<String>,
    pub tls_cert_path: Option<PathBuf>,
    pub tls_key_path: Option<PathBuf>,
}

fn default_config_map_prefix() -> String {
    DEFAULT_CONFIG_MAP_PREFIX.to_string()
}

fn default_listen_addr() -> String {
    DEFAULT_LISTEN_ADDR.to_string()
}

fn default_request_timeout_seconds() -> u64 {
    10
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            webhook_external_base_url: String::new(),
            default_config_map_prefix: default_config_map_prefix(),
            listen_addr: default_listen_addr(),
            request_timeout_seconds: default_request_timeout_seconds(),
            tls: None,
        }
    }
}

impl WebhookConfig {
    /// Load configuration from a mounted YAML file
    pub fn from_mounted_file(config_path: &str) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)?;
        Self::from_yaml(&config_str)
    }

    /// Parse configuration from YAML text
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| Error::Config(format!("failed to parse config YAML: {e}")))
    }

    /// Apply CLI/environment overrides on top of the loaded values.
    #[must_use]
    pub fn with_overrides(mut self, overrides: ConfigOverrides) -> Self {
        if let Some(url) = overrides.webhook_external_base_url {
            self.webhook_external_base_url = url;
        }
        if let Some(prefix) = overrides.default_config_map_prefix {
            self.default_config_map_prefix = prefix;
        }
        if let Some(addr) = overrides.listen_addr {
            self.listen_addr = addr;
        }
        match (overrides.tls_cert_path, overrides.tls_key_path) {
            (Some(cert_path), Some(key_path)) => {
                self.tls = Some(TlsConfig {
                    cert_path,
                    key_path,
                });
            }
            (Some(cert_path), None) => {
                if let Some(tls) = self.tls.as_mut() {
                    tls.cert_path = cert_path;
                } else {
                    self.tls = Some(TlsConfig {
                        cert_path,
                        key_path: PathBuf::new(),
                    });
                }
            }
            (None, Some(key_path)) => {
                if let Some(tls) = self.tls.as_mut() {
                    tls.key_path = key_path;
                } else {
                    self.tls = Some(TlsConfig {
                        cert_path: PathBuf::new(),
                        key_path,
                    });
                }
            }
            (None, None) => {}
        }
        self
    }

    /// Validate that the configuration can run the webhook
    pub fn validate(&self) -> Result<()> {
        let url = self.webhook_external_base_url.trim();
        if url.is_empty() {
            return Err(Error::Config(
                "webhookExternalBaseUrl must be set".to_string(),
            ));
        }
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            return Err(Error::Config(format!(
                "webhookExternalBaseUrl must be an http(s) URL, got {url}"
            )));
        }
        if url.ends_with('/') {
            return Err(Error::Config(
                "webhookExternalBaseUrl must not end with '/'".to_string(),
            ));
        }

        self.socket_addr()?;

        if self.request_timeout_seconds == 0 {
            return Err(Error::Config(
                "requestTimeoutSeconds must be greater than zero".to_string(),
            ));
        }

        if let Some(tls) = &self.tls {
            if tls.cert_path.as_os_str().is_empty() || tls.key_path.as_os_str().is_empty() {
                return Err(Error::Config(
                    "TLS requires both certPath and keyPath".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Parsed listen address
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        self.listen_addr
            .parse()
            .map_err(|e| Error::Config(format!("invalid listenAddr {}: {e}", self.listen_addr)))
    }

    /// Settings consumed by the pod mutation
    pub fn injection_settings(&self) -> InjectionSettings {
        InjectionSettings {
            webhook_external_base_url: self.webhook_external_base_url.clone(),
            default_config_map_prefix: self.default_config_map_prefix.clone(),
        }
    }
}
