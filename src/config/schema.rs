//! Configuration schema definitions.
//!
//! This module defines the configuration structure for the transport and the
//! `tls-echo` binary. All types derive Serde traits for deserialization from
//! TOML files, and every field has a default so minimal files stay minimal.

use std::net::SocketAddr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::loader::ConfigError;
use crate::config::validation::ValidationError;
use crate::error::TlsError;
use crate::lifecycle::shutdown::StopListener;
use crate::net::connector::Connector;
use crate::net::listener::{ListenOptions, DEFAULT_BACKLOG};
use crate::resilience::backoff::AcceptBackoff;
use crate::resilience::timeouts::from_secs;
use crate::server::accept_loop::ServeOptions;
use crate::tls::{ClientContext, PassphraseCallback, ServerContext, TlsVersion};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct TransportConfig {
    /// Listening side. Absent for client-only use.
    pub server: Option<ServerSection>,

    /// Connecting side.
    pub client: ClientSection,

    /// Pause after listener-level accept errors.
    pub accept_backoff: BackoffSection,

    /// Logging and metrics.
    pub observability: ObservabilitySection,
}

impl TransportConfig {
    /// Loop settings derived from `[server]` and `[accept_backoff]`.
    pub fn serve_options(&self, stop: Option<StopListener>) -> ServeOptions {
        let server = self.server.clone().unwrap_or_default();
        ServeOptions {
            timeout: from_secs(server.timeout_secs),
            stop,
            backoff: self.accept_backoff.to_backoff(),
            drain_timeout: from_secs(server.drain_timeout_secs),
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerSection {
    /// Bind address (e.g., "0.0.0.0:4433").
    pub bind_address: String,

    /// Path to certificate chain file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM, optionally encrypted PKCS#8).
    pub key_path: String,

    /// Environment variable holding the private key passphrase.
    pub passphrase_env: Option<String>,

    /// Listen backlog.
    pub backlog: u32,

    /// Per-connection handler timeout in seconds. Omit for no limit.
    pub timeout_secs: Option<u64>,

    /// TLS handshake timeout in seconds.
    pub handshake_timeout_secs: Option<u64>,

    /// How long a stopping server waits for open connections, in seconds.
    pub drain_timeout_secs: Option<u64>,

    pub tls_version: TlsVersion,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:4433".to_string(),
            cert_path: String::new(),
            key_path: String::new(),
            passphrase_env: None,
            backlog: DEFAULT_BACKLOG,
            timeout_secs: None,
            handshake_timeout_secs: Some(10),
            drain_timeout_secs: Some(5),
            tls_version: TlsVersion::default(),
        }
    }
}

impl ServerSection {
    pub fn bind_addr(&self) -> Result<SocketAddr, ValidationError> {
        parse_addr("server.bind_address", &self.bind_address)
    }

    /// Options for [`crate::net::listener::listen`].
    ///
    /// The passphrase callback reads its environment variable each time the
    /// key is loaded, so the secret never sits in the config value itself.
    pub fn listen_options(&self) -> Result<ListenOptions, ConfigError> {
        let address = self.bind_addr().map_err(|e| ConfigError::Validation(vec![e]))?;

        let mut options = ListenOptions::new(address, &self.cert_path, &self.key_path)
            .with_backlog(self.backlog)
            .with_context(ServerContext::new(self.tls_version))
            .with_handshake_timeout(from_secs(self.handshake_timeout_secs));

        if let Some(var) = self.passphrase_env.clone() {
            let callback: PassphraseCallback =
                Arc::new(move || std::env::var(&var).unwrap_or_default());
            options = options.with_passphrase(callback);
        }

        Ok(options)
    }
}

/// Client configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientSection {
    /// CA bundle (PEM) to trust instead of the webpki roots.
    pub ca_path: Option<String>,

    /// Name to verify the server certificate against. Defaults to the
    /// destination IP.
    pub server_name: Option<String>,

    /// Local address to bind before connecting.
    pub source_address: Option<String>,

    /// TCP connect + handshake timeout in seconds.
    pub connect_timeout_secs: Option<u64>,

    pub tls_version: TlsVersion,

    /// Skip certificate verification. Test setups only.
    pub insecure: bool,
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            ca_path: None,
            server_name: None,
            source_address: None,
            connect_timeout_secs: Some(10),
            tls_version: TlsVersion::default(),
            insecure: false,
        }
    }
}

impl ClientSection {
    pub fn client_context(&self) -> Result<ClientContext, TlsError> {
        let mut builder = ClientContext::builder().version(self.tls_version);

        builder = match &self.ca_path {
            Some(path) => builder.add_ca_file(path)?,
            None => builder.with_webpki_roots(),
        };
        if let Some(name) = &self.server_name {
            builder = builder.server_name(name.clone());
        }
        if self.insecure {
            builder = builder.dangerous_disable_verification();
        }

        builder.build()
    }

    pub fn source_addr(&self) -> Result<Option<SocketAddr>, ValidationError> {
        self.source_address
            .as_deref()
            .map(|addr| parse_addr("client.source_address", addr))
            .transpose()
    }

    pub fn connector(&self) -> Result<Connector, ConfigError> {
        let context = self.client_context()?;
        Ok(Connector::new(context).with_connect_timeout(from_secs(self.connect_timeout_secs)))
    }
}

/// Accept-error backoff configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackoffSection {
    /// First pause in milliseconds; doubles per consecutive failure.
    pub base_delay_ms: u64,

    /// Upper bound on the pause in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for BackoffSection {
    fn default() -> Self {
        Self {
            base_delay_ms: 5,
            max_delay_ms: 1000,
        }
    }
}

impl BackoffSection {
    pub fn to_backoff(&self) -> AcceptBackoff {
        AcceptBackoff::new(
            std::time::Duration::from_millis(self.base_delay_ms),
            std::time::Duration::from_millis(self.max_delay_ms),
        )
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilitySection {
    /// `tracing` filter directive. `RUST_LOG` takes precedence.
    pub log_filter: Option<String>,

    /// Serve Prometheus metrics.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilitySection {
    fn default() -> Self {
        Self {
            log_filter: None,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

impl ObservabilitySection {
    pub fn metrics_addr(&self) -> Result<SocketAddr, ValidationError> {
        parse_addr("observability.metrics_address", &self.metrics_address)
    }
}

fn parse_addr(field: &'static str, value: &str) -> Result<SocketAddr, ValidationError> {
    value
        .parse()
        .map_err(|_| ValidationError::new(field, format!("'{value}' is not a socket address")))
}
