use std::{fs, path::PathBuf, sync::Arc, time::Duration};
use serde::Deserialize;
use config::{Config, ConfigBuilder, builder::DefaultState};
use tokio_rustls::{
    rustls::{Certificate, PrivateKey, ServerConfig as RustlsServerConfig},
    TlsAcceptor,
};
use rustls_pemfile::{certs, pkcs8_private_keys};
use crate::utils::error::ServerError;

/// How accepted connections are scheduled.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkerMode {
    /// One task per connection, no limit.
    Unbounded,
    /// At most `max_connections` sessions run at once; the rest wait for a slot.
    Bounded,
}

/// Configuration settings for the diagnostic server.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Interface to bind.
    pub host: String,
    /// The port on which the server will listen.
    pub port: u16,
    /// Whether TLS is enabled for secure communication.
    pub enable_tls: bool,
    /// Path to the TLS certificate chain (PEM).
    pub tls_cert_path: PathBuf,
    /// Path to the TLS private key (PKCS#8 PEM).
    pub tls_key_path: PathBuf,
    /// Largest accepted frame payload, in bytes.
    pub max_message_size: usize,
    /// Idle read timeout per connection, in seconds.
    pub idle_timeout_secs: u64,
    pub worker_mode: WorkerMode,
    /// Session limit in bounded mode.
    pub max_connections: usize,
    /// How long shutdown waits for active sessions before aborting them.
    pub shutdown_grace_secs: u64,
    /// New connections allowed per peer IP per second.
    pub connection_rate_limit: u32,
    /// Longest accepted nucleotide sequence.
    pub max_sequence_length: usize,
    /// Directory where report files are written.
    pub reports_dir: PathBuf,
    /// Port of the HTTP metrics endpoint, 0 to disable it.
    pub metrics_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 5000,
            enable_tls: false,
            tls_cert_path: PathBuf::from("certs/cert.pem"),
            tls_key_path: PathBuf::from("certs/key.pem"),
            max_message_size: crate::server::codec::DEFAULT_MAX_MESSAGE_SIZE,
            idle_timeout_secs: 60,
            worker_mode: WorkerMode::Unbounded,
            max_connections: 1_000,
            shutdown_grace_secs: 10,
            connection_rate_limit: 50,
            max_sequence_length: crate::domain::DEFAULT_MAX_SEQUENCE_LENGTH,
            reports_dir: PathBuf::from("reports"),
            metrics_port: 9080,
        }
    }
}

impl ServerConfig {
    /// Loads the server configuration.
    ///
    /// Built-in defaults are overridden by an optional `genoma.toml` in the
    /// working directory, then by environment variables prefixed with `GENOMA_`.
    ///
    /// # Errors
    /// Returns a `ServerError::ConfigurationError` if the configuration cannot be loaded.
    pub fn from_env() -> Result<Self, ServerError> {
        Self::defaults()?
            .add_source(config::File::with_name("genoma").required(false))
            .add_source(config::Environment::with_prefix("GENOMA"))
            .build()
            .map_err(|e| ServerError::ConfigurationError(e.to_string()))?
            .try_deserialize()
            .map_err(|e| ServerError::ConfigurationError(e.to_string()))
    }

    fn defaults() -> Result<ConfigBuilder<DefaultState>, ServerError> {
        let d = Self::default();
        let path = |p: &PathBuf| p.to_string_lossy().into_owned();
        Config::builder()
            .set_default("host", d.host.clone())?
            .set_default("port", d.port as i64)?
            .set_default("enable_tls", d.enable_tls)?
            .set_default("tls_cert_path", path(&d.tls_cert_path))?
            .set_default("tls_key_path", path(&d.tls_key_path))?
            .set_default("max_message_size", d.max_message_size as i64)?
            .set_default("idle_timeout_secs", d.idle_timeout_secs as i64)?
            .set_default("worker_mode", "unbounded")?
            .set_default("max_connections", d.max_connections as i64)?
            .set_default("shutdown_grace_secs", d.shutdown_grace_secs as i64)?
            .set_default("connection_rate_limit", d.connection_rate_limit as i64)?
            .set_default("max_sequence_length", d.max_sequence_length as i64)?
            .set_default("reports_dir", path(&d.reports_dir))?
            .set_default("metrics_port", d.metrics_port as i64)
            .map_err(Into::into)
    }

    /// Validates the configuration settings.
    ///
    /// # Errors
    /// Returns a `ServerError::ConfigurationError` if validation fails.
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.max_connections == 0 {
            return Err(ServerError::ConfigurationError(
                "max_connections must be greater than 0".into()
            ));
        }

        if self.max_connections > 10_000 {
            return Err(ServerError::ConfigurationError(
                "max_connections cannot exceed 10,000".into()
            ));
        }

        if self.max_message_size == 0 || self.max_message_size > u32::MAX as usize {
            return Err(ServerError::ConfigurationError(
                "max_message_size must be between 1 and 4294967295".into()
            ));
        }

        if self.idle_timeout_secs == 0 {
            return Err(ServerError::ConfigurationError(
                "idle_timeout_secs must be greater than 0".into()
            ));
        }

        if self.connection_rate_limit == 0 {
            return Err(ServerError::ConfigurationError(
                "connection_rate_limit must be greater than 0".into()
            ));
        }

        if self.max_sequence_length == 0 {
            return Err(ServerError::ConfigurationError(
                "max_sequence_length must be greater than 0".into()
            ));
        }

        if self.enable_tls {
            if !self.tls_cert_path.exists() {
                return Err(ServerError::ConfigurationError(format!(
                    "Certificate file not found: {:?}",
                    self.tls_cert_path
                )));
            }

            if !self.tls_key_path.exists() {
                return Err(ServerError::ConfigurationError(format!(
                    "Key file not found: {:?}",
                    self.tls_key_path
                )));
            }
        }

        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Creates a TLS acceptor for encrypted connections.
    ///
    /// If TLS is disabled, returns `None`. Otherwise, loads the TLS certificate and private key,
    /// and initializes a Rustls TLS acceptor.
    ///
    /// # Errors
    /// Returns a `ServerError::ConfigurationError` if any part of the TLS setup fails.
    pub fn create_tls_acceptor(&self) -> Result<Option<Arc<TlsAcceptor>>, ServerError> {
        if !self.enable_tls {
            return Ok(None);
        }

        let cert_chain = fs::read(&self.tls_cert_path)
            .map_err(|e| ServerError::ConfigurationError(format!(
                "Certificate error: {} (path: {:?})",
                e, self.tls_cert_path
            )))?;

        let key_der = fs::read(&self.tls_key_path)
            .map_err(|e| ServerError::ConfigurationError(format!(
                "Key error: {} (path: {:?})",
                e, self.tls_key_path
            )))?;

        let certs = certs(&mut cert_chain.as_slice())
            .map_err(|e| ServerError::ConfigurationError(format!(
                "Cert parse error: {}", e
            )))?;

        let mut keys = pkcs8_private_keys(&mut key_der.as_slice())
            .map_err(|e| ServerError::ConfigurationError(format!(
                "Key parse error: {}", e
            )))?;

        if certs.is_empty() {
            return Err(ServerError::ConfigurationError(format!(
                "No certificate found in {:?}", self.tls_cert_path
            )));
        }
        if keys.is_empty() {
            return Err(ServerError::ConfigurationError(format!(
                "No PKCS#8 private key found in {:?}", self.tls_key_path
            )));
        }

        let config = RustlsServerConfig::builder()
            .with_safe_defaults()
            .with_no_client_auth()
            .with_single_cert(
                certs.into_iter().map(Certificate).collect(),
                PrivateKey(keys.remove(0)),
            )
            .map_err(|e| ServerError::ConfigurationError(format!(
                "TLS config error: {}", e
            )))?;

        Ok(Some(Arc::new(TlsAcceptor::from(Arc::new(config)))))
    }
}

impl From<config::ConfigError> for ServerError {
    fn from(err: config::ConfigError) -> Self {
        ServerError::ConfigurationError(err.to_string())
    }
}
