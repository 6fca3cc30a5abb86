// src/server/mod.rs
pub mod acceptor;
pub mod codec;
pub mod dispatcher;
pub mod handler;
pub mod health;
pub mod manager;
pub mod middleware;
pub mod session;
pub mod stream;

// Re-export public components
pub use acceptor::Acceptor;
pub use codec::{FrameCodec, ProtocolError};
pub use dispatcher::{Dispatcher, Services};
pub use health::HealthMetrics;
pub use manager::{SessionHandle, SessionManager};
pub use middleware::rate_limit::ConnectionRateLimiter;
pub use session::{Session, SessionState};

use std::sync::Arc;
use tokio_rustls::TlsAcceptor;

use crate::config::ServerConfig;
use crate::registry::Registries;
use crate::utils::ServerError;

/// State shared by the acceptor, every session and the metrics endpoint.
pub struct ServerState {
    pub config: Arc<ServerConfig>,
    pub dispatcher: Arc<Dispatcher>,
    pub sessions: SessionManager,
    pub tls_acceptor: Option<Arc<TlsAcceptor>>,
    pub metrics: HealthMetrics,
    pub rate_limiter: ConnectionRateLimiter,
}

impl ServerState {
    /// Wires the dispatcher, metrics and TLS acceptor for `config`.
    ///
    /// # Errors
    /// Fails when the TLS material cannot be loaded or the metrics cannot be registered.
    pub fn new(config: Arc<ServerConfig>, registries: Registries) -> Result<Arc<Self>, ServerError> {
        let metrics = HealthMetrics::new()?;
        let services = Services::new(registries, &config, metrics.clone());
        let dispatcher = Arc::new(Dispatcher::new(Arc::new(services))?);

        Ok(Arc::new(Self {
            tls_acceptor: config.create_tls_acceptor()?,
            rate_limiter: ConnectionRateLimiter::new(config.connection_rate_limit),
            dispatcher,
            sessions: SessionManager::new(),
            metrics,
            config,
        }))
    }
}
