use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};

use tokio::{
    net::{TcpListener, TcpStream},
    sync::{watch, Semaphore},
    task::JoinSet,
    time::{interval, timeout, MissedTickBehavior},
};
use tracing::{debug, error, info, instrument, warn};

use crate::config::WorkerMode;
use crate::server::{
    manager::SessionHandle,
    session::Session,
    stream::ClientStream,
    ServerState,
};
use crate::utils::ServerError;

/// How often idle peers are dropped from the admission limiter.
const LIMITER_PRUNE_INTERVAL: Duration = Duration::from_secs(60);

/// Owns the listening socket and the tasks of every session it started.
pub struct Acceptor {
    listener: TcpListener,
    state: Arc<ServerState>,
}

impl Acceptor {
    /// Binds the configured address.
    ///
    /// # Errors
    /// Returns `ServerError::Io` if the address cannot be bound.
    pub async fn bind(state: Arc<ServerState>) -> Result<Self, ServerError> {
        let addr = state.config.bind_addr();
        let listener = TcpListener::bind(&addr).await?;
        info!(
            tls = state.tls_acceptor.is_some(),
            mode = ?state.config.worker_mode,
            "Server listening on {}",
            listener.local_addr()?
        );
        Ok(Self { listener, state })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections until `shutdown` resolves, then drains.
    ///
    /// On shutdown the listener is closed first, every session is told to
    /// stop, and sessions still running after the grace period are aborted.
    pub async fn run<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        let Self { listener, state } = self;
        let (stop_tx, stop_rx) = watch::channel(false);
        let slots = match state.config.worker_mode {
            WorkerMode::Bounded => Some(Arc::new(Semaphore::new(state.config.max_connections))),
            WorkerMode::Unbounded => None,
        };
        let mut tasks = JoinSet::new();
        let mut prune = interval(LIMITER_PRUNE_INTERVAL);
        prune.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        state.metrics.connections_total.inc();
                        let state = Arc::clone(&state);
                        let stop = stop_rx.clone();
                        let slots = slots.clone();
                        tasks.spawn(async move {
                            let _permit = match slots {
                                Some(slots) => match slots.acquire_owned().await {
                                    Ok(permit) => Some(permit),
                                    Err(_) => return,
                                },
                                None => None,
                            };
                            if *stop.borrow() {
                                debug!("Dropping queued connection from {}", addr);
                                return;
                            }
                            serve_connection(stream, addr, state, stop).await;
                        });
                    }
                    Err(e) => error!("Accept error: {}", e),
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => log_join(joined),
                _ = prune.tick() => state.rate_limiter.prune(),
            }
        }

        drop(listener);
        info!(active = state.sessions.len(), "Shutting down, listener closed");
        // Sessions waiting on their socket see this immediately.
        let _ = stop_tx.send(true);
        state.sessions.stop_all();

        let grace = state.config.shutdown_grace();
        let drained = timeout(grace, async {
            while let Some(joined) = tasks.join_next().await {
                log_join(joined);
            }
        })
        .await;

        if drained.is_err() {
            warn!(remaining = tasks.len(), "Grace period elapsed, aborting sessions");
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        }
        info!("Shutdown complete");
        Ok(())
    }
}

fn log_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            error!("Connection task panicked: {}", e);
        }
    }
}

/// Admits, optionally upgrades, and serves one connection.
#[instrument(skip(stream, state, stop))]
async fn serve_connection(
    stream: TcpStream,
    addr: SocketAddr,
    state: Arc<ServerState>,
    stop: watch::Receiver<bool>,
) {
    let ip = addr.ip();
    if !state.rate_limiter.try_admit(ip) {
        warn!("Rate limit exceeded for {}, delaying session", addr);
        state.rate_limiter.admit(ip).await;
    }

    let stream: ClientStream = match &state.tls_acceptor {
        Some(acceptor) => match timeout(state.config.idle_timeout(), acceptor.accept(stream)).await {
            Ok(Ok(tls_stream)) => tls_stream.into(),
            Ok(Err(e)) => {
                warn!("TLS handshake with {} failed: {}", addr, e);
                return;
            }
            Err(_) => {
                warn!("TLS handshake with {} timed out", addr);
                return;
            }
        },
        None => stream.into(),
    };

    let handle = SessionHandle::new(addr, stream.is_tls());
    info!(session = %handle.id, tls = handle.is_tls(), "Accepted connection from {}", addr);
    // The session logs its own outcome.
    let _ = Session::new(stream, handle, &state, stop).run().await;
}
