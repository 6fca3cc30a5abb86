//! One accepted connection, served as a sequence of request/response cycles.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufStream},
    sync::watch,
    task,
    time::timeout,
};
use tracing::{debug, error, info, instrument, warn};

use crate::server::{
    codec::{is_peer_gone, FrameCodec, ProtocolError},
    dispatcher::Dispatcher,
    health::HealthMetrics,
    manager::{SessionHandle, SessionManager},
    ServerState,
};
use crate::utils::{CommandError, ServerError};

/// Sent instead of a response that does not fit in one frame.
pub const RESPONSE_TOO_LARGE: &str = "ERROR: Respuesta demasiado grande";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Reading,
    Dispatching,
    Writing,
    Closed,
}

/// Outcome of waiting for the next request.
enum Readiness {
    Data,
    Idle,
    Eof,
    Stop,
    /// The shutdown flag changed; re-check it.
    Wake,
}

pub struct Session<S> {
    stream: BufStream<S>,
    handle: SessionHandle,
    dispatcher: Arc<Dispatcher>,
    codec: FrameCodec,
    metrics: HealthMetrics,
    sessions: SessionManager,
    shutdown: watch::Receiver<bool>,
    idle_timeout: Duration,
    state: SessionState,
    requests: u64,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Registers the session with the server and takes ownership of `stream`.
    pub fn new(stream: S, handle: SessionHandle, server: &ServerState, shutdown: watch::Receiver<bool>) -> Self {
        server.sessions.add(handle.clone());
        server.metrics.active_sessions.inc();
        Self {
            stream: BufStream::new(stream),
            handle,
            dispatcher: Arc::clone(&server.dispatcher),
            codec: FrameCodec::new(server.config.max_message_size),
            metrics: server.metrics.clone(),
            sessions: server.sessions.clone(),
            shutdown,
            idle_timeout: server.config.idle_timeout(),
            state: SessionState::Connected,
            requests: 0,
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    pub fn peer(&self) -> SocketAddr {
        self.handle.addr
    }

    /// Serves requests until the peer disconnects, the session is stopped,
    /// or a connection level error occurs. The connection is closed in every case.
    ///
    /// # Errors
    /// Returns the error that ended the session. A clean disconnect or a
    /// stop request is `Ok`.
    #[instrument(skip(self), fields(session = %self.handle.id, peer = %self.handle.addr))]
    pub async fn run(mut self) -> Result<(), ServerError> {
        let result = self.serve().await;
        let elapsed_ms = self.handle.started_at.elapsed().as_millis() as u64;
        match &result {
            Ok(()) => info!(requests = self.requests, elapsed_ms, "Session finished"),
            Err(e) => error!(requests = self.requests, elapsed_ms, "Session failed: {}", e),
        }
        self.close().await;
        result
    }

    async fn serve(&mut self) -> Result<(), ServerError> {
        loop {
            if *self.shutdown.borrow() {
                debug!("Shutdown requested");
                return Ok(());
            }

            self.state = SessionState::Reading;
            match self.wait_readable().await? {
                Readiness::Data => {}
                Readiness::Idle => {
                    debug!("Idle timeout, keeping connection");
                    continue;
                }
                Readiness::Wake => continue,
                Readiness::Eof => {
                    debug!("Peer closed the connection");
                    return Ok(());
                }
                Readiness::Stop => {
                    debug!("Session stop requested");
                    return Ok(());
                }
            }

            let request = match timeout(self.idle_timeout, self.codec.read_frame(&mut self.stream)).await {
                Ok(Ok(request)) => request,
                Ok(Err(e)) if e.is_disconnect() => {
                    debug!("Peer closed the connection inside a frame");
                    return Ok(());
                }
                Ok(Err(e)) => {
                    if e.is_violation() {
                        self.metrics.protocol_errors_total.inc();
                    }
                    return Err(e.into());
                }
                Err(_) => {
                    self.metrics.protocol_errors_total.inc();
                    return Err(ProtocolError::Violation("incomplete frame after idle timeout".into()).into());
                }
            };

            self.state = SessionState::Dispatching;
            let response = self.dispatch(request).await;

            self.state = SessionState::Writing;
            match self.write_response(&response).await {
                Err(ServerError::ProtocolError(e)) if e.is_disconnect() => {
                    debug!("Peer closed the connection before the response");
                    return Ok(());
                }
                written => written?,
            }
        }
    }

    /// Waits for the first byte of the next frame without consuming it.
    async fn wait_readable(&mut self) -> Result<Readiness, ServerError> {
        let Self {
            stream,
            handle,
            shutdown,
            idle_timeout,
            ..
        } = self;

        tokio::select! {
            ready = timeout(*idle_timeout, stream.fill_buf()) => match ready {
                Ok(Ok(buf)) if buf.is_empty() => Ok(Readiness::Eof),
                Ok(Ok(_)) => Ok(Readiness::Data),
                Ok(Err(e)) if is_peer_gone(&e) => Ok(Readiness::Eof),
                Ok(Err(e)) => Err(e.into()),
                Err(_) => Ok(Readiness::Idle),
            },
            Ok(()) = shutdown.changed() => Ok(Readiness::Wake),
            _ = handle.stopped() => Ok(Readiness::Stop),
        }
    }

    async fn dispatch(&mut self, request: String) -> String {
        self.requests += 1;
        self.metrics.requests_total.inc();

        let dispatcher = Arc::clone(&self.dispatcher);
        let response = match task::spawn_blocking(move || dispatcher.dispatch(&request)).await {
            Ok(response) => response,
            Err(e) => {
                error!("Dispatch task failed: {}", e);
                CommandError::Internal.render("ERROR")
            }
        };

        if response.starts_with("ERROR") {
            self.metrics.error_responses_total.inc();
        }
        response
    }

    async fn write_response(&mut self, response: &str) -> Result<(), ServerError> {
        match self.codec.write_frame(&mut self.stream, response).await {
            Ok(()) => Ok(()),
            Err(ProtocolError::MessageTooLarge { size, max }) => {
                warn!(size, max, "Response does not fit in a frame");
                self.metrics.error_responses_total.inc();
                self.codec
                    .write_frame(&mut self.stream, RESPONSE_TOO_LARGE)
                    .await
                    .map_err(Into::into)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Closes the connection. Only the first call has any effect.
    pub async fn close(&mut self) {
        if !self.release() {
            return;
        }
        if let Err(e) = self.stream.shutdown().await {
            debug!("Shutdown of {} failed: {}", self.handle.addr, e);
        }
    }
}

impl<S> Session<S> {
    /// Unregisters the session. Returns `true` only the first time.
    fn release(&mut self) -> bool {
        self.state = SessionState::Closed;
        if !self.handle.mark_closed() {
            return false;
        }
        self.sessions.remove(&self.handle.id);
        self.metrics.active_sessions.dec();
        true
    }
}

impl<S> Drop for Session<S> {
    fn drop(&mut self) {
        self.release();
    }
}
