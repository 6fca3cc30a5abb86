use thiserror::Error;

use crate::server::codec::ProtocolError;

/// Represents the errors that can stop the server or one of its connections.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Represents an error in the server configuration.
    ///
    /// This occurs when an invalid or inconsistent configuration is detected.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Indicates that the TLS handshake with a peer failed.
    #[error("TLS error: {0}")]
    TlsError(String),

    /// Represents a socket level failure on the listener or a connection.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Indicates that a Prometheus metric could not be created or registered.
    #[error("Metrics error: {0}")]
    MetricsError(#[from] prometheus::Error),

    /// Represents a framing failure on the wire.
    ///
    /// Every protocol error is fatal for the connection it happened on.
    #[error("Protocol error: {0}")]
    ProtocolError(#[from] ProtocolError),
}

/// Failure reported by a registry backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("{0} ya existe")]
    Duplicate(String),

    #[error("{0} no encontrado")]
    NotFound(String),

    #[error("{0}")]
    Backend(String),
}

/// Recoverable failure of a single command.
///
/// These never leave the dispatcher: they are rendered into an `ERROR...`
/// response and the connection keeps serving requests.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("Comando desconocido")]
    UnknownCommand,

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Duplicate(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Se requieren al menos 2 muestras, hay {have}")]
    InsufficientSamples { have: usize },

    #[error("{0}")]
    Storage(String),

    #[error("Error interno del servidor")]
    Internal,
}

impl CommandError {
    /// Renders the error as a response line.
    ///
    /// `tag` is the command specific prefix (`ERROR_MUESTRA`, `ERROR_FASTA`, ...).
    /// Duplicates and storage failures always carry their own kind.
    pub fn render(&self, tag: &str) -> String {
        match self {
            CommandError::Duplicate(msg) => format!("ERROR_DUPLICADO: {}", msg),
            CommandError::Storage(msg) => format!("ERROR_IO: {}", msg),
            CommandError::UnknownCommand | CommandError::Internal => format!("ERROR: {}", self),
            other => format!("{}: {}", tag, other),
        }
    }
}

impl From<StorageError> for CommandError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Duplicate(what) => CommandError::Duplicate(format!("{} ya existe", what)),
            StorageError::NotFound(what) => CommandError::NotFound(format!("{} no encontrado", what)),
            StorageError::Backend(msg) => CommandError::Storage(msg),
        }
    }
}

impl From<std::io::Error> for CommandError {
    fn from(err: std::io::Error) -> Self {
        CommandError::Storage(err.to_string())
    }
}
