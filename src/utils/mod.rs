pub mod error;

pub use error::{CommandError, ServerError, StorageError};
