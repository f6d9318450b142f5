use std::io;
use thiserror::Error;

/// type alias for fallible operations on a [`Db`](crate::Db)
pub type Result<T> = std::result::Result<T, DbError>;

/// Error variants surfaced by the database API.
/// It wraps any lower level errors from third party crates.
///
/// Note that *contract* errors (wrong arguments, WRONGTYPE, unknown command,
/// ...) never appear here: those travel back to the caller inside an error
/// [`Reply`](crate::Reply) so the worker keeps running.
#[derive(Error)]
pub enum DbError {
    /// variant for errors caused by std::io
    #[error("IO error")]
    Io {
        /// source of the IO Error
        #[from]
        source: io::Error,
    },

    /// variant for errors caused during snapshot serialization/deserialization
    #[error("serialization/deserialization error")]
    Serialization(#[from] serde_json::Error),

    /// variant for errors when parsing strings to some other type
    #[error("{}", .0)]
    Parsing(String),

    /// variant for failures of the worker thread lifecycle
    #[error("{}", .0)]
    Worker(String),
}

/// a custom Debug implementation that will write the entire error chain
impl std::fmt::Debug for DbError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

/// writes the entire error chain of the given error `e`, to the formatter.
fn error_chain_fmt(
    e: &impl std::error::Error,
    f: &mut std::fmt::Formatter<'_>,
) -> std::fmt::Result {
    writeln!(f, "{}\n", e)?;
    let mut current = e.source();
    while let Some(cause) = current {
        writeln!(f, "Caused by: {}", cause)?;
        current = cause.source();
    }
    Ok(())
}
