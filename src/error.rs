/// Errors returned while building a Left-Right instance or handing out
/// reader slots.
///
/// Misuse of the primitives (departing without arriving, releasing a lock
/// that is not held, mixing slots between instances) is not represented
/// here: it is a programmer error and panics, see [`misuse`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("all {capacity} reader slots are in use")]
    SlotsExhausted { capacity: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to read '{path}'")]
    ConfigRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config")]
    ConfigParse(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Reports a broken usage contract and aborts the calling thread.
///
/// Continuing would corrupt a read-indicator or leave a lock in a state no
/// other thread can recover from.
#[cold]
#[track_caller]
pub(crate) fn misuse(what: &str) -> ! {
    tracing::error!(what, "concurrency primitive misused");
    panic!("misuse: {what}")
}
