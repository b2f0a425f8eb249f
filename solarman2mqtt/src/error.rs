use thiserror::Error;

/// Failure classes of a polling run.
///
/// `Config` is fatal for the process. `Auth` and `Fetch` abort the poll of a
/// single installation only. `Bus` covers a collector that could not be set
/// up at all; individual publish failures are counted, not raised.
#[derive(Debug, Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("message bus unavailable: {0}")]
    Bus(String),
}

pub type Result<T> = std::result::Result<T, Error>;
