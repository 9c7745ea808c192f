pub mod decode;
pub mod retry;
pub mod stats;
pub mod stream;
pub mod transport;

mod driver;
mod pool;
mod session;

pub use decode::{Decoder, RawDecoder, Utf8Decoder};
pub use driver::{Driver, DriverBuilder};
pub use retry::{Backoff, ExponentialRetryPolicy, NoRetry, RetryPolicy};
pub use session::{CommitDigest, Transaction};
pub use stats::{IOUsage, TimingInformation};
pub use stream::ResultStream;
pub use transport::{Page, PageResult, SessionHandle, StatementResult, Transport};

pub type Result<T> = std::result::Result<T, Error>;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Rejected configuration, detected at construction and never retried.
    #[error("invalid driver configuration: {0}")]
    Config(String),

    /// The driver has been closed; no new work is admitted.
    #[error("driver is closed")]
    Closed,

    /// No transaction permit was available. Admission is non-blocking; the
    /// configured acquisition timeout is carried purely as a diagnostic.
    #[error("concurrent transaction limit reached (configured wait {0:?} is not applied)")]
    PoolExhausted(std::time::Duration),

    /// The session could not start a transaction. Absorbed by the driver,
    /// which replaces the session and retries.
    #[error("failed to start a transaction on this session")]
    StartTransaction(#[source] BoxError),

    /// The remote service no longer recognizes the session. Absorbed by the
    /// driver, which replaces the session and retries.
    #[error("session is no longer valid")]
    InvalidSession(#[source] BoxError),

    /// The transaction lost an optimistic-concurrency race. Whether it is
    /// replayed is governed by the active [`RetryPolicy`].
    #[error("optimistic concurrency conflict")]
    Conflict(#[source] BoxError),

    /// A result value blob could not be decoded.
    #[error("failed to decode result value")]
    Decode(#[source] BoxError),

    /// Any other transport-level failure.
    #[error("transport error")]
    Transport(#[source] BoxError),

    #[error("{0}")]
    Protocol(&'static str),
}

impl Error {
    /// Errors of this class mean the session itself is unusable: the driver
    /// silently replaces it and retries, and the caller never observes them
    /// unless replacement is impossible.
    pub fn is_session_invalidating(&self) -> bool {
        matches!(self, Error::StartTransaction(_) | Error::InvalidSession(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }

    /// Classify a failure of the start-transaction call, preserving an
    /// already-specific classification from the transport.
    pub(crate) fn into_start_transaction(self) -> Error {
        match self {
            err @ (Error::StartTransaction(_) | Error::InvalidSession(_)) => err,
            other => Error::StartTransaction(Box::new(other)),
        }
    }
}
