use crate::stats::{IOUsage, TimingInformation};
use bytes::Bytes;

/// Used when the driver is configured with a concurrency limit of zero and
/// the transport declines to provide its own ceiling.
pub const DEFAULT_MAX_CONCURRENT: usize = 50;

/// An opaque token identifying one live session on the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionHandle(pub String);

impl std::fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One chunk of a query result: undecoded value blobs in order, plus an
/// opaque pointer to the next chunk iff more pages exist.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub values: Vec<Bytes>,
    pub next_page_token: Option<String>,
}

/// The transport's response to a statement execution: the first result page
/// is returned inline, so a stream needs no network call to start.
#[derive(Debug, Clone)]
pub struct StatementResult {
    pub first_page: Page,
    pub consumed_ios: Option<IOUsage>,
    pub timing_information: Option<TimingInformation>,
}

/// The transport's response to a continuation-token page fetch.
#[derive(Debug, Clone)]
pub struct PageResult {
    pub page: Page,
    pub consumed_ios: Option<IOUsage>,
    pub timing_information: Option<TimingInformation>,
}

/// The wire contract to the remote ledger service. Every method is a
/// suspension point; implementations classify their failures into the
/// corresponding [`crate::Error`] variants (notably `InvalidSession` and
/// `Conflict`), which is what drives the driver's two retry tiers.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn create_session(&self, ledger: &str) -> crate::Result<SessionHandle>;

    /// Returns the identifier of a newly started transaction.
    async fn start_transaction(&self, session: &SessionHandle) -> crate::Result<String>;

    async fn execute_statement(
        &self,
        session: &SessionHandle,
        txn_id: &str,
        statement: &str,
        params: &[Bytes],
    ) -> crate::Result<StatementResult>;

    async fn fetch_page(
        &self,
        session: &SessionHandle,
        txn_id: &str,
        token: &str,
    ) -> crate::Result<PageResult>;

    /// Commits the transaction, returning the server's echo of the commit
    /// digest. A concurrent-writer rejection is an `Error::Conflict`.
    async fn commit(
        &self,
        session: &SessionHandle,
        txn_id: &str,
        digest: Bytes,
    ) -> crate::Result<Bytes>;

    async fn abort_transaction(&self, session: &SessionHandle, txn_id: &str)
        -> crate::Result<()>;

    async fn end_session(&self, session: &SessionHandle) -> crate::Result<()>;

    /// The transport's own concurrency ceiling, used when the driver is
    /// configured with a limit of zero.
    fn max_concurrent_hint(&self) -> usize {
        DEFAULT_MAX_CONCURRENT
    }
}
