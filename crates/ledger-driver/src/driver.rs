use crate::decode::Decoder;
use crate::pool::SessionPool;
use crate::retry::{ExponentialRetryPolicy, RetryPolicy};
use crate::session::{ExecutionContext, Transaction};
use crate::transport::Transport;
use crate::Error;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

const TABLE_NAMES_QUERY: &str =
    "SELECT name FROM information_schema.user_tables WHERE status = 'ACTIVE'";

/// Configures and builds a [`Driver`].
pub struct DriverBuilder<T: Transport, D: Decoder> {
    ledger: String,
    transport: T,
    decoder: D,
    max_concurrent: usize,
    acquire_timeout: Duration,
    retry_policy: Arc<dyn RetryPolicy>,
}

impl<T: Transport, D: Decoder> DriverBuilder<T, D> {
    pub fn new(ledger: impl Into<String>, transport: T, decoder: D) -> Self {
        Self {
            ledger: ledger.into(),
            transport,
            decoder,
            max_concurrent: 0,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            retry_policy: Arc::new(ExponentialRetryPolicy::default()),
        }
    }

    /// Cap on concurrently in-flight transactions. Zero (the default) defers
    /// to the transport's own concurrency ceiling.
    pub fn max_concurrent(mut self, limit: usize) -> Self {
        self.max_concurrent = limit;
        self
    }

    /// Timeout reported when no transaction permit is available. Admission
    /// never actually waits; see [`Error::PoolExhausted`].
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Default policy for replaying conflicted transactions.
    pub fn retry_policy(mut self, policy: impl RetryPolicy + 'static) -> Self {
        self.retry_policy = Arc::new(policy);
        self
    }

    pub fn build(self) -> crate::Result<Driver<T, D>> {
        if self.ledger.is_empty() {
            return Err(Error::Config("ledger name must not be empty".to_string()));
        }

        let capacity = match self.max_concurrent {
            0 => self.transport.max_concurrent_hint(),
            limit => limit,
        };
        let transport = Arc::new(self.transport);

        Ok(Driver {
            pool: SessionPool::new(
                transport,
                self.ledger,
                capacity,
                self.acquire_timeout,
            ),
            decoder: Arc::new(self.decoder),
            default_policy: self.retry_policy,
        })
    }
}

/// The driver facade: a bounded session pool plus the outer retry tier that
/// silently replaces unusable sessions.
pub struct Driver<T: Transport, D: Decoder> {
    pool: SessionPool<T>,
    decoder: Arc<D>,
    default_policy: Arc<dyn RetryPolicy>,
}

impl<T: Transport, D: Decoder> Driver<T, D> {
    /// Run `f` as one transaction under the driver's default retry policy.
    ///
    /// `f` may be invoked multiple times: conflicted attempts are replayed
    /// as the policy directs, and a broken session is replaced and retried
    /// without the caller observing it. It must therefore be idempotent.
    pub async fn execute<F, R>(&self, f: F) -> crate::Result<R>
    where
        F: for<'t> FnMut(&'t mut Transaction<T, D>) -> BoxFuture<'t, crate::Result<R>> + Send,
    {
        self.execute_with_policy(f, self.default_policy.as_ref())
            .await
    }

    /// Like [`Driver::execute`], with a per-call retry policy.
    pub async fn execute_with_policy<F, R>(
        &self,
        mut f: F,
        policy: &dyn RetryPolicy,
    ) -> crate::Result<R>
    where
        F: for<'t> FnMut(&'t mut Transaction<T, D>) -> BoxFuture<'t, crate::Result<R>> + Send,
    {
        let mut cx = ExecutionContext::default();

        loop {
            let (mut session, permit) = self.pool.acquire().await?;
            let outcome = session.invoke(&self.decoder, &mut f, policy, &mut cx).await;
            self.pool.release(session, permit);

            match outcome {
                Ok(value) => {
                    tracing::trace!(
                        attempts = cx.attempt + 1,
                        io = ?cx.totals.io(),
                        timing = ?cx.totals.timing(),
                        "transaction committed"
                    );
                    return Ok(value);
                }
                Err(err) if err.is_session_invalidating() => {
                    tracing::warn!(%err, "replacing unusable session (will retry)");
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Enumerate the ledger's active table names, decoded by the driver's
    /// decoder. A convenience over [`Driver::execute`].
    pub async fn table_names(&self) -> crate::Result<Vec<D::Value>> {
        self.execute(|txn: &mut Transaction<T, D>| {
            Box::pin(async move {
                let mut names = txn.execute(TABLE_NAMES_QUERY, &[]).await?;
                names.read_all().await
            })
        })
        .await
    }

    /// Idempotent shutdown: subsequent [`Driver::execute`] calls fail with
    /// [`Error::Closed`], and every idle session is ended. In-flight work is
    /// not interrupted.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }
}
