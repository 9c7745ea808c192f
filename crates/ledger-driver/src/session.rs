use crate::decode::Decoder;
use crate::retry::RetryPolicy;
use crate::stats::UsageTotals;
use crate::stream::ResultStream;
use crate::transport::{SessionHandle, Transport};
use crate::Error;
use bytes::Bytes;
use futures::future::BoxFuture;
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// The caller's transaction logic: invoked with the in-flight transaction
/// context, once per attempt. A conflicted attempt is replayed from scratch
/// with every prior speculative result discarded, so the function must be
/// idempotent.
pub type TransactionFn<'a, T, D, R> =
    dyn for<'t> FnMut(&'t mut Transaction<T, D>) -> BoxFuture<'t, crate::Result<R>> + Send + 'a;

/// A running fold over the transaction id and each executed statement,
/// submitted at commit time and echoed back by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitDigest([u8; 32]);

impl CommitDigest {
    fn seed(txn_id: &str) -> Self {
        CommitDigest(Sha256::digest(txn_id.as_bytes()).into())
    }

    fn fold_statement(&mut self, statement: &str, params: &[Bytes]) {
        let mut hasher = Sha256::new();
        hasher.update(statement.as_bytes());
        for param in params {
            hasher.update(param);
        }
        let statement_hash: [u8; 32] = hasher.finalize().into();

        let mut combined = Sha256::new();
        combined.update(self.0);
        combined.update(statement_hash);
        self.0 = combined.finalize().into();
    }

    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.0)
    }
}

/// One in-flight transaction attempt. Statements executed through it produce
/// [`ResultStream`]s, and each execution folds into the commit digest.
pub struct Transaction<T: Transport, D: Decoder> {
    transport: Arc<T>,
    decoder: Arc<D>,
    session: SessionHandle,
    id: String,
    digest: CommitDigest,
    totals: UsageTotals,
}

impl<T: Transport, D: Decoder> Transaction<T, D> {
    fn new(transport: Arc<T>, decoder: Arc<D>, session: SessionHandle, id: String) -> Self {
        let digest = CommitDigest::seed(&id);
        Self {
            transport,
            decoder,
            session,
            id,
            digest,
            totals: UsageTotals::default(),
        }
    }

    /// The server-assigned transaction identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Execute one statement, returning a stream over its paginated result.
    pub async fn execute(
        &mut self,
        statement: &str,
        params: &[Bytes],
    ) -> crate::Result<ResultStream<T, D>> {
        self.digest.fold_statement(statement, params);

        let result = self
            .transport
            .execute_statement(&self.session, &self.id, statement, params)
            .await?;
        self.totals
            .record(result.consumed_ios, result.timing_information);

        tracing::trace!(txn_id = %self.id, statement, "executed statement");

        Ok(ResultStream::new(
            self.transport.clone(),
            self.decoder.clone(),
            self.session.clone(),
            self.id.clone(),
            result,
        ))
    }

    async fn commit(&mut self) -> crate::Result<()> {
        let digest = self.digest.to_bytes();
        let echo = self
            .transport
            .commit(&self.session, &self.id, digest.clone())
            .await?;

        if echo != digest {
            return Err(Error::Protocol(
                "commit digest echoed by the server does not match",
            ));
        }
        Ok(())
    }
}

/// Tracks one logical `execute` invocation across its retries: the failed
/// attempt count fed to the retry policy, and cumulative usage totals.
#[derive(Default)]
pub(crate) struct ExecutionContext {
    pub attempt: u32,
    pub totals: UsageTotals,
}

/// Wraps one live transport session. A session is either idle in the pool or
/// borrowed by exactly one execution; its open flag goes false when the
/// transport reports it unusable, after which the pool discards it.
pub struct Session<T: Transport> {
    transport: Arc<T>,
    handle: SessionHandle,
    open: bool,
}

impl<T: Transport> Session<T> {
    pub(crate) fn new(transport: Arc<T>, handle: SessionHandle) -> Self {
        Self {
            transport,
            handle,
            open: true,
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        self.open
    }

    pub(crate) fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    /// End the underlying transport session. The session is closed locally
    /// even if the transport call fails.
    pub(crate) async fn end(&mut self) -> crate::Result<()> {
        self.open = false;
        self.transport.end_session(&self.handle).await
    }

    /// Run the caller's transaction function under the inner retry tier:
    /// conflicts are replayed as the policy directs, while errors that
    /// invalidate the session mark it closed and propagate for the outer
    /// tier to absorb.
    pub(crate) async fn invoke<D, R>(
        &mut self,
        decoder: &Arc<D>,
        f: &mut TransactionFn<'_, T, D, R>,
        policy: &dyn RetryPolicy,
        cx: &mut ExecutionContext,
    ) -> crate::Result<R>
    where
        D: Decoder,
    {
        loop {
            match self.attempt_once(decoder, f, cx).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_session_invalidating() => {
                    self.open = false;
                    return Err(err);
                }
                Err(err) if err.is_conflict() => {
                    cx.attempt += 1;
                    let Some(delay) = policy.decide(cx.attempt, &err) else {
                        return Err(err);
                    };
                    tracing::debug!(
                        attempt = cx.attempt,
                        ?delay,
                        %err,
                        "transaction conflict (will retry)"
                    );
                    policy.on_retry(cx.attempt);
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn attempt_once<D, R>(
        &mut self,
        decoder: &Arc<D>,
        f: &mut TransactionFn<'_, T, D, R>,
        cx: &mut ExecutionContext,
    ) -> crate::Result<R>
    where
        D: Decoder,
    {
        let txn_id = match self.transport.start_transaction(&self.handle).await {
            Ok(id) => id,
            Err(err) => return Err(err.into_start_transaction()),
        };

        let mut txn = Transaction::new(
            self.transport.clone(),
            decoder.clone(),
            self.handle.clone(),
            txn_id,
        );

        let outcome = match f(&mut txn).await {
            Ok(value) => txn.commit().await.map(|()| value),
            Err(err) => Err(err),
        };

        // Reports from failed attempts still count toward the execution's
        // cumulative totals.
        let totals = std::mem::take(&mut txn.totals);
        cx.totals.absorb(totals);

        match outcome {
            Ok(value) => Ok(value),
            Err(err) => {
                // Close the transaction before the session is used again.
                // Best effort, and the original error wins; a session the
                // service has invalidated cannot abort anything.
                if !err.is_session_invalidating() {
                    if let Err(abort_err) = self
                        .transport
                        .abort_transaction(&self.handle, &txn.id)
                        .await
                    {
                        tracing::debug!(txn_id = %txn.id, %abort_err, "failed to abort transaction");
                    }
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::RawDecoder;
    use crate::retry::ExponentialRetryPolicy;
    use crate::stats::IOUsage;
    use crate::transport::{Page, PageResult, StatementResult};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Conflicts the first commit, succeeds thereafter. Every statement
    /// execution reports five read I/Os.
    #[derive(Default)]
    struct ConflictOnce {
        commits: AtomicUsize,
        aborts: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Transport for ConflictOnce {
        async fn create_session(&self, _ledger: &str) -> crate::Result<SessionHandle> {
            Ok(SessionHandle("s".to_string()))
        }

        async fn start_transaction(&self, _session: &SessionHandle) -> crate::Result<String> {
            Ok("t".to_string())
        }

        async fn execute_statement(
            &self,
            _session: &SessionHandle,
            _txn_id: &str,
            _statement: &str,
            _params: &[Bytes],
        ) -> crate::Result<StatementResult> {
            Ok(StatementResult {
                first_page: Page::default(),
                consumed_ios: Some(IOUsage { read_ios: 5 }),
                timing_information: None,
            })
        }

        async fn fetch_page(
            &self,
            _session: &SessionHandle,
            _txn_id: &str,
            _token: &str,
        ) -> crate::Result<PageResult> {
            Err(Error::Protocol("no pages scripted"))
        }

        async fn commit(
            &self,
            _session: &SessionHandle,
            _txn_id: &str,
            digest: Bytes,
        ) -> crate::Result<Bytes> {
            if self.commits.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(Error::Conflict("concurrent writer".into()));
            }
            Ok(digest)
        }

        async fn abort_transaction(
            &self,
            _session: &SessionHandle,
            _txn_id: &str,
        ) -> crate::Result<()> {
            self.aborts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn end_session(&self, _session: &SessionHandle) -> crate::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn conflicted_attempts_abort_and_still_accumulate_usage() {
        fn run(txn: &mut Transaction<ConflictOnce, RawDecoder>) -> BoxFuture<'_, crate::Result<()>> {
            Box::pin(async move {
                txn.execute("UPDATE t SET x = 1", &[]).await?;
                Ok(())
            })
        }

        let transport = Arc::new(ConflictOnce::default());
        let decoder = Arc::new(RawDecoder);
        let mut session = Session::new(transport.clone(), SessionHandle("s".to_string()));
        let policy = ExponentialRetryPolicy::new(2)
            .with_min(Duration::from_millis(1))
            .with_max(Duration::from_millis(2));
        let mut cx = ExecutionContext::default();

        let mut f = run;
        session
            .invoke(&decoder, &mut f, &policy, &mut cx)
            .await
            .unwrap();

        // Both the conflicted attempt and the committed one report I/O.
        assert_eq!(cx.attempt, 1);
        assert_eq!(cx.totals.io(), Some(IOUsage { read_ios: 10 }));
        // The failed commit was followed by a best-effort abort.
        assert_eq!(transport.aborts.load(Ordering::SeqCst), 1);
        assert!(session.is_open());
    }

    #[test]
    fn digest_is_deterministic_over_statement_order() {
        let mut a = CommitDigest::seed("txn-1");
        a.fold_statement("SELECT * FROM a", &[]);
        a.fold_statement("UPDATE a SET x = ?", &[Bytes::from_static(b"1")]);

        let mut b = CommitDigest::seed("txn-1");
        b.fold_statement("SELECT * FROM a", &[]);
        b.fold_statement("UPDATE a SET x = ?", &[Bytes::from_static(b"1")]);

        assert_eq!(a, b);

        let mut c = CommitDigest::seed("txn-1");
        c.fold_statement("UPDATE a SET x = ?", &[Bytes::from_static(b"1")]);
        c.fold_statement("SELECT * FROM a", &[]);
        assert_ne!(a, c);
    }

    #[test]
    fn digest_depends_on_transaction_id() {
        let a = CommitDigest::seed("txn-1");
        let b = CommitDigest::seed("txn-2");
        assert_ne!(a, b);
    }
}
