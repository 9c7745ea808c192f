use crate::session::Session;
use crate::transport::Transport;
use crate::Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Bounds the number of concurrently in-flight transactions and recycles
/// idle sessions. Permits are owned values, so releasing capacity exactly
/// once per acquisition is enforced by ownership rather than discipline.
pub(crate) struct SessionPool<T: Transport> {
    transport: Arc<T>,
    ledger: String,
    idle: Mutex<Vec<Session<T>>>,
    permits: Arc<Semaphore>,
    acquire_timeout: Duration,
    closed: AtomicBool,
}

impl<T: Transport> SessionPool<T> {
    pub fn new(
        transport: Arc<T>,
        ledger: String,
        capacity: usize,
        acquire_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            ledger,
            idle: Mutex::new(Vec::new()),
            permits: Arc::new(Semaphore::new(capacity)),
            acquire_timeout,
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Admit one transaction and hand out a session, pooled or fresh.
    ///
    /// Admission is non-blocking: with no permit available this fails
    /// immediately, reporting the configured timeout in the error without
    /// waiting it out. If session creation fails, the dropped permit
    /// restores capacity before the error propagates.
    pub async fn acquire(&self) -> crate::Result<(Session<T>, OwnedSemaphorePermit)> {
        if self.is_closed() {
            return Err(Error::Closed);
        }

        let permit = self
            .permits
            .clone()
            .try_acquire_owned()
            .map_err(|_| Error::PoolExhausted(self.acquire_timeout))?;

        // Lock is held only across this non-suspending segment.
        let pooled = self.idle.lock().unwrap().pop();
        if let Some(session) = pooled {
            tracing::debug!(session = %session.handle(), "reusing pooled session");
            return Ok((session, permit));
        }

        let handle = self.transport.create_session(&self.ledger).await?;
        tracing::debug!(session = %handle, "created session");
        Ok((Session::new(self.transport.clone(), handle), permit))
    }

    /// Return a borrowed session. Open sessions go back into the idle pool;
    /// closed ones are discarded. Dropping the permit restores capacity.
    pub fn release(&self, session: Session<T>, permit: OwnedSemaphorePermit) {
        if session.is_open() && !self.is_closed() {
            self.idle.lock().unwrap().push(session);
        } else {
            tracing::debug!(session = %session.handle(), "discarding session");
        }
        drop(permit);
    }

    /// Mark the pool closed and end every currently-idle session. Borrowed
    /// sessions are not interrupted; they are discarded on release.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let idle = std::mem::take(&mut *self.idle.lock().unwrap());
        for mut session in idle {
            if let Err(err) = session.end().await {
                tracing::warn!(session = %session.handle(), %err, "failed to end pooled session");
            }
        }
    }
}
