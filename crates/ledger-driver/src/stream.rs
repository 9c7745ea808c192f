use crate::decode::Decoder;
use crate::stats::{IOUsage, TimingInformation, UsageTotals};
use crate::transport::{SessionHandle, StatementResult, Transport};
use crate::Error;
use std::sync::Arc;

/// Where the stream is in its lifecycle. A faulted stream services no
/// further reads; an ended stream has emitted its terminal signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamState {
    Open,
    Ended,
    Faulted,
}

/// A pull-based stream over one statement's paginated result set.
///
/// The statement's first page is buffered at construction, so draining it
/// requires no network call. Once the buffer is exhausted, each continuation
/// token is fetched lazily on the next read, one fetch in flight at most
/// (the `&mut self` receiver is the single-flight guard). Because fetching
/// happens only when the consumer asks for a value the buffer cannot supply,
/// a paused consumer never triggers a prefetch.
///
/// Usage and timing reports from the statement and every fetched page are
/// accumulated, and may be snapshotted once the stream has ended.
pub struct ResultStream<T: Transport, D: Decoder> {
    transport: Arc<T>,
    decoder: Arc<D>,
    session: SessionHandle,
    txn_id: String,
    buffer: Vec<bytes::Bytes>,
    cursor: usize,
    next_page_token: Option<String>,
    totals: UsageTotals,
    state: StreamState,
}

impl<T: Transport, D: Decoder> ResultStream<T, D> {
    pub(crate) fn new(
        transport: Arc<T>,
        decoder: Arc<D>,
        session: SessionHandle,
        txn_id: String,
        result: StatementResult,
    ) -> Self {
        let mut totals = UsageTotals::default();
        totals.record(result.consumed_ios, result.timing_information);

        Self {
            transport,
            decoder,
            session,
            txn_id,
            buffer: result.first_page.values,
            cursor: 0,
            next_page_token: result.first_page.next_page_token,
            totals,
            state: StreamState::Open,
        }
    }

    /// Pull the next decoded value. Resolves to `None` exactly when the last
    /// page's values are exhausted and no continuation token remains. A page
    /// fetch or decode failure is yielded once as `Some(Err(_))`, after
    /// which the stream is permanently stopped.
    pub async fn next(&mut self) -> Option<crate::Result<D::Value>> {
        loop {
            if self.state != StreamState::Open {
                return None;
            }

            if self.cursor < self.buffer.len() {
                let blob = &self.buffer[self.cursor];
                self.cursor += 1;

                match self.decoder.decode(blob) {
                    Ok(value) => return Some(Ok(value)),
                    Err(err) => return Some(Err(self.fault(err))),
                }
            }

            let Some(token) = self.next_page_token.take() else {
                self.state = StreamState::Ended;
                return None;
            };

            match self
                .transport
                .fetch_page(&self.session, &self.txn_id, &token)
                .await
            {
                Ok(fetched) => {
                    tracing::trace!(
                        txn_id = %self.txn_id,
                        values = fetched.page.values.len(),
                        more = fetched.page.next_page_token.is_some(),
                        "fetched result page"
                    );
                    self.totals
                        .record(fetched.consumed_ios, fetched.timing_information);
                    self.buffer = fetched.page.values;
                    self.cursor = 0;
                    self.next_page_token = fetched.page.next_page_token;
                }
                Err(err) => return Some(Err(self.fault(err))),
            }
        }
    }

    fn fault(&mut self, err: Error) -> Error {
        tracing::debug!(txn_id = %self.txn_id, %err, "result stream faulted");
        self.state = StreamState::Faulted;
        err
    }

    /// Drain every remaining value into a Vec.
    pub async fn read_all(&mut self) -> crate::Result<Vec<D::Value>> {
        let mut values = Vec::new();
        while let Some(next) = self.next().await {
            values.push(next?);
        }
        Ok(values)
    }

    /// Total read I/O reported across the statement and its pages, if any
    /// report was made. Meaningful once the stream has ended.
    pub fn consumed_ios(&self) -> Option<IOUsage> {
        self.totals.io()
    }

    /// Total server processing time reported across the statement and its
    /// pages, if any report was made.
    pub fn timing_information(&self) -> Option<TimingInformation> {
        self.totals.timing()
    }

    /// Adapt into a `futures::Stream` of decoded values.
    pub fn into_stream(self) -> impl futures::Stream<Item = crate::Result<D::Value>> {
        futures::stream::try_unfold(self, |mut inner| async move {
            match inner.next().await {
                Some(Ok(value)) => Ok(Some((value, inner))),
                Some(Err(err)) => Err(err),
                None => Ok(None),
            }
        })
    }
}
