use crate::error::{FeedError, HistoryError};
use crate::market::feed::{FeedConnector, FeedFrame, FeedStream};
use crate::market::history::{HistoryRequest, HistorySource};
use crate::market::types::Interval;
use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

pub(crate) type SessionSender = mpsc::UnboundedSender<Result<FeedFrame, FeedError>>;
type SessionReceiver = mpsc::UnboundedReceiver<Result<FeedFrame, FeedError>>;

#[derive(Default)]
pub(crate) struct FakeConnector {
    sessions: Mutex<Vec<(String, SessionReceiver)>>,
    endpoints: Mutex<Vec<String>>,
}

impl FakeConnector {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn open_session(&self, fragment: &str) -> SessionSender {
        let (tx, rx) = mpsc::unbounded_channel();
        self.sessions.lock().push((fragment.to_string(), rx));
        tx
    }

    pub(crate) fn attempts(&self) -> usize {
        self.endpoints.lock().len()
    }

    pub(crate) fn attempts_for(&self, fragment: &str) -> usize {
        self.endpoints
            .lock()
            .iter()
            .filter(|endpoint| endpoint.contains(fragment))
            .count()
    }
}

#[async_trait]
impl FeedConnector for FakeConnector {
    async fn connect(&self, endpoint: &str) -> Result<FeedStream, FeedError> {
        self.endpoints.lock().push(endpoint.to_string());

        let session = {
            let mut sessions = self.sessions.lock();
            sessions
                .iter()
                .position(|(fragment, _)| endpoint.contains(fragment.as_str()))
                .map(|index| sessions.remove(index).1)
        };

        match session {
            Some(receiver) => Ok(futures_util::stream::unfold(receiver, |mut receiver| async move {
                receiver.recv().await.map(|item| (item, receiver))
            })
            .boxed()),
            None => Err(FeedError::Unavailable(format!("refused {endpoint}"))),
        }
    }
}

pub(crate) fn send_text(session: &SessionSender, payload: &str) {
    session
        .send(Ok(FeedFrame::Text(payload.to_string())))
        .expect("fake session should be open");
}

type PendingFetch = (HistoryRequest, oneshot::Sender<Result<Vec<u8>, HistoryError>>);

#[derive(Default)]
pub(crate) struct FakeHistory {
    pending: Mutex<Vec<PendingFetch>>,
    requests: Mutex<Vec<HistoryRequest>>,
}

impl FakeHistory {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn requests(&self) -> Vec<HistoryRequest> {
        self.requests.lock().clone()
    }

    pub(crate) async fn respond(
        &self,
        symbol: &str,
        interval: Interval,
        result: Result<Vec<u8>, HistoryError>,
    ) {
        for _ in 0..1_000 {
            let sender = {
                let mut pending = self.pending.lock();
                pending
                    .iter()
                    .position(|(request, _)| {
                        request.key.symbol == symbol && request.key.interval == interval
                    })
                    .map(|index| pending.remove(index).1)
            };
            if let Some(sender) = sender {
                let _ = sender.send(result);
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("no pending history request for {symbol}@{interval}");
    }
}

#[async_trait]
impl HistorySource for FakeHistory {
    async fn fetch(&self, request: &HistoryRequest) -> Result<Vec<u8>, HistoryError> {
        let (tx, rx) = oneshot::channel();
        self.requests.lock().push(request.clone());
        self.pending.lock().push((request.clone(), tx));
        rx.await.unwrap_or(Err(HistoryError::Status(499)))
    }
}

// Backend-shaped history body; `rows` are `(open_time_secs, open, high, low, close, volume)`.
pub(crate) fn history_body(rows: &[(i64, &str, &str, &str, &str, &str)]) -> Vec<u8> {
    let records: Vec<String> = rows
        .iter()
        .map(|(open_time, open, high, low, close, volume)| {
            let open_ms = open_time * 1_000;
            format!(
                r#"{{"openTime":{open_ms},"open":"{open}","high":"{high}","low":"{low}","close":"{close}","volume":"{volume}","closeTime":{},"quoteAssetVolume":"0","numberOfTrades":1}}"#,
                open_ms + 59_999
            )
        })
        .collect();
    format!(
        r#"{{"data":[{}],"count":{},"source":"test"}}"#,
        records.join(","),
        rows.len()
    )
    .into_bytes()
}

pub(crate) fn kline_frame(symbol: &str, time: i64, close: f64) -> String {
    format!(
        r#"{{"type":"kline","data":{{"symbol":"{symbol}","time":{time},"open":{close},"high":{close},"low":{close},"close":{close},"volume":1.5}}}}"#
    )
}

pub(crate) fn price_frame(symbol: &str, price: &str) -> String {
    format!(
        r#"{{"type":"price","data":{{"symbol":"{symbol}","price":"{price}","timestamp":1700000000}}}}"#
    )
}
