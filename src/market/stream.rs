use crate::error::AppError;
use crate::market::backend::kline_stream_endpoint;
use crate::market::feed::{ConnectOutcome, FeedConnection, FeedConnector};
use crate::market::types::{parse_candle_frame, CandleUpdate, ConnectionState, SubscriptionKey};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

pub struct StreamConnection {
    stream_base_url: String,
    key: Option<SubscriptionKey>,
    feed: FeedConnection<CandleUpdate>,
}

impl StreamConnection {
    pub fn new(
        connector: Arc<dyn FeedConnector>,
        stream_base_url: impl Into<String>,
        reconnect_delay: Duration,
    ) -> Self {
        Self {
            stream_base_url: stream_base_url.into(),
            key: None,
            feed: FeedConnection::new("candle", connector, parse_candle_frame, reconnect_delay),
        }
    }

    pub fn connect<S>(&mut self, key: SubscriptionKey, on_update: S) -> Result<ConnectOutcome, AppError>
    where
        S: Fn(CandleUpdate) + Send + Sync + 'static,
    {
        let endpoint = kline_stream_endpoint(&self.stream_base_url, &key);
        let outcome = self.feed.open(endpoint, on_update)?;
        self.key = Some(key);
        Ok(outcome)
    }

    pub fn disconnect(&mut self) {
        self.feed.close();
    }

    pub fn state(&self) -> ConnectionState {
        self.feed.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.feed.watch_state()
    }

    pub fn key(&self) -> Option<&SubscriptionKey> {
        self.key.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::testing::{kline_frame, send_text, FakeConnector};
    use crate::market::types::Interval;
    use rust_decimal::Decimal;
    use tokio::sync::mpsc;

    #[tokio::test(start_paused = true)]
    async fn subscribes_to_key_endpoint_and_forwards_updates() {
        let connector = FakeConnector::new();
        let session = connector.open_session("/api/kline?symbol=BTCUSDT&interval=5m");
        let mut stream =
            StreamConnection::new(connector.clone(), "ws://test", Duration::from_secs(5));
        let key = SubscriptionKey::new("BTCUSDT", Interval::M5).expect("valid key");
        let (tx, mut rx) = mpsc::unbounded_channel();

        stream
            .connect(key.clone(), move |update| {
                let _ = tx.send(update);
            })
            .expect("connect should succeed");
        assert_eq!(stream.key(), Some(&key));
        assert_eq!(stream.state(), ConnectionState::Connecting);

        send_text(&session, &kline_frame("BTCUSDT", 600, 42.5));
        let update = rx.recv().await.expect("update delivered");
        assert_eq!(update.candle.open_time, 600);
        assert_eq!(update.candle.close, Decimal::new(425, 1));
        assert_eq!(stream.state(), ConnectionState::Connected);

        stream.disconnect();
        assert_eq!(stream.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn rejects_a_second_key_on_the_same_connection() {
        let connector = FakeConnector::new();
        let mut stream =
            StreamConnection::new(connector.clone(), "ws://test", Duration::from_secs(5));
        let first = SubscriptionKey::new("BTCUSDT", Interval::M1).expect("valid key");
        let second = SubscriptionKey::new("ETHUSDT", Interval::M1).expect("valid key");

        assert_eq!(
            stream.connect(first.clone(), |_| {}).expect("first connect"),
            ConnectOutcome::Started
        );
        assert_eq!(
            stream.connect(first.clone(), |_| {}).expect("same key"),
            ConnectOutcome::AlreadyActive
        );
        assert!(stream.connect(second, |_| {}).is_err());
        assert_eq!(stream.key(), Some(&first));
    }
}
