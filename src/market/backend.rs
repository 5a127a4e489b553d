use crate::error::{AppError, FeedError, HistoryError};
use crate::market::feed::{FeedConnector, FeedFrame, FeedStream};
use crate::market::history::{HistoryRequest, HistorySource};
use crate::market::types::{Interval, SubscriptionKey};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use std::time::Duration;
use tokio_tungstenite::connect_async_with_config;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;

const HISTORY_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

fn history_endpoint(base_url: &str, symbol: &str, interval: Interval, limit: u16) -> String {
    format!("{base_url}/api/kline/history")
        + &format!(
            "?symbol={}&interval={}&limit={limit}",
            symbol.to_ascii_uppercase(),
            interval.as_str()
        )
}

pub fn kline_stream_endpoint(stream_base_url: &str, key: &SubscriptionKey) -> String {
    format!("{stream_base_url}/api/kline")
        + &format!(
            "?symbol={}&interval={}",
            key.symbol.to_ascii_uppercase(),
            key.interval.as_str()
        )
}

pub fn price_stream_endpoint(stream_base_url: &str, symbol: &str) -> String {
    format!(
        "{stream_base_url}/api/price?symbol={}",
        symbol.to_ascii_uppercase()
    )
}

pub struct HttpHistorySource {
    client: Client,
    base_url: String,
}

impl HttpHistorySource {
    pub fn new(base_url: impl Into<String>) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(HISTORY_REQUEST_TIMEOUT)
            .build()?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl HistorySource for HttpHistorySource {
    async fn fetch(&self, request: &HistoryRequest) -> Result<Vec<u8>, HistoryError> {
        let endpoint = history_endpoint(
            &self.base_url,
            &request.key.symbol,
            request.key.interval,
            request.limit,
        );
        let response = self.client.get(endpoint).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(HistoryError::Status(status.as_u16()));
        }
        let body = response.bytes().await?;
        Ok(body.to_vec())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct WsFeedConnector;

#[async_trait]
impl FeedConnector for WsFeedConnector {
    async fn connect(&self, endpoint: &str) -> Result<FeedStream, FeedError> {
        let ws_config = WebSocketConfig {
            max_message_size: Some(16 << 20),
            max_frame_size: Some(4 << 20),
            ..Default::default()
        };

        let (stream, _) = connect_async_with_config(endpoint, Some(ws_config), true).await?;
        let frames = stream.filter_map(|message| async move {
            match message {
                Ok(Message::Text(text)) => Some(Ok(FeedFrame::Text(text))),
                Ok(Message::Binary(bytes)) => Some(Ok(FeedFrame::Binary(bytes))),
                Ok(Message::Close(_)) => Some(Ok(FeedFrame::Close)),
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => None,
                Err(error) => Some(Err(FeedError::from(error))),
            }
        });
        Ok(frames.boxed())
    }
}
