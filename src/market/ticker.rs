use crate::error::AppError;
use crate::market::backend::price_stream_endpoint;
use crate::market::feed::{ConnectOutcome, FeedConnection, FeedConnector};
use crate::market::types::{parse_price_frame, ConnectionState, PriceTick};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;

pub struct PriceTicker {
    symbol: String,
    stream_base_url: String,
    current_price: Option<Decimal>,
    feed: FeedConnection<PriceTick>,
}

impl PriceTicker {
    pub fn new(
        connector: Arc<dyn FeedConnector>,
        stream_base_url: impl Into<String>,
        symbol: impl Into<String>,
        reconnect_delay: Duration,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            stream_base_url: stream_base_url.into(),
            current_price: None,
            feed: FeedConnection::new("price", connector, parse_price_frame, reconnect_delay),
        }
    }

    pub fn connect<S>(&mut self, on_tick: S) -> Result<ConnectOutcome, AppError>
    where
        S: Fn(PriceTick) + Send + Sync + 'static,
    {
        let endpoint = price_stream_endpoint(&self.stream_base_url, &self.symbol);
        self.feed.open(endpoint, on_tick)
    }

    pub fn apply_tick(&mut self, tick: &PriceTick) -> bool {
        if tick
            .symbol
            .as_deref()
            .is_some_and(|symbol| !symbol.eq_ignore_ascii_case(&self.symbol))
        {
            return false;
        }
        if self.current_price == Some(tick.price) {
            return false;
        }
        self.current_price = Some(tick.price);
        true
    }

    pub fn disconnect(&mut self) {
        self.feed.close();
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn current_price(&self) -> Option<Decimal> {
        self.current_price
    }

    pub fn state(&self) -> ConnectionState {
        self.feed.state()
    }
}
