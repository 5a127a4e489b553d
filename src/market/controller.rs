use crate::error::{AppError, ErrorKind, HistoryError};
use crate::market::config::SyncConfig;
use crate::market::feed::FeedConnector;
use crate::market::history::{HistoricalLoader, HistorySource};
use crate::market::store::CandleStore;
use crate::market::stream::StreamConnection;
use crate::market::ticker::PriceTicker;
use crate::market::types::{
    normalize_symbol, Candle, CandleUpdate, ConnectionState, Interval, PriceTick, SubscriptionKey,
};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug)]
pub enum SyncEvent {
    HistoryLoaded {
        generation: u64,
        key: SubscriptionKey,
        result: Result<Vec<Candle>, HistoryError>,
    },
    CandleReceived {
        generation: u64,
        update: CandleUpdate,
    },
    PriceReceived {
        generation: u64,
        tick: PriceTick,
    },
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub key: Option<SubscriptionKey>,
    pub is_loading_history: bool,
    pub last_error: Option<ErrorKind>,
    pub connection_state: ConnectionState,
    pub ticker_state: ConnectionState,
    pub current_price: Option<Decimal>,
    pub candle_count: usize,
    pub revision: u64,
}

/// Sole owner of the candle series and of the staleness tokens.
///
/// Background work (history requests, feed sockets) never touches this state
/// directly. It reports through [`SyncEvent`]s, and [`SyncController::apply`]
/// discards any event whose generation is no longer current, so results for an
/// abandoned key can never reach the series of the active one.
pub struct SyncController {
    config: SyncConfig,
    loader: HistoricalLoader,
    connector: Arc<dyn FeedConnector>,
    store: CandleStore,
    key: Option<SubscriptionKey>,
    generation: u64,
    ticker_generation: u64,
    is_loading_history: bool,
    last_error: Option<ErrorKind>,
    stream: Option<StreamConnection>,
    ticker: Option<PriceTicker>,
    events_tx: mpsc::UnboundedSender<SyncEvent>,
    events_rx: mpsc::UnboundedReceiver<SyncEvent>,
}

impl SyncController {
    /// Must be driven inside a tokio runtime: key changes spawn the history
    /// request and both feeds onto it.
    pub fn create(
        config: SyncConfig,
        history: Arc<dyn HistorySource>,
        connector: Arc<dyn FeedConnector>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            config,
            loader: HistoricalLoader::new(history),
            connector,
            store: CandleStore::new(),
            key: None,
            generation: 0,
            ticker_generation: 0,
            is_loading_history: false,
            last_error: None,
            stream: None,
            ticker: None,
            events_tx,
            events_rx,
        }
    }

    pub fn start(&mut self) -> bool {
        let key = self.config.default_key.clone();
        self.select(key)
    }

    pub fn set_symbol(&mut self, symbol: &str) -> Result<bool, AppError> {
        let symbol = normalize_symbol(symbol)?;
        let interval = self
            .key
            .as_ref()
            .map_or(self.config.default_key.interval, |key| key.interval);
        Ok(self.select(SubscriptionKey { symbol, interval }))
    }

    pub fn set_interval(&mut self, interval: &str) -> Result<bool, AppError> {
        let interval = interval.parse::<Interval>()?;
        let symbol = self
            .key
            .as_ref()
            .map_or_else(|| self.config.default_key.symbol.clone(), |key| key.symbol.clone());
        Ok(self.select(SubscriptionKey { symbol, interval }))
    }

    pub fn select(&mut self, key: SubscriptionKey) -> bool {
        if self.key.as_ref() == Some(&key) {
            return false;
        }

        self.generation = self.generation.wrapping_add(1);
        if let Some(mut stream) = self.stream.take() {
            stream.disconnect();
        }
        self.store.clear();
        self.is_loading_history = true;
        self.last_error = None;
        self.ensure_ticker(&key.symbol);
        self.key = Some(key.clone());

        let generation = self.generation;
        info!(%key, generation, "subscription changed, loading history");

        let loader = self.loader.clone();
        let events = self.events_tx.clone();
        let limit = self.config.history_limit;
        tokio::spawn(async move {
            let result = loader.load(&key, limit).await;
            let _ = events.send(SyncEvent::HistoryLoaded {
                generation,
                key,
                result,
            });
        });
        true
    }

    pub fn teardown(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        self.ticker_generation = self.ticker_generation.wrapping_add(1);
        if let Some(mut stream) = self.stream.take() {
            stream.disconnect();
        }
        if let Some(mut ticker) = self.ticker.take() {
            ticker.disconnect();
        }
        if !self.store.is_empty() {
            self.store.clear();
        }
        if let Some(key) = self.key.take() {
            info!(%key, "market sync torn down");
        }
        self.is_loading_history = false;
        self.last_error = None;
    }

    pub async fn next_event(&mut self) -> Option<SyncEvent> {
        self.events_rx.recv().await
    }

    pub fn drain_ready(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            if self.apply(event) {
                applied += 1;
            }
        }
        applied
    }

    pub fn apply(&mut self, event: SyncEvent) -> bool {
        match event {
            SyncEvent::HistoryLoaded {
                generation,
                key,
                result,
            } => {
                if generation != self.generation {
                    debug!(%key, generation, current = self.generation, "discarding stale history result");
                    return false;
                }
                self.finish_history(key, result);
                true
            }
            SyncEvent::CandleReceived { generation, update } => {
                if generation != self.generation {
                    debug!(generation, current = self.generation, "discarding stale candle update");
                    return false;
                }
                let Some(key) = self.key.as_ref() else {
                    return false;
                };
                if let Some(symbol) = update.symbol.as_deref() {
                    if !symbol.eq_ignore_ascii_case(&key.symbol) {
                        debug!(%key, symbol, "dropping candle update for another symbol");
                        return false;
                    }
                }
                self.store.upsert(update.candle);
                true
            }
            SyncEvent::PriceReceived { generation, tick } => {
                if generation != self.ticker_generation {
                    return false;
                }
                self.ticker
                    .as_mut()
                    .is_some_and(|ticker| ticker.apply_tick(&tick))
            }
        }
    }

    fn finish_history(&mut self, key: SubscriptionKey, result: Result<Vec<Candle>, HistoryError>) {
        self.is_loading_history = false;
        match result {
            Ok(candles) => {
                let count = candles.len();
                self.store.extend(candles);
                info!(%key, candles = count, "history applied, opening candle stream");
                self.open_stream(key);
            }
            Err(error) => {
                let kind = error.kind();
                warn!(%key, ?kind, %error, "history load failed, candle stream not opened");
                self.last_error = Some(kind);
            }
        }
    }

    fn open_stream(&mut self, key: SubscriptionKey) {
        let mut stream = StreamConnection::new(
            Arc::clone(&self.connector),
            self.config.stream_base_url.clone(),
            self.config.reconnect_delay,
        );
        let events = self.events_tx.clone();
        let generation = self.generation;
        if let Err(error) = stream.connect(key, move |update| {
            let _ = events.send(SyncEvent::CandleReceived { generation, update });
        }) {
            warn!(%error, "candle stream could not be started");
        }
        self.stream = Some(stream);
    }

    fn ensure_ticker(&mut self, symbol: &str) {
        if self
            .ticker
            .as_ref()
            .is_some_and(|ticker| ticker.symbol() == symbol)
        {
            return;
        }
        if let Some(mut ticker) = self.ticker.take() {
            ticker.disconnect();
        }

        self.ticker_generation = self.ticker_generation.wrapping_add(1);
        let mut ticker = PriceTicker::new(
            Arc::clone(&self.connector),
            self.config.stream_base_url.clone(),
            symbol,
            self.config.reconnect_delay,
        );
        let events = self.events_tx.clone();
        let generation = self.ticker_generation;
        if let Err(error) = ticker.connect(move |tick| {
            let _ = events.send(SyncEvent::PriceReceived { generation, tick });
        }) {
            warn!(symbol, %error, "price ticker could not be started");
        }
        self.ticker = Some(ticker);
    }

    pub fn key(&self) -> Option<&SubscriptionKey> {
        self.key.as_ref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_loading_history(&self) -> bool {
        self.is_loading_history
    }

    pub fn last_error(&self) -> Option<ErrorKind> {
        self.last_error
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.stream
            .as_ref()
            .map_or(ConnectionState::Disconnected, StreamConnection::state)
    }

    pub fn ticker_state(&self) -> ConnectionState {
        self.ticker
            .as_ref()
            .map_or(ConnectionState::Disconnected, PriceTicker::state)
    }

    pub fn current_price(&self) -> Option<Decimal> {
        self.ticker.as_ref().and_then(PriceTicker::current_price)
    }

    pub fn store(&self) -> &CandleStore {
        &self.store
    }

    pub fn candles(&self) -> Vec<Candle> {
        self.store.to_vec()
    }

    pub fn status(&self) -> SyncStatus {
        SyncStatus {
            key: self.key.clone(),
            is_loading_history: self.is_loading_history,
            last_error: self.last_error,
            connection_state: self.connection_state(),
            ticker_state: self.ticker_state(),
            current_price: self.current_price(),
            candle_count: self.store.len(),
            revision: self.store.revision(),
        }
    }
}
