use crate::error::HistoryError;
use crate::market::types::{parse_history_payload, Candle, SubscriptionKey};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRequest {
    pub key: SubscriptionKey,
    pub limit: u16,
}

#[async_trait]
pub trait HistorySource: Send + Sync {
    async fn fetch(&self, request: &HistoryRequest) -> Result<Vec<u8>, HistoryError>;
}

#[derive(Clone)]
pub struct HistoricalLoader {
    source: Arc<dyn HistorySource>,
}

impl HistoricalLoader {
    pub fn new(source: Arc<dyn HistorySource>) -> Self {
        Self { source }
    }

    pub async fn load(&self, key: &SubscriptionKey, limit: u16) -> Result<Vec<Candle>, HistoryError> {
        let request = HistoryRequest {
            key: key.clone(),
            limit,
        };
        let mut body = self.source.fetch(&request).await?;
        let candles = parse_history_payload(&mut body)?;
        let received = candles.len();

        let mut by_open_time = BTreeMap::new();
        for candle in candles {
            by_open_time.insert(candle.open_time, candle);
        }

        let mut ordered: Vec<Candle> = by_open_time.into_values().collect();
        let overflow = ordered.len().saturating_sub(usize::from(limit));
        if overflow > 0 {
            ordered.drain(..overflow);
        }
        if ordered.is_empty() {
            return Err(HistoryError::Empty);
        }

        debug!(
            %key,
            received,
            kept = ordered.len(),
            "history payload decoded"
        );
        Ok(ordered)
    }
}
