use crate::market::types::Candle;
use std::collections::BTreeMap;

#[derive(Debug, Default)]
pub struct CandleStore {
    series: BTreeMap<i64, Candle>,
    revision: u64,
}

impl CandleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&mut self, candle: Candle) {
        self.series.insert(candle.open_time, candle);
        self.revision = self.revision.wrapping_add(1);
    }

    pub fn extend<I>(&mut self, candles: I)
    where
        I: IntoIterator<Item = Candle>,
    {
        for candle in candles {
            self.upsert(candle);
        }
    }

    pub fn to_ordered_list(&self) -> impl Iterator<Item = &Candle> + '_ {
        self.series.values()
    }

    pub fn to_vec(&self) -> Vec<Candle> {
        self.to_ordered_list().cloned().collect()
    }

    pub fn get(&self, open_time: i64) -> Option<&Candle> {
        self.series.get(&open_time)
    }

    pub fn latest(&self) -> Option<&Candle> {
        self.series.values().next_back()
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    pub fn clear(&mut self) {
        self.series.clear();
        self.revision = self.revision.wrapping_add(1);
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }
}
