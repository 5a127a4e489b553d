use crate::error::AppError;
use rust_decimal::Decimal;
use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Interval {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "3m")]
    M3,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "2h")]
    H2,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "6h")]
    H6,
    #[serde(rename = "8h")]
    H8,
    #[serde(rename = "12h")]
    H12,
    #[serde(rename = "1d")]
    D1,
    #[serde(rename = "3d")]
    D3,
    #[serde(rename = "1w")]
    W1,
    #[serde(rename = "1M")]
    Mo1,
}

impl Interval {
    pub const ALL: [Interval; 15] = [
        Self::M1,
        Self::M3,
        Self::M5,
        Self::M15,
        Self::M30,
        Self::H1,
        Self::H2,
        Self::H4,
        Self::H6,
        Self::H8,
        Self::H12,
        Self::D1,
        Self::D3,
        Self::W1,
        Self::Mo1,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::M1 => "1m",
            Self::M3 => "3m",
            Self::M5 => "5m",
            Self::M15 => "15m",
            Self::M30 => "30m",
            Self::H1 => "1h",
            Self::H2 => "2h",
            Self::H4 => "4h",
            Self::H6 => "6h",
            Self::H8 => "8h",
            Self::H12 => "12h",
            Self::D1 => "1d",
            Self::D3 => "3d",
            Self::W1 => "1w",
            Self::Mo1 => "1M",
        }
    }

    /// Bucket width in seconds; months are approximated as 30 days.
    pub fn duration_secs(self) -> i64 {
        match self {
            Self::M1 => 60,
            Self::M3 => 180,
            Self::M5 => 300,
            Self::M15 => 900,
            Self::M30 => 1_800,
            Self::H1 => 3_600,
            Self::H2 => 7_200,
            Self::H4 => 14_400,
            Self::H6 => 21_600,
            Self::H8 => 28_800,
            Self::H12 => 43_200,
            Self::D1 => 86_400,
            Self::D3 => 259_200,
            Self::W1 => 604_800,
            Self::Mo1 => 2_592_000,
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interval {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        Self::ALL
            .into_iter()
            .find(|interval| interval.as_str() == trimmed)
            .ok_or_else(|| AppError::InvalidArgument(format!("unsupported interval '{trimmed}'")))
    }
}

pub fn normalize_symbol(raw: &str) -> Result<String, AppError> {
    let symbol = raw.trim().to_ascii_uppercase();
    if symbol.is_empty() || !symbol.chars().all(|ch| ch.is_ascii_alphanumeric()) {
        return Err(AppError::InvalidArgument(
            "symbol must be non-empty alphanumeric ASCII".to_string(),
        ));
    }
    Ok(symbol)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionKey {
    pub symbol: String,
    pub interval: Interval,
}

impl SubscriptionKey {
    pub fn new(symbol: &str, interval: Interval) -> Result<Self, AppError> {
        Ok(Self {
            symbol: normalize_symbol(symbol)?,
            interval,
        })
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.symbol, self.interval)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Candle {
    pub open_time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CandleUpdate {
    pub symbol: Option<String>,
    pub candle: Candle,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PriceTick {
    pub symbol: Option<String>,
    pub price: Decimal,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum WireDecimal {
    Text(String),
    Integer(i64),
    Unsigned(u64),
    Float(f64),
}

impl WireDecimal {
    pub fn to_decimal(&self, field: &'static str) -> Result<Decimal, AppError> {
        let parsed = match self {
            Self::Text(raw) => {
                let raw = raw.trim();
                Decimal::from_str(raw).or_else(|_| Decimal::from_scientific(raw))
            }
            Self::Integer(value) => Ok(Decimal::from(*value)),
            Self::Unsigned(value) => Ok(Decimal::from(*value)),
            Self::Float(value) => {
                if !value.is_finite() {
                    return Err(AppError::InvalidArgument(format!(
                        "{field} must be a finite number"
                    )));
                }
                Decimal::from_str(&value.to_string())
            }
        };
        parsed.map_err(|error| AppError::InvalidArgument(format!("{field}: {error}")))
    }
}

struct OhlcvWire<'a> {
    open: &'a WireDecimal,
    high: &'a WireDecimal,
    low: &'a WireDecimal,
    close: &'a WireDecimal,
    volume: &'a WireDecimal,
}

impl OhlcvWire<'_> {
    fn into_candle(self, open_time: i64) -> Result<Candle, AppError> {
        let volume = self.volume.to_decimal("volume")?;
        Ok(Candle {
            open_time,
            open: self.open.to_decimal("open")?,
            high: self.high.to_decimal("high")?,
            low: self.low.to_decimal("low")?,
            close: self.close.to_decimal("close")?,
            volume: volume.max(Decimal::ZERO),
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct CandleRecordWire {
    #[serde(default)]
    pub symbol: Option<String>,
    pub time: i64,
    pub open: WireDecimal,
    pub high: WireDecimal,
    pub low: WireDecimal,
    pub close: WireDecimal,
    pub volume: WireDecimal,
}

impl TryFrom<CandleRecordWire> for CandleUpdate {
    type Error = AppError;

    fn try_from(value: CandleRecordWire) -> Result<Self, Self::Error> {
        let candle = OhlcvWire {
            open: &value.open,
            high: &value.high,
            low: &value.low,
            close: &value.close,
            volume: &value.volume,
        }
        .into_candle(value.time)?;
        Ok(Self {
            symbol: value.symbol,
            candle,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum CandleEnvelopeWire {
    Kline {
        data: CandleRecordWire,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CandleFrameWire {
    Record(CandleRecordWire),
    Envelope(CandleEnvelopeWire),
}

pub fn parse_candle_frame(payload: &mut [u8]) -> Result<Option<CandleUpdate>, AppError> {
    let wire: CandleFrameWire = simd_json::serde::from_slice(payload)?;
    match wire {
        CandleFrameWire::Record(record)
        | CandleFrameWire::Envelope(CandleEnvelopeWire::Kline { data: record }) => {
            record.try_into().map(Some)
        }
        CandleFrameWire::Envelope(CandleEnvelopeWire::Other) => Ok(None),
    }
}

#[derive(Debug, Deserialize)]
pub struct PriceRecordWire {
    #[serde(default)]
    pub symbol: Option<String>,
    pub price: WireDecimal,
}

impl TryFrom<PriceRecordWire> for PriceTick {
    type Error = AppError;

    fn try_from(value: PriceRecordWire) -> Result<Self, Self::Error> {
        let price = value.price.to_decimal("price")?;
        if price <= Decimal::ZERO {
            return Err(AppError::InvalidArgument(
                "price must be positive".to_string(),
            ));
        }
        Ok(Self {
            symbol: value.symbol,
            price,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum PriceEnvelopeWire {
    Price {
        data: PriceRecordWire,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PriceFrameWire {
    Record(PriceRecordWire),
    Envelope(PriceEnvelopeWire),
}

pub fn parse_price_frame(payload: &mut [u8]) -> Result<Option<PriceTick>, AppError> {
    let wire: PriceFrameWire = simd_json::serde::from_slice(payload)?;
    match wire {
        PriceFrameWire::Record(record)
        | PriceFrameWire::Envelope(PriceEnvelopeWire::Price { data: record }) => {
            record.try_into().map(Some)
        }
        PriceFrameWire::Envelope(PriceEnvelopeWire::Other) => Ok(None),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryObjectWire {
    pub open_time: i64,
    pub open: WireDecimal,
    pub high: WireDecimal,
    pub low: WireDecimal,
    pub close: WireDecimal,
    pub volume: WireDecimal,
    #[serde(default)]
    pub close_time: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct KlineRowWire(
    pub i64,
    pub WireDecimal,
    pub WireDecimal,
    pub WireDecimal,
    pub WireDecimal,
    pub WireDecimal,
    pub i64,
    pub IgnoredAny,
    pub IgnoredAny,
    pub IgnoredAny,
    pub IgnoredAny,
    pub IgnoredAny,
);

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum HistoryRecordWire {
    Object(HistoryObjectWire),
    Row(KlineRowWire),
}

impl TryFrom<HistoryRecordWire> for Candle {
    type Error = AppError;

    fn try_from(value: HistoryRecordWire) -> Result<Self, Self::Error> {
        let (open_time_ms, close_time_ms, ohlcv) = match &value {
            HistoryRecordWire::Object(record) => (
                record.open_time,
                record.close_time,
                OhlcvWire {
                    open: &record.open,
                    high: &record.high,
                    low: &record.low,
                    close: &record.close,
                    volume: &record.volume,
                },
            ),
            HistoryRecordWire::Row(row) => (
                row.0,
                Some(row.6),
                OhlcvWire {
                    open: &row.1,
                    high: &row.2,
                    low: &row.3,
                    close: &row.4,
                    volume: &row.5,
                },
            ),
        };

        if let Some(close_time_ms) = close_time_ms {
            if close_time_ms < open_time_ms {
                return Err(AppError::InvalidArgument(format!(
                    "closeTime {close_time_ms} precedes openTime {open_time_ms}"
                )));
            }
        }

        ohlcv.into_candle(open_time_ms.div_euclid(1_000))
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HistoryPayloadWire {
    Envelope { data: Vec<HistoryRecordWire> },
    Rows(Vec<HistoryRecordWire>),
}

pub fn parse_history_payload(payload: &mut [u8]) -> Result<Vec<Candle>, AppError> {
    let wire: HistoryPayloadWire = simd_json::serde::from_slice(payload)?;
    let records = match wire {
        HistoryPayloadWire::Envelope { data } => data,
        HistoryPayloadWire::Rows(rows) => rows,
    };

    let mut candles = Vec::with_capacity(records.len());
    for record in records {
        candles.push(record.try_into()?);
    }
    Ok(candles)
}
