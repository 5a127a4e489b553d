use serde::ser::Serializer;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("request error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("json decode error: {0}")]
    SimdJson(#[from] simd_json::Error),
    #[error("{0} feed was torn down; create a new connection")]
    FeedTornDown(&'static str),
    #[error("market sync service is not running")]
    ServiceStopped,
}

impl serde::Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    NetworkError,
    ParseError,
    EmptyResultError,
    ConnectionError,
    ConnectionClosed,
}

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("history endpoint responded with status {0}")]
    Status(u16),
    #[error("json decode error: {0}")]
    Decode(#[from] simd_json::Error),
    #[error("invalid candle record: {0}")]
    InvalidRecord(String),
    #[error("history response contained no candles")]
    Empty,
}

impl HistoryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Request(_) | Self::Status(_) => ErrorKind::NetworkError,
            Self::Decode(_) | Self::InvalidRecord(_) => ErrorKind::ParseError,
            Self::Empty => ErrorKind::EmptyResultError,
        }
    }
}

impl From<AppError> for HistoryError {
    fn from(value: AppError) -> Self {
        match value {
            AppError::SimdJson(error) => Self::Decode(error),
            other => Self::InvalidRecord(other.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("websocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),
    #[error("feed unavailable: {0}")]
    Unavailable(String),
    #[error("connection closed by peer")]
    Closed,
}

impl FeedError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::WebSocket(_) | Self::Unavailable(_) => ErrorKind::ConnectionError,
            Self::Closed => ErrorKind::ConnectionClosed,
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for FeedError {
    fn from(value: tokio_tungstenite::tungstenite::Error) -> Self {
        match value {
            tokio_tungstenite::tungstenite::Error::ConnectionClosed
            | tokio_tungstenite::tungstenite::Error::AlreadyClosed => Self::Closed,
            other => Self::WebSocket(Box::new(other)),
        }
    }
}
