use crate::error::{AppError, FeedError};
use crate::market::types::ConnectionState;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedFrame {
    Text(String),
    Binary(Vec<u8>),
    Close,
}

pub type FeedStream = BoxStream<'static, Result<FeedFrame, FeedError>>;

#[async_trait]
pub trait FeedConnector: Send + Sync {
    async fn connect(&self, endpoint: &str) -> Result<FeedStream, FeedError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedSignal {
    Dial,
    Established,
    Lost,
    Teardown,
}

pub fn transition(state: ConnectionState, signal: FeedSignal) -> ConnectionState {
    match (state, signal) {
        (_, FeedSignal::Teardown) => ConnectionState::Disconnected,
        (ConnectionState::Disconnected | ConnectionState::Reconnecting, FeedSignal::Dial) => {
            ConnectionState::Connecting
        }
        (ConnectionState::Connecting, FeedSignal::Established) => ConnectionState::Connected,
        (ConnectionState::Connecting | ConnectionState::Connected, FeedSignal::Lost) => {
            ConnectionState::Reconnecting
        }
        (current, _) => current,
    }
}

/// Turns one raw frame into a message. `Ok(None)` marks a well-formed frame
/// with nothing to deliver.
pub type FeedDecoder<T> = fn(&mut [u8]) -> Result<Option<T>, AppError>;

type FeedSink<T> = Arc<dyn Fn(T) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    Started,
    AlreadyActive,
}

pub struct FeedConnection<T> {
    label: &'static str,
    connector: Arc<dyn FeedConnector>,
    decode: FeedDecoder<T>,
    reconnect_delay: Duration,
    state: Arc<watch::Sender<ConnectionState>>,
    cancellation_token: CancellationToken,
    endpoint: Option<String>,
    join_handle: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> FeedConnection<T> {
    pub fn new(
        label: &'static str,
        connector: Arc<dyn FeedConnector>,
        decode: FeedDecoder<T>,
        reconnect_delay: Duration,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            label,
            connector,
            decode,
            reconnect_delay,
            state: Arc::new(state),
            cancellation_token: CancellationToken::new(),
            endpoint: None,
            join_handle: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    pub fn is_torn_down(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    pub fn open<S>(&mut self, endpoint: String, sink: S) -> Result<ConnectOutcome, AppError>
    where
        S: Fn(T) + Send + Sync + 'static,
    {
        if self.is_torn_down() {
            return Err(AppError::FeedTornDown(self.label));
        }
        if let Some(current) = self.endpoint.as_deref() {
            if current == endpoint {
                return Ok(ConnectOutcome::AlreadyActive);
            }
            return Err(AppError::InvalidArgument(format!(
                "{} feed is bound to {current}; disconnect before connecting to {endpoint}",
                self.label
            )));
        }

        self.state
            .send_replace(transition(self.state(), FeedSignal::Dial));

        let task = FeedTask {
            label: self.label,
            endpoint: endpoint.clone(),
            connector: Arc::clone(&self.connector),
            decode: self.decode,
            sink: Arc::new(sink),
            reconnect_delay: self.reconnect_delay,
            state: Arc::clone(&self.state),
            cancel: self.cancellation_token.clone(),
        };
        self.join_handle = Some(tokio::spawn(task.run()));
        self.endpoint = Some(endpoint);
        Ok(ConnectOutcome::Started)
    }

    pub fn close(&mut self) {
        self.cancellation_token.cancel();
        if let Some(handle) = self.join_handle.take() {
            handle.abort();
            debug!(feed = self.label, endpoint = ?self.endpoint, "feed disconnected");
        }
        self.state.send_replace(ConnectionState::Disconnected);
    }
}

impl<T> Drop for FeedConnection<T> {
    fn drop(&mut self) {
        self.cancellation_token.cancel();
        if let Some(handle) = self.join_handle.take() {
            handle.abort();
        }
    }
}

enum PumpExit {
    Cancelled,
    Lost(FeedError),
}

struct FeedTask<T> {
    label: &'static str,
    endpoint: String,
    connector: Arc<dyn FeedConnector>,
    decode: FeedDecoder<T>,
    sink: FeedSink<T>,
    reconnect_delay: Duration,
    state: Arc<watch::Sender<ConnectionState>>,
    cancel: CancellationToken,
}

impl<T: Send + 'static> FeedTask<T> {
    /// Applies a transition unless the connection was torn down; the check
    /// runs under the channel lock so a late signal cannot resurrect it.
    fn signal(&self, signal: FeedSignal) {
        let cancel = &self.cancel;
        self.state.send_if_modified(|current| {
            if cancel.is_cancelled() {
                return false;
            }
            let next = transition(*current, signal);
            if next == *current {
                return false;
            }
            *current = next;
            true
        });
    }

    async fn run(self) {
        let mut attempt = 0_u32;

        loop {
            if attempt > 0 {
                info!(
                    feed = self.label,
                    endpoint = %self.endpoint,
                    attempt,
                    "reconnect attempt"
                );
            }
            self.signal(FeedSignal::Dial);

            let connected = tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = self.connector.connect(&self.endpoint) => result,
            };

            match connected {
                Ok(stream) => {
                    attempt = 0;
                    self.signal(FeedSignal::Established);
                    info!(feed = self.label, endpoint = %self.endpoint, "feed connected");

                    match self.pump(stream).await {
                        PumpExit::Cancelled => break,
                        PumpExit::Lost(error) => warn!(
                            feed = self.label,
                            endpoint = %self.endpoint,
                            kind = ?error.kind(),
                            %error,
                            "feed connection lost"
                        ),
                    }
                }
                Err(error) => warn!(
                    feed = self.label,
                    endpoint = %self.endpoint,
                    kind = ?error.kind(),
                    %error,
                    "feed connect failed"
                ),
            }

            if self.cancel.is_cancelled() {
                break;
            }
            self.signal(FeedSignal::Lost);
            attempt = attempt.saturating_add(1);

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.reconnect_delay) => {}
            }
        }

        debug!(feed = self.label, endpoint = %self.endpoint, "feed task finished");
    }

    async fn pump(&self, mut stream: FeedStream) -> PumpExit {
        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => return PumpExit::Cancelled,
                next = stream.next() => next,
            };

            match next {
                None | Some(Ok(FeedFrame::Close)) => return PumpExit::Lost(FeedError::Closed),
                Some(Err(error)) => return PumpExit::Lost(error),
                Some(Ok(FeedFrame::Text(text))) => self.deliver(text.into_bytes()),
                Some(Ok(FeedFrame::Binary(bytes))) => self.deliver(bytes),
            }
        }
    }

    fn deliver(&self, mut payload: Vec<u8>) {
        match (self.decode)(payload.as_mut_slice()) {
            Ok(Some(message)) => (self.sink)(message),
            Ok(None) => debug!(feed = self.label, "skipping frame without data"),
            Err(error) => warn!(feed = self.label, %error, "dropping malformed frame"),
        }
    }
}
