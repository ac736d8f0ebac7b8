//! Websocket connection transport.
//!
//! One [`WsConnector::open`] call yields one connection to one GPU instance.
//! The returned event stream drives the socket: it connects, emits `Open`
//! (or `Error`), forwards text frames as `Message`, and ends with `Close`.
//! Outbound messages are handed to the stream through an unbounded channel,
//! so [`Transport::send`] never blocks; they only flow while the stream is
//! being polled.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, Stream, StreamExt};
use pearl_protocol::{
    ClientMessage, Connection, Connector, Transport, TransportError, TransportEvent,
};
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at, timeout};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

/// Websocket transport configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub endpoint: Url,
    pub connect_timeout: Duration,
    /// Send `ping#<n>` text frames at this interval.
    pub keepalive: Option<Duration>,
}

impl TransportConfig {
    pub fn new(endpoint: &str) -> Result<Self, TransportError> {
        let endpoint =
            Url::parse(endpoint).map_err(|error| TransportError::InvalidUrl(error.to_string()))?;
        if endpoint.scheme() != "ws" && endpoint.scheme() != "wss" {
            return Err(TransportError::InvalidUrl(format!(
                "URL must use ws:// or wss:// scheme, got: {}",
                endpoint.scheme()
            )));
        }
        Ok(Self {
            endpoint,
            connect_timeout: Duration::from_secs(10),
            keepalive: None,
        })
    }

    pub fn connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn keepalive(mut self, every: Option<Duration>) -> Self {
        self.keepalive = every;
        self
    }

    /// Endpoint with the instance token as query parameter.
    pub fn url_for(&self, token: &str) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut().append_pair("token", token);
        url
    }
}

#[derive(Debug, Clone)]
pub struct WsConnector {
    config: TransportConfig,
}

impl WsConnector {
    pub fn new(config: TransportConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn open(&self, token: &str) -> Result<Connection, TransportError> {
        let url = self.config.url_for(token);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let link = Arc::new(Link::default());
        let transport = WsTransport {
            outbound: outbound_tx,
            link: Arc::clone(&link),
        };
        debug!(endpoint = %self.config.endpoint, "opening instance websocket");
        let events = connection_events(url, self.config.clone(), outbound_rx, link).boxed();
        Ok(Connection {
            transport: Arc::new(transport),
            events,
        })
    }
}

#[derive(Debug, Default)]
struct Link {
    connected: AtomicBool,
    closed: AtomicBool,
}

struct WsTransport {
    outbound: mpsc::UnboundedSender<Message>,
    link: Arc<Link>,
}

impl Transport for WsTransport {
    fn send(&self, message: &ClientMessage) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let text = message
            .to_json()
            .map_err(|error| TransportError::Serialization(error.to_string()))?;
        self.outbound
            .send(Message::Text(text.into()))
            .map_err(|_| TransportError::NotConnected)
    }

    fn is_connected(&self) -> bool {
        self.link.connected.load(Ordering::Acquire) && !self.link.closed.load(Ordering::Acquire)
    }

    fn close(&self) {
        if self.link.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.outbound.send(Message::Close(None));
    }
}

enum Step {
    Outgoing(Option<Message>),
    Incoming(Option<Result<Message, tokio_tungstenite::tungstenite::Error>>),
    Keepalive,
}

fn connection_events(
    url: Url,
    config: TransportConfig,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    link: Arc<Link>,
) -> impl Stream<Item = TransportEvent> + Send + 'static {
    async_stream::stream! {
        let socket = match timeout(config.connect_timeout, connect_async(url.as_str())).await {
            Ok(Ok((socket, _response))) => socket,
            Ok(Err(error)) => {
                warn!(%error, "websocket connect failed");
                yield TransportEvent::Error(error.to_string());
                yield TransportEvent::Close;
                return;
            }
            Err(_) => {
                warn!(timeout = ?config.connect_timeout, "websocket connect timed out");
                yield TransportEvent::Error(format!(
                    "connection timeout after {:?}",
                    config.connect_timeout
                ));
                yield TransportEvent::Close;
                return;
            }
        };

        if link.closed.load(Ordering::Acquire) {
            let mut socket = socket;
            let _ = socket.close(None).await;
            yield TransportEvent::Close;
            return;
        }

        link.connected.store(true, Ordering::Release);
        info!(endpoint = %config.endpoint, "instance websocket open");
        yield TransportEvent::Open;

        let (mut writer, mut reader) = socket.split();
        let mut keepalive = config.keepalive.map(|every| {
            let mut interval = interval_at(Instant::now() + every, every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval
        });
        let mut ping_sequence = 0_u64;

        loop {
            let step = tokio::select! {
                frame = outbound.recv() => Step::Outgoing(frame),
                frame = reader.next() => Step::Incoming(frame),
                _ = next_tick(&mut keepalive) => Step::Keepalive,
            };

            match step {
                Step::Outgoing(Some(frame)) => {
                    let closing = matches!(frame, Message::Close(_));
                    if let Err(error) = writer.send(frame).await {
                        warn!(%error, "websocket write failed");
                        yield TransportEvent::Error(error.to_string());
                        break;
                    }
                    if closing {
                        break;
                    }
                }
                Step::Outgoing(None) => break,
                Step::Incoming(Some(Ok(Message::Text(text)))) => {
                    let text = text.to_string();
                    if text.starts_with("pong#") {
                        debug!(%text, "keepalive reply");
                    } else {
                        yield TransportEvent::Message(text);
                    }
                }
                Step::Incoming(Some(Ok(Message::Close(_)))) | Step::Incoming(None) => break,
                Step::Incoming(Some(Ok(_))) => {}
                Step::Incoming(Some(Err(error))) => {
                    warn!(%error, "websocket read failed");
                    yield TransportEvent::Error(error.to_string());
                    break;
                }
                Step::Keepalive => {
                    ping_sequence += 1;
                    let ping = Message::Text(format!("ping#{ping_sequence}").into());
                    if let Err(error) = writer.send(ping).await {
                        warn!(%error, "keepalive ping failed");
                        yield TransportEvent::Error(error.to_string());
                        break;
                    }
                }
            }
        }

        link.connected.store(false, Ordering::Release);
        info!(endpoint = %config.endpoint, "instance websocket closed");
        yield TransportEvent::Close;
    }
}

async fn next_tick(keepalive: &mut Option<Interval>) {
    match keepalive {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
