// Voice endpoint connection.
//
// `Transport` is a cheap handle; a background actor owns the socket, runs
// the `ConnectionMachine` and performs its effects. Inbound frames are parsed
// into `ControlMessage`s and delivered in arrival order on a bounded channel.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{future, Sink, SinkExt, StreamExt};
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Sleep;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};
use url::Url;

use super::messages::{ClientMessage, ControlMessage};
use super::state::{ConnectionMachine, ConnectionState, Effect, ReconnectPolicy, TransportEvent};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Connection settings
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Endpoint base, e.g. `ws://localhost:8000`
    pub base_url: String,
    pub enable_search: bool,
    pub enable_functions: bool,
    pub reconnect: ReconnectPolicy,
    /// Inbound messages buffered ahead of the consumer
    pub inbound_buffer: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            enable_search: false,
            enable_functions: true,
            reconnect: ReconnectPolicy::default(),
            inbound_buffer: 256,
        }
    }
}

impl TransportConfig {
    /// `{base}/ws/audio?enable_search=..&enable_functions=..`
    pub fn endpoint_url(&self) -> Result<Url> {
        let base = self.base_url.trim();
        if base.is_empty() {
            bail!("Voice endpoint URL is not configured");
        }

        let mut url = Url::parse(&format!("{}/ws/audio", base.trim_end_matches('/')))
            .with_context(|| format!("Invalid voice endpoint URL: {}", base))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            bail!("Voice endpoint must use ws:// or wss://, got {}", url.scheme());
        }

        url.query_pairs_mut()
            .append_pair("enable_search", bool_param(self.enable_search))
            .append_pair("enable_functions", bool_param(self.enable_functions));
        Ok(url)
    }
}

fn bool_param(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

pub type FrameSink = Pin<Box<dyn Sink<String, Error = anyhow::Error> + Send>>;
pub type FrameStream = BoxStream<'static, Result<String>>;

/// An open text-frame connection
pub struct Connection {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

/// Opens connections to the voice endpoint
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &Url) -> Result<Connection>;
}

/// WebSocket connector
#[derive(Debug, Default, Clone)]
pub struct TungsteniteConnector;

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, url: &Url) -> Result<Connection> {
        let (ws, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .with_context(|| format!("WebSocket handshake with {} failed", url))?;

        let (sink, stream) = ws.split();

        let sink = sink
            .sink_map_err(anyhow::Error::from)
            .with(|text: String| future::ready(Ok::<_, anyhow::Error>(Message::Text(text.into()))));

        let stream = stream.filter_map(|frame| {
            future::ready(match frame {
                Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => Some(Ok(text)),
                    Err(_) => {
                        warn!("Dropping non-UTF-8 binary frame ({} bytes)", bytes.len());
                        None
                    }
                },
                Ok(_) => None,
                Err(e) => Some(Err(anyhow::Error::from(e))),
            })
        });

        Ok(Connection {
            sink: Box::pin(sink),
            stream: stream.boxed(),
        })
    }
}

enum Command {
    Connect,
    Disconnect,
    MarkRecording,
}

/// Handle to the voice endpoint connection
#[derive(Clone)]
pub struct Transport {
    commands: mpsc::UnboundedSender<Command>,
    outbound: Arc<Mutex<Option<mpsc::UnboundedSender<String>>>>,
    status: watch::Receiver<ConnectionState>,
}

impl Transport {
    /// Start the connection actor. Returns the handle and the inbound message
    /// stream. Nothing connects until `connect` is called.
    pub fn spawn(
        config: TransportConfig,
        connector: Arc<dyn Connector>,
    ) -> (Self, mpsc::Receiver<ControlMessage>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_buffer.max(1));
        let (status_tx, status_rx) = watch::channel(ConnectionState::Disconnected);
        let outbound = Arc::new(Mutex::new(None));

        let actor = TransportActor {
            machine: ConnectionMachine::new(config.reconnect),
            config,
            connector,
            commands: command_rx,
            inbound: inbound_tx,
            status: status_tx,
            outbound: Arc::clone(&outbound),
            sink: None,
            reader: None,
            outgoing: None,
            retry: None,
        };
        tokio::spawn(actor.run());

        (
            Self {
                commands: command_tx,
                outbound,
                status: status_rx,
            },
            inbound_rx,
        )
    }

    /// Open the connection. No-op while connecting or open.
    pub fn connect(&self) {
        let _ = self.commands.send(Command::Connect);
    }

    /// Close the connection and suppress automatic reconnection until the
    /// next `connect`. Idempotent.
    pub fn disconnect(&self) {
        let _ = self.commands.send(Command::Disconnect);
    }

    /// Mark the open connection as carrying captured audio
    pub fn mark_recording(&self) {
        let _ = self.commands.send(Command::MarkRecording);
    }

    /// Queue a message for sending. Returns false (and sends nothing) when the
    /// connection is not open.
    pub fn send(&self, message: &ClientMessage) -> bool {
        if !self.status().is_open() {
            return false;
        }

        let text = match message.to_json() {
            Ok(text) => text,
            Err(e) => {
                error!("{:#}", e);
                return false;
            }
        };

        let Ok(guard) = self.outbound.lock() else {
            return false;
        };
        match guard.as_ref() {
            Some(tx) => tx.send(text).is_ok(),
            None => false,
        }
    }

    pub fn status(&self) -> ConnectionState {
        *self.status.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.status().is_open()
    }

    /// Watch status transitions
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.status.clone()
    }
}

struct TransportActor {
    config: TransportConfig,
    connector: Arc<dyn Connector>,
    machine: ConnectionMachine,
    commands: mpsc::UnboundedReceiver<Command>,
    inbound: mpsc::Sender<ControlMessage>,
    status: watch::Sender<ConnectionState>,
    outbound: Arc<Mutex<Option<mpsc::UnboundedSender<String>>>>,
    sink: Option<FrameSink>,
    reader: Option<FrameStream>,
    outgoing: Option<mpsc::UnboundedReceiver<String>>,
    retry: Option<Pin<Box<Sleep>>>,
}

impl TransportActor {
    async fn run(mut self) {
        debug!("Transport actor started");

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Connect) => self.apply(TransportEvent::ConnectRequested).await,
                    Some(Command::Disconnect) => self.apply(TransportEvent::DisconnectRequested).await,
                    Some(Command::MarkRecording) => self.apply(TransportEvent::RecordingStarted).await,
                    None => break,
                },
                frame = next_frame(&mut self.reader) => self.on_frame(frame).await,
                text = next_outgoing(&mut self.outgoing) => {
                    if let Some(text) = text {
                        self.write(text).await;
                    }
                }
                _ = retry_elapsed(&mut self.retry) => {
                    self.retry = None;
                    self.apply(TransportEvent::RetryElapsed).await;
                }
            }
        }

        // Every handle is gone
        self.apply(TransportEvent::DisconnectRequested).await;
        debug!("Transport actor stopped");
    }

    async fn apply(&mut self, event: TransportEvent) {
        let mut pending = VecDeque::from([event]);

        while let Some(event) = pending.pop_front() {
            let before = self.machine.state();
            let effects = self.machine.handle(event);
            let after = self.machine.state();

            if before != after {
                debug!("Transport {} -> {} on {:?}", before, after, event);
                self.status.send_replace(after);
            }

            for effect in effects {
                pending.extend(self.perform(effect).await);
            }
        }
    }

    async fn perform(&mut self, effect: Effect) -> Vec<TransportEvent> {
        match effect {
            Effect::OpenSocket => self.open_socket().await,
            Effect::CloseSocket => {
                self.close_socket().await;
                Vec::new()
            }
            Effect::ScheduleRetry { attempt, delay } => {
                info!(
                    "Reconnecting in {:?} (attempt {}/{})",
                    delay, attempt, self.config.reconnect.max_attempts
                );
                self.retry = Some(Box::pin(tokio::time::sleep(delay)));
                Vec::new()
            }
            Effect::CancelRetry => {
                self.retry = None;
                Vec::new()
            }
        }
    }

    /// Events produced by one connection attempt, in order. A refused
    /// handshake errors and then closes, like any failed socket.
    async fn open_socket(&mut self) -> Vec<TransportEvent> {
        let url = match self.config.endpoint_url() {
            Ok(url) => url,
            Err(e) => {
                error!("{:#}", e);
                return vec![TransportEvent::OpenFailed];
            }
        };

        info!("Connecting to {}", url);
        let connector = Arc::clone(&self.connector);
        let handshake = tokio::time::timeout(HANDSHAKE_TIMEOUT, connector.connect(&url));
        tokio::pin!(handshake);

        // Only a disconnect can interrupt the handshake; other commands are
        // meaningless until it resolves.
        let result = loop {
            tokio::select! {
                result = &mut handshake => break result,
                command = self.commands.recv() => match command {
                    Some(Command::Disconnect) | None => {
                        info!("Connection attempt cancelled");
                        return vec![TransportEvent::DisconnectRequested];
                    }
                    Some(Command::Connect) | Some(Command::MarkRecording) => {}
                },
            }
        };

        let connection = match result {
            Ok(Ok(connection)) => connection,
            Ok(Err(e)) => {
                warn!("Connection failed: {:#}", e);
                return vec![TransportEvent::OpenFailed, TransportEvent::Closed];
            }
            Err(_) => {
                warn!("Connection handshake timed out after {:?}", HANDSHAKE_TIMEOUT);
                return vec![TransportEvent::OpenFailed, TransportEvent::Closed];
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        self.sink = Some(connection.sink);
        self.reader = Some(connection.stream);
        self.outgoing = Some(rx);
        if let Ok(mut slot) = self.outbound.lock() {
            *slot = Some(tx);
        }

        info!("Connected to voice endpoint");
        vec![TransportEvent::Opened]
    }

    /// Flush queued outgoing messages, then close and forget the socket
    async fn close_socket(&mut self) {
        if let Ok(mut slot) = self.outbound.lock() {
            slot.take();
        }
        self.reader = None;

        let outgoing = self.outgoing.take();
        let Some(mut sink) = self.sink.take() else {
            return;
        };

        let flush = async {
            if let Some(mut rx) = outgoing {
                while let Ok(text) = rx.try_recv() {
                    sink.send(text).await?;
                }
            }
            sink.close().await
        };

        match tokio::time::timeout(CLOSE_TIMEOUT, flush).await {
            Ok(Ok(())) => debug!("Connection closed"),
            Ok(Err(e)) => debug!("Error while closing connection: {:#}", e),
            Err(_) => debug!("Connection close timed out"),
        }
    }

    /// Drop the socket after the peer or the network ended it
    fn discard_socket(&mut self) {
        if let Ok(mut slot) = self.outbound.lock() {
            slot.take();
        }
        self.reader = None;
        self.outgoing = None;
        self.sink = None;
    }

    async fn on_frame(&mut self, frame: Option<Result<String>>) {
        match frame {
            Some(Ok(text)) => match ControlMessage::parse(&text) {
                Ok(message) => {
                    if self.inbound.send(message).await.is_err() {
                        debug!("Inbound receiver dropped; discarding message");
                    }
                }
                Err(e) => warn!("{:#}: {}", e, truncate(&text, 120)),
            },
            Some(Err(e)) => {
                error!("Connection error: {:#}", e);
                self.discard_socket();
                self.apply(TransportEvent::SocketError).await;
                self.apply(TransportEvent::Closed).await;
            }
            None => {
                info!("Connection closed by peer");
                self.discard_socket();
                self.apply(TransportEvent::Closed).await;
            }
        }
    }

    async fn write(&mut self, text: String) {
        let Some(sink) = self.sink.as_mut() else {
            return;
        };
        if let Err(e) = sink.send(text).await {
            error!("Failed to send message: {:#}", e);
            self.discard_socket();
            self.apply(TransportEvent::SocketError).await;
            self.apply(TransportEvent::Closed).await;
        }
    }
}

async fn next_frame(reader: &mut Option<FrameStream>) -> Option<Result<String>> {
    match reader {
        Some(stream) => stream.next().await,
        None => future::pending().await,
    }
}

async fn next_outgoing(outgoing: &mut Option<mpsc::UnboundedReceiver<String>>) -> Option<String> {
    match outgoing {
        Some(rx) => rx.recv().await,
        None => future::pending().await,
    }
}

async fn retry_elapsed(retry: &mut Option<Pin<Box<Sleep>>>) {
    match retry {
        Some(sleep) => sleep.as_mut().await,
        None => future::pending().await,
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("status", &self.status())
            .finish()
    }
}
