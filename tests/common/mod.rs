// Shared fixtures for integration tests: an in-memory endpoint, a scripted
// capture device and a manual-clock output.

#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use futures::channel::mpsc as fmpsc;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use url::Url;
use voice_call::audio::{AudioBackend, AudioChunk, AudioFrame, BackendOpener};
use voice_call::call::{CallComponents, CallConfig, CallHandle, CallSnapshot, VoiceCall};
use voice_call::capture::CaptureConfig;
use voice_call::playback::{
    AudioOutput, OutputOpener, PlaybackConfig, UnitId, VirtualClock, VirtualOutput,
};
use voice_call::transport::{Connection, Connector, ReconnectPolicy, TransportConfig};

pub const TEST_URL: &str = "ws://voice.test";

// ============================================================================
// Endpoint
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Accept,
    Refuse,
}

/// Server side of one accepted connection
pub struct ServerEnd {
    pub url: Url,
    from_client: fmpsc::UnboundedReceiver<String>,
    to_client: fmpsc::UnboundedSender<Result<String>>,
}

impl ServerEnd {
    /// Next message from the client, or None once it closed
    pub async fn recv(&mut self) -> Option<Value> {
        let text = tokio::time::timeout(Duration::from_secs(30), self.from_client.next())
            .await
            .ok()??;
        Some(serde_json::from_str(&text).expect("client sent invalid JSON"))
    }

    pub fn send(&self, message: Value) {
        self.send_raw(message.to_string());
    }

    pub fn send_raw(&self, text: impl Into<String>) {
        let _ = self.to_client.unbounded_send(Ok(text.into()));
    }

    pub fn send_audio(&self, samples: &[f32]) {
        let chunk = AudioChunk::from_samples(samples);
        self.send(serde_json::json!({"type": "audio", "data": chunk.to_base64()}));
    }

    /// Fail the socket from the server side
    pub fn fail(&self) {
        let _ = self
            .to_client
            .unbounded_send(Err(anyhow::anyhow!("connection reset")));
    }
}

/// In-memory connector; follows its script, then `fallback`
pub struct ScriptedConnector {
    script: Mutex<VecDeque<Outcome>>,
    fallback: Outcome,
    attempts: AtomicUsize,
    accepted: mpsc::UnboundedSender<ServerEnd>,
}

impl ScriptedConnector {
    pub fn new(
        script: impl IntoIterator<Item = Outcome>,
        fallback: Outcome,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<ServerEnd>) {
        let (accepted, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                script: Mutex::new(script.into_iter().collect()),
                fallback,
                attempts: AtomicUsize::new(0),
                accepted,
            }),
            rx,
        )
    }

    pub fn accepting() -> (Arc<Self>, mpsc::UnboundedReceiver<ServerEnd>) {
        Self::new([], Outcome::Accept)
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, url: &Url) -> Result<Connection> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.fallback);

        if outcome == Outcome::Refuse {
            bail!("connection refused");
        }

        let (client_tx, from_client) = fmpsc::unbounded::<String>();
        let (to_client, client_rx) = fmpsc::unbounded::<Result<String>>();
        let _ = self.accepted.send(ServerEnd {
            url: url.clone(),
            from_client,
            to_client,
        });

        Ok(Connection {
            sink: Box::pin(client_tx.sink_map_err(anyhow::Error::from)),
            stream: client_rx.boxed(),
        })
    }
}

pub fn transport_config() -> TransportConfig {
    TransportConfig {
        base_url: TEST_URL.to_string(),
        reconnect: ReconnectPolicy::default(),
        ..Default::default()
    }
}

// ============================================================================
// Capture
// ============================================================================

/// Capture device that delivers a fixed list of frames, then stays open
pub struct ScriptedBackend {
    frames: Vec<AudioFrame>,
    task: Option<tokio::task::JoinHandle<()>>,
}

#[async_trait]
impl AudioBackend for ScriptedBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        let (tx, rx) = mpsc::channel(64);
        let frames = std::mem::take(&mut self.frames);
        self.task = Some(tokio::spawn(async move {
            for frame in frames {
                if tx.send(frame).await.is_err() {
                    return;
                }
            }
            std::future::pending::<()>().await;
        }));
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.task.is_some()
    }

    fn name(&self) -> &str {
        "scripted input"
    }
}

/// Opener whose backends each deliver `windows` full 4096-sample windows at 16kHz
pub fn scripted_capture(windows: usize) -> BackendOpener {
    Arc::new(move || -> Result<Box<dyn AudioBackend>> {
        let frames = (0..windows)
            .map(|i| AudioFrame {
                samples: vec![0.25; 4096],
                sample_rate: 16000,
                channels: 1,
                timestamp_ms: i as u64 * 256,
            })
            .collect();
        Ok(Box::new(ScriptedBackend { frames, task: None }))
    })
}

/// Opener that behaves like a denied microphone
pub fn denied_capture() -> BackendOpener {
    Arc::new(|| -> Result<Box<dyn AudioBackend>> { bail!("microphone access denied") })
}

// ============================================================================
// Output
// ============================================================================

/// Opener handing out manual-clock outputs; the latest clock is kept in the slot
pub fn manual_output() -> (OutputOpener, Arc<Mutex<Option<VirtualClock>>>) {
    let slot: Arc<Mutex<Option<VirtualClock>>> = Arc::new(Mutex::new(None));
    let opener_slot = Arc::clone(&slot);
    let opener: OutputOpener = Arc::new(
        move |finished_tx: mpsc::UnboundedSender<UnitId>| -> Result<Box<dyn AudioOutput>> {
            let (output, clock) = VirtualOutput::manual(finished_tx);
            *opener_slot.lock().unwrap() = Some(clock);
            Ok(Box::new(output))
        },
    );
    (opener, slot)
}

pub fn clock_of(slot: &Arc<Mutex<Option<VirtualClock>>>) -> VirtualClock {
    slot.lock().unwrap().clone().expect("no output opened yet")
}

// ============================================================================
// Call
// ============================================================================

pub struct TestCall {
    pub call: CallHandle,
    pub connector: Arc<ScriptedConnector>,
    pub servers: mpsc::UnboundedReceiver<ServerEnd>,
    pub clock: Arc<Mutex<Option<VirtualClock>>>,
}

impl TestCall {
    pub fn spawn(config: CallConfig, capture: BackendOpener) -> Self {
        let (output_opener, clock) = manual_output();
        Self::spawn_with_output(config, capture, output_opener, clock)
    }

    /// Like `spawn` with a caller-supplied output; `clock` is only filled if
    /// that opener fills it
    pub fn spawn_with_output(
        config: CallConfig,
        capture: BackendOpener,
        output_opener: OutputOpener,
        clock: Arc<Mutex<Option<VirtualClock>>>,
    ) -> Self {
        let (connector, servers) = ScriptedConnector::accepting();

        let call = VoiceCall::spawn(
            config,
            CallComponents {
                transport: transport_config(),
                connector: connector.clone(),
                capture: CaptureConfig::default(),
                capture_opener: capture,
                playback: PlaybackConfig::default(),
                output_opener,
                transcript_sink: None,
            },
        );

        Self {
            call,
            connector,
            servers,
            clock,
        }
    }

    pub async fn next_server(&mut self) -> ServerEnd {
        tokio::time::timeout(Duration::from_secs(30), self.servers.recv())
            .await
            .expect("no connection attempt")
            .expect("connector dropped")
    }

    pub fn clock(&self) -> VirtualClock {
        clock_of(&self.clock)
    }

    pub async fn wait_for(&self, what: &str, f: impl FnMut(&CallSnapshot) -> bool) -> CallSnapshot {
        wait_for_snapshot(self.call.subscribe(), what, f).await
    }
}

pub async fn wait_for_snapshot(
    mut rx: watch::Receiver<CallSnapshot>,
    what: &str,
    f: impl FnMut(&CallSnapshot) -> bool,
) -> CallSnapshot {
    let result = tokio::time::timeout(Duration::from_secs(30), rx.wait_for(f))
        .await
        .map(|r| r.map(|snapshot| (*snapshot).clone()));
    match result {
        Ok(Ok(snapshot)) => snapshot,
        _ => panic!("timed out waiting for {}: {:?}", what, *rx.borrow()),
    }
}

/// Poll until `f` holds, letting other tasks run
pub async fn eventually(what: &str, mut f: impl FnMut() -> bool) {
    for _ in 0..500 {
        if f() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}

/// `seconds` of a constant tone at the 24kHz playback rate
pub fn response_audio(seconds: f64) -> Vec<f32> {
    vec![0.1; (24000.0 * seconds).round() as usize]
}
