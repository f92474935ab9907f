// Call orchestrator.
//
// One actor task owns the transport handle, the capture encoder, the
// playback scheduler and the speaker indicator. Everything reaches it as
// a message (user commands, inbound control messages, captured chunks,
// transport status, unit completions, the UI tick), so no component is
// touched from two places at once. The UI surface reads `CallSnapshot`s
// from a watch channel.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use futures::future;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::speaker::{Speaker, SpeakerTracker};
use super::transcript::{Transcript, TranscriptEntry, TranscriptRole, TranscriptSink};
use crate::audio::{AudioChunk, BackendOpener};
use crate::capture::{CaptureConfig, CaptureEncoder};
use crate::playback::{OutputOpener, PlaybackConfig, PlaybackScheduler, PlaybackStats, UnitId};
use crate::transport::{
    ClientMessage, ConnectionState, Connector, ControlMessage, Transport, TransportConfig,
};

/// Orchestrator settings
#[derive(Debug, Clone)]
pub struct CallConfig {
    pub speaker_debounce: Duration,
    /// Interval for elapsed-time and speaker refresh
    pub tick: Duration,
    /// Whether the mute toggle gates sending
    pub mute_enabled: bool,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            speaker_debounce: Duration::from_millis(500),
            tick: Duration::from_millis(50),
            mute_enabled: false,
        }
    }
}

/// Everything a call needs from the outside world
pub struct CallComponents {
    pub transport: TransportConfig,
    pub connector: Arc<dyn Connector>,
    pub capture: CaptureConfig,
    pub capture_opener: BackendOpener,
    pub playback: PlaybackConfig,
    pub output_opener: OutputOpener,
    pub transcript_sink: Option<Arc<dyn TranscriptSink>>,
}

/// Orchestrator lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallPhase {
    Idle,
    Connecting,
    Connected,
    Recording,
    /// Open, but the connection dropped and did not come back
    Disconnected,
    Error,
    Ended,
}

impl CallPhase {
    fn from_status(status: ConnectionState) -> Self {
        match status {
            ConnectionState::Disconnected => CallPhase::Disconnected,
            ConnectionState::Connecting => CallPhase::Connecting,
            ConnectionState::Connected => CallPhase::Connected,
            ConnectionState::Recording => CallPhase::Recording,
            ConnectionState::Error => CallPhase::Error,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallCounters {
    pub chunks_sent: u64,
    pub chunks_received: u64,
    /// Inbound chunks shed by the playback queue
    pub chunks_dropped: u64,
    pub decode_failures: u64,
    pub interruptions: u64,
    pub turns_completed: u64,
}

/// What the presentation layer shows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallSnapshot {
    pub phase: CallPhase,
    pub status: ConnectionState,
    pub status_text: String,
    pub is_open: bool,
    pub call_id: Option<Uuid>,
    pub started_at: Option<DateTime<Utc>>,
    pub elapsed_secs: u64,
    /// `mm:ss`
    pub elapsed: String,
    pub speaker: Option<Speaker>,
    pub muted: bool,
    pub is_playing: bool,
    pub is_capturing: bool,
    pub available_functions: Vec<String>,
    pub last_error: Option<String>,
    pub counters: CallCounters,
}

impl Default for CallSnapshot {
    fn default() -> Self {
        Self {
            phase: CallPhase::Idle,
            status: ConnectionState::Disconnected,
            status_text: ConnectionState::Disconnected.status_text().to_string(),
            is_open: false,
            call_id: None,
            started_at: None,
            elapsed_secs: 0,
            elapsed: format_elapsed(0),
            speaker: None,
            muted: false,
            is_playing: false,
            is_capturing: false,
            available_functions: Vec::new(),
            last_error: None,
            counters: CallCounters::default(),
        }
    }
}

pub fn format_elapsed(secs: u64) -> String {
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

enum CallCommand {
    Open(oneshot::Sender<CallSnapshot>),
    End(oneshot::Sender<CallSnapshot>),
    ToggleMute(oneshot::Sender<bool>),
    SendText(String, oneshot::Sender<bool>),
    Transcript(oneshot::Sender<Vec<TranscriptEntry>>),
}

/// Handle to a running call orchestrator
#[derive(Clone)]
pub struct CallHandle {
    commands: mpsc::Sender<CallCommand>,
    snapshot: watch::Receiver<CallSnapshot>,
}

impl CallHandle {
    /// Open the call: acquire the output, connect, and start capture once
    /// connected. Idempotent while open.
    pub async fn open(&self) -> Result<CallSnapshot> {
        self.request(CallCommand::Open).await
    }

    /// Tear the call down. Idempotent while closed.
    pub async fn end(&self) -> Result<CallSnapshot> {
        self.request(CallCommand::End).await
    }

    /// Returns the resulting mute flag
    pub async fn toggle_mute(&self) -> Result<bool> {
        self.request(CallCommand::ToggleMute).await
    }

    /// Send a typed message to the endpoint; false when not connected
    pub async fn send_text(&self, text: impl Into<String>) -> Result<bool> {
        let text = text.into();
        self.request(|tx| CallCommand::SendText(text, tx)).await
    }

    pub async fn transcript(&self) -> Result<Vec<TranscriptEntry>> {
        self.request(CallCommand::Transcript).await
    }

    pub fn snapshot(&self) -> CallSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CallSnapshot> {
        self.snapshot.clone()
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> CallCommand) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| anyhow!("Call orchestrator has stopped"))?;
        rx.await.map_err(|_| anyhow!("Call orchestrator dropped the request"))
    }
}

/// The call orchestrator
pub struct VoiceCall;

impl VoiceCall {
    /// Start the orchestrator task. The call stays idle until `open`.
    pub fn spawn(config: CallConfig, components: CallComponents) -> CallHandle {
        let (command_tx, command_rx) = mpsc::channel(32);
        let (snapshot_tx, snapshot_rx) = watch::channel(CallSnapshot::default());

        let (transport, inbound) = Transport::spawn(components.transport, components.connector);
        let (capture, captured) = CaptureEncoder::new(components.capture, components.capture_opener);

        let actor = CallActor {
            speaker: SpeakerTracker::new(config.speaker_debounce),
            config,
            commands: command_rx,
            snapshot: snapshot_tx,
            status: transport.subscribe(),
            transport,
            inbound,
            capture,
            captured,
            playback_config: components.playback,
            output_opener: components.output_opener,
            playback: None,
            finished: None,
            transcript: Transcript::new(components.transcript_sink),
            open: false,
            closed_phase: CallPhase::Idle,
            muted: false,
            call_id: None,
            started_at: None,
            started: None,
            counters: CallCounters::default(),
            playback_stats: PlaybackStats::default(),
            available_functions: Vec::new(),
            last_error: None,
        };
        tokio::spawn(actor.run());

        CallHandle {
            commands: command_tx,
            snapshot: snapshot_rx,
        }
    }
}

struct CallActor {
    config: CallConfig,
    commands: mpsc::Receiver<CallCommand>,
    snapshot: watch::Sender<CallSnapshot>,

    transport: Transport,
    status: watch::Receiver<ConnectionState>,
    inbound: mpsc::Receiver<ControlMessage>,

    capture: CaptureEncoder,
    captured: mpsc::Receiver<AudioChunk>,

    playback_config: PlaybackConfig,
    output_opener: OutputOpener,
    playback: Option<PlaybackScheduler>,
    finished: Option<mpsc::UnboundedReceiver<UnitId>>,

    speaker: SpeakerTracker,
    transcript: Transcript,

    open: bool,
    /// Phase reported while not open
    closed_phase: CallPhase,
    muted: bool,
    call_id: Option<Uuid>,
    started_at: Option<DateTime<Utc>>,
    started: Option<Instant>,
    counters: CallCounters,
    playback_stats: PlaybackStats,
    available_functions: Vec<String>,
    last_error: Option<String>,
}

impl CallActor {
    async fn run(mut self) {
        debug!("Call orchestrator started");

        let mut tick = tokio::time::interval(self.config.tick);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.on_command(command).await,
                    None => break,
                },
                Some(message) = self.inbound.recv() => {
                    self.on_message(message);
                    while let Ok(message) = self.inbound.try_recv() {
                        self.on_message(message);
                    }
                    if let Some(playback) = self.playback.as_mut() {
                        playback.process_queue();
                    }
                }
                Some(chunk) = self.captured.recv() => self.on_captured(chunk),
                changed = self.status.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let status = *self.status.borrow_and_update();
                    self.on_status(status).await;
                }
                id = next_finished(&mut self.finished) => match id {
                    Some(id) => self.on_unit_finished(id),
                    None => self.finished = None,
                },
                _ = tick.tick() => {}
            }

            self.publish();
        }

        if self.open {
            self.end_call().await;
        }
        debug!("Call orchestrator stopped");
    }

    async fn on_command(&mut self, command: CallCommand) {
        match command {
            CallCommand::Open(reply) => {
                self.open_call().await;
                self.publish();
                let _ = reply.send(self.snapshot.borrow().clone());
            }
            CallCommand::End(reply) => {
                self.end_call().await;
                self.publish();
                let _ = reply.send(self.snapshot.borrow().clone());
            }
            CallCommand::ToggleMute(reply) => {
                if self.config.mute_enabled {
                    self.muted = !self.muted;
                    info!("Microphone {}", if self.muted { "muted" } else { "unmuted" });
                } else {
                    debug!("Mute toggle ignored; mute is disabled");
                }
                let _ = reply.send(self.muted);
            }
            CallCommand::SendText(text, reply) => {
                let sent = self.open
                    && self.transport.send(&ClientMessage::Text { data: text.clone() });
                if sent {
                    self.record(TranscriptRole::User, text);
                }
                let _ = reply.send(sent);
            }
            CallCommand::Transcript(reply) => {
                let _ = reply.send(self.transcript.entries().to_vec());
            }
        }
    }

    async fn open_call(&mut self) {
        if self.open {
            debug!("Call already open");
            return;
        }

        // Acquiring a device blocks until its thread reports ready
        let (finished_tx, finished_rx) = mpsc::unbounded_channel();
        let opener = Arc::clone(&self.output_opener);
        let opened = tokio::task::spawn_blocking(move || opener(finished_tx))
            .await
            .unwrap_or_else(|e| Err(anyhow!("Audio output task failed: {}", e)));
        let output = match opened {
            Ok(output) => output,
            Err(e) => {
                error!("Failed to open audio output: {:#}", e);
                self.last_error = Some(format!("Audio output unavailable: {}", e));
                self.closed_phase = CallPhase::Error;
                return;
            }
        };

        let call_id = Uuid::new_v4();
        info!("Opening call {}", call_id);

        self.playback = Some(PlaybackScheduler::new(self.playback_config.clone(), output));
        self.finished = Some(finished_rx);
        self.open = true;
        self.muted = false;
        self.call_id = Some(call_id);
        self.started_at = None;
        self.started = None;
        self.counters = CallCounters::default();
        self.playback_stats = PlaybackStats::default();
        self.available_functions.clear();
        self.last_error = None;
        self.transcript.reset();
        self.speaker.clear();

        self.transport.connect();
    }

    async fn end_call(&mut self) {
        if !self.open {
            debug!("Call already ended");
            return;
        }

        info!(
            "Ending call {}",
            self.call_id.map(|id| id.to_string()).unwrap_or_default()
        );

        self.capture.stop_recording().await;

        if let Some(mut playback) = self.playback.take() {
            playback.stop();
            self.playback_stats = playback.stats();
            // Releasing a device joins its thread
            let release = tokio::task::spawn_blocking(move || drop(playback));
            if let Err(e) = release.await {
                warn!("Audio output release failed: {}", e);
            }
        }
        self.finished = None;

        if !self.transport.send(&ClientMessage::Stop) {
            debug!("Stop message not sent; connection is not open");
        }
        self.transport.disconnect();

        self.open = false;
        self.closed_phase = CallPhase::Ended;
        self.started_at = None;
        self.started = None;
        self.muted = false;
        self.speaker.clear();
    }

    async fn on_status(&mut self, status: ConnectionState) {
        debug!("Transport status: {}", status);
        if !self.open || status != ConnectionState::Connected {
            return;
        }

        if self.capture.is_recording() {
            // Reconnected underneath a running capture
            self.transport.mark_recording();
            return;
        }

        if self.capture.start_recording().await {
            self.transport.mark_recording();
            if self.started.is_none() {
                self.started = Some(Instant::now());
                self.started_at = Some(Utc::now());
            }
        } else {
            warn!("Microphone unavailable; staying connected without capture");
            self.last_error =
                Some("Could not access microphone. Please check permissions.".to_string());
        }
    }

    fn on_captured(&mut self, chunk: AudioChunk) {
        if !self.open {
            return;
        }
        if self.config.mute_enabled && self.muted {
            return;
        }

        let message = ClientMessage::Audio {
            data: chunk.to_base64(),
        };
        if self.transport.send(&message) {
            self.counters.chunks_sent += 1;
        } else {
            debug!("Captured chunk not sent; connection is not open");
        }
    }

    fn on_message(&mut self, message: ControlMessage) {
        debug!("Received {} message", message.kind());

        match message {
            ControlMessage::Ready { features } => {
                self.available_functions = features
                    .map(|f| f.available_functions)
                    .unwrap_or_default();
                info!(
                    "Voice endpoint ready ({} functions available)",
                    self.available_functions.len()
                );
            }
            ControlMessage::Audio { data } => {
                let Some(playback) = self.playback.as_mut() else {
                    debug!("Audio received with no call open; discarding");
                    return;
                };
                match AudioChunk::from_base64(&data) {
                    Ok(chunk) => {
                        self.counters.chunks_received += 1;
                        playback.enqueue(chunk);
                    }
                    Err(e) => {
                        self.counters.decode_failures += 1;
                        warn!("Error processing audio: {:#}", e);
                    }
                }
            }
            ControlMessage::Text { data } => self.record(TranscriptRole::Assistant, data),
            ControlMessage::Interrupted { message } => {
                info!(
                    "Response interrupted{}",
                    message.map(|m| format!(": {}", m)).unwrap_or_default()
                );
                if let Some(playback) = self.playback.as_mut() {
                    playback.stop();
                }
                self.speaker.clear();
                self.counters.interruptions += 1;
            }
            ControlMessage::TurnComplete => {
                if let Some(playback) = self.playback.as_mut() {
                    playback.resume();
                }
                self.counters.turns_completed += 1;
            }
            ControlMessage::ToolCall {
                function_name,
                arguments,
            } => {
                info!("Function call: {}", function_name);
                self.record(TranscriptRole::Tool, format!("{}({})", function_name, arguments));
            }
            ControlMessage::ToolResult {
                function_name,
                result,
            } => {
                self.record(TranscriptRole::Tool, format!("{} -> {}", function_name, result));
            }
            ControlMessage::SearchCode { code } => self.record(TranscriptRole::Tool, code),
            ControlMessage::SearchResult { output } => self.record(TranscriptRole::Tool, output),
            ControlMessage::Error { data } => {
                error!("Voice endpoint error: {}", data);
                self.last_error = Some(data);
            }
        }
    }

    fn on_unit_finished(&mut self, id: UnitId) {
        if let Some(playback) = self.playback.as_mut() {
            if playback.unit_finished(id) {
                debug!("Playback drained");
            }
        }
    }

    fn record(&mut self, role: TranscriptRole, text: String) {
        let Some(call_id) = self.call_id else {
            return;
        };
        if self.open {
            self.transcript.push(TranscriptEntry::new(call_id, role, text));
        }
    }

    fn publish(&mut self) {
        let now = Instant::now();
        let is_playing = self.playback.as_ref().is_some_and(|p| p.is_playing());
        let is_capturing = self.capture.is_recording();
        let muted = self.config.mute_enabled && self.muted;

        let speaker = if self.open {
            self.speaker.update(is_playing, is_capturing, muted, now)
        } else {
            None
        };

        if let Some(playback) = self.playback.as_ref() {
            self.playback_stats = playback.stats();
        }

        let status = self.transport.status();
        let phase = if self.open {
            CallPhase::from_status(status)
        } else {
            self.closed_phase
        };
        let elapsed_secs = self
            .started
            .map(|started| now.duration_since(started).as_secs())
            .unwrap_or(0);

        let snapshot = CallSnapshot {
            phase,
            status,
            status_text: status.status_text().to_string(),
            is_open: self.open,
            call_id: self.call_id,
            started_at: self.started_at,
            elapsed_secs,
            elapsed: format_elapsed(elapsed_secs),
            speaker,
            muted,
            is_playing,
            is_capturing,
            available_functions: self.available_functions.clone(),
            last_error: self.last_error.clone(),
            counters: CallCounters {
                chunks_dropped: self.playback_stats.chunks_dropped,
                decode_failures: self.counters.decode_failures
                    + self.playback_stats.decode_failures,
                ..self.counters
            },
        };

        self.snapshot.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }
}

async fn next_finished(finished: &mut Option<mpsc::UnboundedReceiver<UnitId>>) -> Option<UnitId> {
    match finished {
        Some(rx) => rx.recv().await,
        None => future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(0), "00:00");
        assert_eq!(format_elapsed(65), "01:05");
        assert_eq!(format_elapsed(3600), "60:00");
    }

    #[test]
    fn test_phase_mirrors_status() {
        assert_eq!(CallPhase::from_status(ConnectionState::Recording), CallPhase::Recording);
        assert_eq!(CallPhase::from_status(ConnectionState::Error), CallPhase::Error);
    }

    #[test]
    fn test_default_snapshot_is_idle() {
        let snapshot = CallSnapshot::default();
        assert_eq!(snapshot.phase, CallPhase::Idle);
        assert_eq!(snapshot.status_text, "Disconnected");
        assert_eq!(snapshot.elapsed, "00:00");
        assert!(snapshot.speaker.is_none());
    }
}
