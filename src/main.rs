use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use voice_call::audio::MicrophoneBackend;
use voice_call::call::{JsonLinesSink, TracingSink};
use voice_call::config::DEFAULT_CONFIG_PATH;
use voice_call::playback::{DeviceOutput, UnitId, VirtualOutput};
use voice_call::{
    create_router, AppState, AudioBackendFactory, AudioOutput, AudioSource, CallComponents,
    CallHandle, Config, OutputOpener, TranscriptSink, TungsteniteConnector, VoiceCall,
};

#[derive(Debug, Parser)]
#[command(name = "voice-call", version, about = "Real-time voice call client")]
struct Args {
    /// Configuration file (extension optional)
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Voice endpoint base URL, e.g. ws://localhost:8000
    #[arg(long)]
    ws_url: Option<String>,

    /// Ask the endpoint to enable search
    #[arg(long)]
    enable_search: bool,

    /// Ask the endpoint to disable function calling
    #[arg(long)]
    disable_functions: bool,

    /// Stream this WAV file instead of the microphone
    #[arg(long)]
    input_wav: Option<PathBuf>,

    /// Play responses against a silent clock instead of the speaker
    #[arg(long)]
    no_speaker: bool,

    /// Serve the HTTP control surface instead of calling straight away
    #[arg(long)]
    serve: bool,

    /// End the call after this many seconds
    #[arg(long)]
    duration_secs: Option<u64>,

    /// List input devices and exit
    #[arg(long)]
    list_devices: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    if args.list_devices {
        for name in MicrophoneBackend::list_input_devices()? {
            println!("{}", name);
        }
        return Ok(());
    }

    let mut cfg = Config::load(&args.config)?;
    if let Some(url) = &args.ws_url {
        cfg.transport.base_url = url.clone();
    }
    if args.enable_search {
        cfg.transport.enable_search = true;
    }
    if args.disable_functions {
        cfg.transport.enable_functions = false;
    }

    info!("{} v{}", cfg.service.name, env!("CARGO_PKG_VERSION"));
    if cfg.transport.base_url.is_empty() {
        warn!("No voice endpoint configured; set transport.base_url or pass --ws-url");
    }

    let source = match &args.input_wav {
        Some(path) => AudioSource::File(path.clone()),
        None => AudioSource::Microphone,
    };
    info!("Capture source: {:?}", source);

    let output_opener: OutputOpener = if args.no_speaker {
        Arc::new(
            |finished_tx: mpsc::UnboundedSender<UnitId>| -> Result<Box<dyn AudioOutput>> {
                Ok(Box::new(VirtualOutput::realtime(finished_tx)))
            },
        )
    } else {
        let playback_rate = cfg.playback.sample_rate;
        Arc::new(
            move |finished_tx: mpsc::UnboundedSender<UnitId>| -> Result<Box<dyn AudioOutput>> {
                Ok(Box::new(DeviceOutput::open(playback_rate, finished_tx)?))
            },
        )
    };

    let transcript_sink: Arc<dyn TranscriptSink> = match &cfg.call.transcript_path {
        Some(path) => Arc::new(JsonLinesSink::new(path)),
        None => Arc::new(TracingSink),
    };

    let call = VoiceCall::spawn(
        cfg.call_config(),
        CallComponents {
            transport: cfg.transport_config(),
            connector: Arc::new(TungsteniteConnector),
            capture: cfg.capture_config(),
            capture_opener: AudioBackendFactory::opener(source, cfg.backend_config(true)),
            playback: cfg.playback_config(),
            output_opener,
            transcript_sink: Some(transcript_sink),
        },
    );

    if args.serve {
        serve(&cfg, call).await
    } else {
        run_call(call, args.duration_secs.map(Duration::from_secs)).await
    }
}

async fn serve(cfg: &Config, call: CallHandle) -> Result<()> {
    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("HTTP control surface listening on http://{}", addr);

    let router = create_router(AppState::new(call.clone(), cfg.call.mute_enabled));
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("HTTP server failed")?;

    call.end().await?;
    Ok(())
}

async fn run_call(call: CallHandle, duration: Option<Duration>) -> Result<()> {
    let mut updates = call.subscribe();
    call.open().await?;
    info!("Call opened; press Ctrl-C to hang up");

    let deadline = async {
        match duration {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    let mut last = (String::new(), None);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = &mut deadline => {
                info!("Call duration reached");
                break;
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = updates.borrow_and_update().clone();
                let current = (snapshot.status_text.clone(), snapshot.speaker);
                if current != last {
                    info!(
                        "[{}] {} speaker={:?}",
                        snapshot.elapsed, snapshot.status_text, snapshot.speaker
                    );
                    last = current;
                }
            }
        }
    }

    let snapshot = call.end().await?;
    info!(
        "Call ended: {} chunks sent, {} received, {} dropped",
        snapshot.counters.chunks_sent,
        snapshot.counters.chunks_received,
        snapshot.counters.chunks_dropped
    );
    Ok(())
}
