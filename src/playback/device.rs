// Speaker output built on cpal.
//
// Units are mixed on a mono Timeline at the playback rate. The device
// callback pulls from it through one streaming resampler, so unit boundaries
// never meet the rate conversion and the converted signal stays continuous.

use anyhow::{anyhow, bail, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SampleFormat, SizedSample};
use std::collections::VecDeque;
use std::sync::{mpsc as std_mpsc, Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use super::output::{AudioOutput, PlaybackUnit, UnitId};
use super::timeline::Timeline;
use crate::audio::resample::StreamResampler;

const OPEN_TIMEOUT: Duration = Duration::from_secs(5);

/// Default output device
///
/// `open` and `drop` wait on the device thread; call them off the async
/// runtime.
pub struct DeviceOutput {
    timeline: Arc<Mutex<Timeline>>,
    sample_rate: u32,
    stop_tx: Option<std_mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl DeviceOutput {
    /// Acquire the default output device for units at `sample_rate`
    pub fn open(sample_rate: u32, finished_tx: mpsc::UnboundedSender<UnitId>) -> Result<Self> {
        let timeline = Arc::new(Mutex::new(Timeline::new(sample_rate)));
        let (ready_tx, ready_rx) = std_mpsc::channel();
        let (stop_tx, stop_rx) = std_mpsc::channel();

        let stream_timeline = Arc::clone(&timeline);
        let thread = std::thread::Builder::new()
            .name("speaker-output".to_string())
            .spawn(move || run_output_stream(stream_timeline, sample_rate, finished_tx, ready_tx, stop_rx))
            .context("Failed to spawn output thread")?;

        let device_rate = match ready_rx.recv_timeout(OPEN_TIMEOUT) {
            Ok(Ok(rate)) => rate,
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => bail!("Output device did not start within {:?}", OPEN_TIMEOUT),
        };

        info!("Speaker output opened at {}Hz (units at {}Hz)", device_rate, sample_rate);

        Ok(Self {
            timeline,
            sample_rate,
            stop_tx: Some(stop_tx),
            thread: Some(thread),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Timeline>> {
        self.timeline
            .lock()
            .map_err(|_| anyhow!("output timeline lock poisoned"))
    }
}

impl AudioOutput for DeviceOutput {
    fn current_time(&self) -> f64 {
        self.lock().map(|t| t.clock()).unwrap_or(0.0)
    }

    fn schedule(&mut self, unit: PlaybackUnit) -> Result<()> {
        if unit.sample_rate != self.sample_rate {
            bail!(
                "Unit {} is {}Hz but the output runs at {}Hz",
                unit.id,
                unit.sample_rate,
                self.sample_rate
            );
        }
        self.lock()?.insert(unit.id, unit.samples, unit.start_at);
        Ok(())
    }

    fn halt(&mut self, id: UnitId) -> Result<()> {
        self.lock()?.remove(id);
        Ok(())
    }

    fn name(&self) -> &str {
        "cpal speaker"
    }
}

impl Drop for DeviceOutput {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        debug!("Speaker output released");
    }
}

/// Pulls the timeline through a streaming resampler into device buffers
///
/// The timeline clock runs ahead of what is audible by the staged samples
/// (under one 10ms block plus the filter delay).
struct DeviceRenderer {
    timeline: Arc<Mutex<Timeline>>,
    resampler: StreamResampler,
    block: Vec<f32>,
    converted: Vec<f32>,
    fifo: VecDeque<f32>,
}

impl DeviceRenderer {
    fn new(timeline: Arc<Mutex<Timeline>>, unit_rate: u32, device_rate: u32) -> Result<Self> {
        let resampler = StreamResampler::new(unit_rate, device_rate)?;
        let block = vec![0.0; resampler.chunk_frames()];
        Ok(Self {
            timeline,
            resampler,
            block,
            converted: Vec::new(),
            fifo: VecDeque::new(),
        })
    }

    /// Fill an interleaved buffer, appending ids of units that finished
    fn fill(&mut self, out: &mut [f32], channels: usize, finished: &mut Vec<UnitId>) {
        let channels = channels.max(1);
        let frames = out.len() / channels;

        while self.fifo.len() < frames {
            match self.timeline.lock() {
                Ok(mut timeline) => timeline.render_into(&mut self.block, finished),
                Err(_) => self.block.iter_mut().for_each(|s| *s = 0.0),
            }

            self.converted.clear();
            if self.resampler.process_into(&self.block, &mut self.converted).is_err() {
                break;
            }
            self.fifo.extend(self.converted.iter().copied());
        }

        for frame in out.chunks_mut(channels) {
            let sample = self.fifo.pop_front().unwrap_or(0.0);
            frame.iter_mut().for_each(|slot| *slot = sample);
        }
    }
}

fn run_output_stream(
    timeline: Arc<Mutex<Timeline>>,
    unit_rate: u32,
    finished_tx: mpsc::UnboundedSender<UnitId>,
    ready_tx: std_mpsc::Sender<Result<u32>>,
    stop_rx: std_mpsc::Receiver<()>,
) {
    let (stream, rate) = match build_output_stream(timeline, unit_rate, finished_tx) {
        Ok(built) => built,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(anyhow!("Failed to start output stream: {}", e)));
        return;
    }

    let _ = ready_tx.send(Ok(rate));
    let _ = stop_rx.recv();

    if let Err(e) = stream.pause() {
        debug!("Failed to pause output stream: {}", e);
    }
}

fn build_output_stream(
    timeline: Arc<Mutex<Timeline>>,
    unit_rate: u32,
    finished_tx: mpsc::UnboundedSender<UnitId>,
) -> Result<(cpal::Stream, u32)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| anyhow!("No output device available"))?;

    info!(
        "Using output device: {}",
        device.name().unwrap_or_else(|_| "Unknown".to_string())
    );

    let supported = device
        .default_output_config()
        .context("Failed to query default output config")?;
    let format = supported.sample_format();
    let config = supported.config();
    let rate = config.sample_rate.0;

    let renderer = DeviceRenderer::new(timeline, unit_rate, rate)?;

    let stream = match format {
        SampleFormat::F32 => open_stream::<f32>(&device, &config, renderer, finished_tx)?,
        SampleFormat::I16 => open_stream::<i16>(&device, &config, renderer, finished_tx)?,
        SampleFormat::U16 => open_stream::<u16>(&device, &config, renderer, finished_tx)?,
        other => bail!("Unsupported output sample format: {:?}", other),
    };

    Ok((stream, rate))
}

fn open_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut renderer: DeviceRenderer,
    finished_tx: mpsc::UnboundedSender<UnitId>,
) -> Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32> + Send + 'static,
{
    let channels = config.channels as usize;
    let mut scratch: Vec<f32> = Vec::new();
    let mut finished: Vec<UnitId> = Vec::new();

    let stream = device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                scratch.resize(data.len(), 0.0);
                renderer.fill(&mut scratch, channels, &mut finished);

                for (dst, &src) in data.iter_mut().zip(scratch.iter()) {
                    *dst = T::from_sample(src);
                }

                for id in finished.drain(..) {
                    let _ = finished_tx.send(id);
                }
            },
            |err| {
                error!("Audio output stream error: {}", err);
            },
            None,
        )
        .map_err(|e| anyhow!("Failed to build output stream: {}", e))?;

    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    #[test]
    fn test_back_to_back_units_stay_continuous_at_device_rate() {
        // A 440Hz tone split into units whose lengths are not whole frames
        // at 44.1kHz
        let lengths = [2401usize, 1999, 3333, 1001, 4095, 2047, 5003, 777];
        let timeline = Arc::new(Mutex::new(Timeline::new(24000)));
        {
            let mut t = timeline.lock().unwrap();
            let mut cursor = 0.0f64;
            let mut offset = 0usize;
            for (i, &len) in lengths.iter().enumerate() {
                let samples = (offset..offset + len)
                    .map(|n| 0.5 * (2.0 * PI * 440.0 * n as f32 / 24000.0).sin())
                    .collect();
                t.insert(i as UnitId + 1, samples, cursor);
                cursor += len as f64 / 24000.0;
                offset += len;
            }
        }

        let mut renderer = DeviceRenderer::new(Arc::clone(&timeline), 24000, 44100).unwrap();
        let mut finished = Vec::new();
        let mut left = Vec::new();
        // Uneven stereo callback sizes
        for frames in [512usize, 441, 300, 1024, 97].iter().cycle().take(80) {
            let mut out = vec![0.0f32; frames * 2];
            renderer.fill(&mut out, 2, &mut finished);
            for frame in out.chunks(2) {
                assert_eq!(frame[0], frame[1]);
                left.push(frame[0]);
            }
        }

        // Total audio is ~0.87s; check the steady part well inside it
        let steady = &left[2000..36000];
        let max_step = steady
            .windows(2)
            .map(|w| (w[1] - w[0]).abs())
            .fold(0.0f32, f32::max);
        // A 0.5 amplitude 440Hz sine moves at most ~0.031 per 44.1kHz sample;
        // a gap or overlap at a boundary jumps far more.
        assert!(max_step < 0.04, "discontinuity of {}", max_step);
        let peak = steady.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!((peak - 0.5).abs() < 0.02, "peak {}", peak);

        assert_eq!(finished, (1..=lengths.len() as UnitId).collect::<Vec<_>>());
    }

    #[test]
    fn test_same_rate_renders_timeline_directly() {
        let timeline = Arc::new(Mutex::new(Timeline::new(24000)));
        timeline.lock().unwrap().insert(1, vec![0.25; 300], 0.0);

        let mut renderer = DeviceRenderer::new(Arc::clone(&timeline), 24000, 24000).unwrap();
        let mut finished = Vec::new();
        let mut out = vec![0.0f32; 400];
        renderer.fill(&mut out, 1, &mut finished);

        assert!(out[..300].iter().all(|&s| s == 0.25));
        assert!(out[300..].iter().all(|&s| s == 0.0));
        assert_eq!(finished, vec![1]);
    }
}
