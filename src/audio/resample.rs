// Streaming sample-rate conversion on top of rubato's band-limited sinc
// resampler.
//
// Capture callbacks and playback units arrive in blocks of arbitrary size,
// while `SincFixedIn` consumes a fixed number of frames per call. Input is
// staged until a full block is available; the filter state carries across
// blocks so the output is continuous at block boundaries.

use anyhow::{anyhow, bail, Result};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

/// Stateful mono resampler from one fixed rate to another
pub struct StreamResampler {
    from_rate: u32,
    to_rate: u32,
    chunk_frames: usize,
    inner: Option<SincFixedIn<f32>>,
    pending: Vec<f32>,
    out_buf: Vec<Vec<f32>>,
}

impl std::fmt::Debug for StreamResampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamResampler")
            .field("from_rate", &self.from_rate)
            .field("to_rate", &self.to_rate)
            .field("chunk_frames", &self.chunk_frames)
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl StreamResampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Result<Self> {
        if from_rate == 0 || to_rate == 0 {
            bail!("Sample rate cannot be zero ({} -> {})", from_rate, to_rate);
        }

        // 10ms of input per filter pass
        let chunk_frames = (from_rate as usize / 100).max(1);

        let inner = if from_rate == to_rate {
            None
        } else {
            // When downsampling rubato scales the cutoff by the ratio, so
            // content above the new Nyquist is filtered out rather than folded.
            let params = SincInterpolationParameters {
                sinc_len: 256,
                f_cutoff: 0.95,
                interpolation: SincInterpolationType::Linear,
                oversampling_factor: 256,
                window: WindowFunction::BlackmanHarris2,
            };
            let resampler = SincFixedIn::<f32>::new(
                to_rate as f64 / from_rate as f64,
                2.0,
                params,
                chunk_frames,
                1,
            )
            .map_err(|e| anyhow!("Failed to create resampler {} -> {}: {:?}", from_rate, to_rate, e))?;
            Some(resampler)
        };

        let out_buf = match inner.as_ref() {
            Some(r) => r.output_buffer_allocate(true),
            None => Vec::new(),
        };

        Ok(Self {
            from_rate,
            to_rate,
            chunk_frames,
            inner,
            pending: Vec::with_capacity(chunk_frames * 2),
            out_buf,
        })
    }

    pub fn from_rate(&self) -> u32 {
        self.from_rate
    }

    pub fn to_rate(&self) -> u32 {
        self.to_rate
    }

    /// Rates match and samples pass through untouched
    pub fn is_passthrough(&self) -> bool {
        self.inner.is_none()
    }

    /// Input frames consumed per filter pass
    pub fn chunk_frames(&self) -> usize {
        self.chunk_frames
    }

    /// Resample the next block of input
    ///
    /// Output lags the input by less than one block plus the filter delay;
    /// staged samples are emitted by later calls.
    pub fn process(&mut self, input: &[f32]) -> Result<Vec<f32>> {
        let mut out = Vec::new();
        self.process_into(input, &mut out)?;
        Ok(out)
    }

    /// Like `process`, appending to `out`
    pub fn process_into(&mut self, input: &[f32], out: &mut Vec<f32>) -> Result<()> {
        let Some(inner) = self.inner.as_mut() else {
            out.extend_from_slice(input);
            return Ok(());
        };

        self.pending.extend_from_slice(input);

        let mut consumed = 0;
        while self.pending.len() - consumed >= self.chunk_frames {
            let block = &self.pending[consumed..consumed + self.chunk_frames];
            let (read, written) = inner
                .process_into_buffer(std::slice::from_ref(&block), self.out_buf.as_mut_slice(), None)
                .map_err(|e| anyhow!("Resampling failed: {:?}", e))?;
            out.extend_from_slice(&self.out_buf[0][..written]);
            consumed += read;
        }
        self.pending.drain(..consumed);

        Ok(())
    }

    /// Forget stream history (new capture session)
    pub fn reset(&mut self) {
        self.pending.clear();
        if let Some(inner) = self.inner.as_mut() {
            inner.reset();
        }
    }
}

/// Average interleaved channels down to mono
pub fn downmix_to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }

    let channels = channels as usize;
    samples
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn tone(freq: f32, rate: u32, seconds: f32) -> Vec<f32> {
        let len = (rate as f32 * seconds) as usize;
        (0..len)
            .map(|i| 0.5 * (2.0 * PI * freq * i as f32 / rate as f32).sin())
            .collect()
    }

    fn rms(samples: &[f32]) -> f32 {
        (samples.iter().map(|s| s * s).sum::<f32>() / samples.len().max(1) as f32).sqrt()
    }

    #[test]
    fn test_passthrough_same_rate() {
        let mut r = StreamResampler::new(16000, 16000).unwrap();
        assert!(r.is_passthrough());
        let input = vec![0.1, 0.2, 0.3];
        assert_eq!(r.process(&input).unwrap(), input);
    }

    #[test]
    fn test_zero_rate_is_rejected() {
        assert!(StreamResampler::new(0, 16000).is_err());
        assert!(StreamResampler::new(48000, 0).is_err());
    }

    #[test]
    fn test_downsample_length_and_level() {
        let mut r = StreamResampler::new(48000, 16000).unwrap();
        let out = r.process(&vec![0.25f32; 48000]).unwrap();

        // Every full 10ms block is converted, about 160 samples each
        assert!((15_990..=16_010).contains(&out.len()), "{}", out.len());
        // Past the filter's start-up, DC passes at unity
        let settled = &out[1000..];
        assert!(settled.iter().all(|s| (s - 0.25).abs() < 0.005), "{:?}", &settled[..8]);
    }

    #[test]
    fn test_tone_above_new_nyquist_is_suppressed() {
        // 10kHz is representable at 48kHz but not at 16kHz
        let input = tone(10_000.0, 48000, 1.0);
        let mut r = StreamResampler::new(48000, 16000).unwrap();
        let out = r.process(&input).unwrap();

        let level = rms(&out[1000..]) / rms(&input);
        assert!(level < 0.1, "10kHz leaked through at {:.3}", level);
    }

    #[test]
    fn test_tone_in_passband_survives() {
        let input = tone(1_000.0, 48000, 1.0);
        let mut r = StreamResampler::new(48000, 16000).unwrap();
        let out = r.process(&input).unwrap();

        let level = rms(&out[1000..]) / rms(&input);
        assert!((level - 1.0).abs() < 0.05, "1kHz level {:.3}", level);
    }

    #[test]
    fn test_streaming_matches_single_block() {
        let input: Vec<f32> = (0..44100).map(|i| ((i as f32) * 0.01).sin()).collect();

        let mut whole = StreamResampler::new(44100, 16000).unwrap();
        let expected = whole.process(&input).unwrap();

        let mut split = StreamResampler::new(44100, 16000).unwrap();
        let mut actual = Vec::new();
        for block in input.chunks(333) {
            split.process_into(block, &mut actual).unwrap();
        }

        assert_eq!(actual.len(), expected.len());
        for (a, b) in actual.iter().zip(expected.iter()) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn test_reset_forgets_staged_input() {
        let mut r = StreamResampler::new(48000, 16000).unwrap();
        assert!(r.process(&[0.5; 100]).unwrap().is_empty());
        r.reset();
        // The 100 staged samples are gone, so one block still needs 480 more
        assert!(r.process(&[0.5; 400]).unwrap().is_empty());
        let out = r.process(&[0.5; 80]).unwrap();
        assert!((159..=161).contains(&out.len()), "{}", out.len());
    }

    #[test]
    fn test_downmix_stereo() {
        let mono = downmix_to_mono(&[0.2, 0.4, -1.0, 1.0], 2);
        assert_eq!(mono.len(), 2);
        assert!((mono[0] - 0.3).abs() < 1e-6);
        assert_eq!(mono[1], 0.0);
        assert_eq!(downmix_to_mono(&[0.1, 0.2], 1), vec![0.1, 0.2]);
    }
}
