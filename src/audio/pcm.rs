use std::path::Path;
use std::time::Duration;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use tracing::debug;

use crate::error::{AutodubError, Result};

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Number of samples covering `duration` at `sample_rate`, rounded down.
pub fn samples_for(duration: Duration, sample_rate: u32) -> usize {
    (duration.as_nanos() * sample_rate as u128 / NANOS_PER_SEC) as usize
}

/// Exact duration of `samples` samples at `sample_rate`.
pub fn duration_of(samples: usize, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    let nanos = samples as u128 * NANOS_PER_SEC / sample_rate as u128;
    Duration::from_nanos(nanos as u64)
}

/// Mono 16-bit PCM held in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcmAudio {
    samples: Vec<i16>,
    sample_rate: u32,
}

impl PcmAudio {
    pub fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn empty(sample_rate: u32) -> Self {
        Self::new(Vec::new(), sample_rate)
    }

    pub fn silence(duration: Duration, sample_rate: u32) -> Self {
        Self::new(vec![0; samples_for(duration, sample_rate)], sample_rate)
    }

    /// Decode raw little-endian 16-bit samples; a trailing odd byte is dropped.
    pub fn from_le_bytes(bytes: &[u8], sample_rate: u32) -> Self {
        let samples = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Self::new(samples, sample_rate)
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration(&self) -> Duration {
        duration_of(self.samples.len(), self.sample_rate)
    }

    pub fn append(&mut self, other: &PcmAudio) -> Result<()> {
        if other.sample_rate != self.sample_rate {
            return Err(AutodubError::Audio(format!(
                "Sample rate mismatch: {} Hz vs {} Hz",
                self.sample_rate, other.sample_rate
            )));
        }
        self.samples.extend_from_slice(&other.samples);
        Ok(())
    }

    /// Pad with trailing silence until the buffer is at least `len` samples.
    pub fn pad_to_len(&mut self, len: usize) {
        if self.samples.len() < len {
            self.samples.resize(len, 0);
        }
    }

    pub fn truncate_to_len(&mut self, len: usize) {
        self.samples.truncate(len);
    }

    pub fn write_wav(&self, path: &Path) -> Result<()> {
        let spec = WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };

        let mut writer = WavWriter::create(path, spec)?;
        for &sample in &self.samples {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;

        debug!(
            "Wrote {:.2}s of audio to {}",
            self.duration().as_secs_f64(),
            path.display()
        );
        Ok(())
    }

    /// Read a 16-bit PCM WAV, averaging channels down to mono.
    pub fn read_wav(path: &Path) -> Result<Self> {
        let reader = WavReader::open(path)?;
        let spec = reader.spec();

        if spec.sample_format != SampleFormat::Int || spec.bits_per_sample != 16 {
            return Err(AutodubError::Audio(format!(
                "Unsupported WAV format in {}: {} bit {:?}",
                path.display(),
                spec.bits_per_sample,
                spec.sample_format
            )));
        }

        let channels = spec.channels.max(1) as usize;
        let interleaved = reader
            .into_samples::<i16>()
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let samples = if channels == 1 {
            interleaved
        } else {
            interleaved
                .chunks(channels)
                .map(|frame| {
                    let sum: i32 = frame.iter().map(|&s| s as i32).sum();
                    (sum / frame.len() as i32) as i16
                })
                .collect()
        };

        Ok(Self::new(samples, spec.sample_rate))
    }
}
