use std::time::Duration;

use tracing::debug;

use super::pcm::{samples_for, PcmAudio};

/// Configuration for detecting whether an audio track carries any signal.
#[derive(Debug, Clone)]
pub struct VadConfig {
    /// RMS energy threshold (0.0 to 1.0).
    /// Lower values are more sensitive to quiet speech.
    pub energy_threshold: f32,

    /// Length of each analysis window.
    pub window: Duration,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            energy_threshold: 0.01,
            window: Duration::from_millis(100),
        }
    }
}

/// Calculate RMS (Root Mean Square) energy of a sample window.
fn calculate_rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f64 = samples
        .iter()
        .map(|&s| {
            let normalized = s as f64 / i16::MAX as f64;
            normalized * normalized
        })
        .sum();

    (sum_squares / samples.len() as f64).sqrt() as f32
}

/// RMS energy of consecutive, non-overlapping windows.
fn compute_energy_profile(samples: &[i16], window_size: usize) -> Vec<f32> {
    samples
        .chunks(window_size.max(1))
        .map(calculate_rms)
        .collect()
}

/// Whether any window rises above the energy threshold.
///
/// An empty buffer never has signal.
pub fn has_signal(audio: &PcmAudio, config: &VadConfig) -> bool {
    let window_size = samples_for(config.window, audio.sample_rate());
    let energy = compute_energy_profile(audio.samples(), window_size);
    let peak = energy.iter().cloned().fold(0.0f32, f32::max);

    debug!(
        "Energy profile: {} windows, peak RMS {:.4} (threshold {:.4})",
        energy.len(),
        peak,
        config.energy_threshold
    );

    energy.iter().any(|&e| e >= config.energy_threshold)
}
