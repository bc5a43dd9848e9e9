// SpectralAnalyzer - windowed magnitude spectrum of one audio frame
//
// The FFT plan and every working buffer are acquired once in `new()` and
// live as long as the analyzer. `analyze()` only reuses them, so the
// per-frame path never allocates.
//
// Algorithm:
// 1. Apply a Hann window over the valid sample range (at most buffer_size)
// 2. Zero-pad the remainder up to fft_size
// 3. Forward FFT of the real-valued input
// 4. Keep fft_size / 2 magnitude bins, scaled so a full-scale sine reads ~1.0

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

use crate::config::SpectralConfig;
use crate::error::AudioError;

/// Computes magnitude spectra with a fixed-size FFT context
pub struct SpectralAnalyzer {
    fft: Arc<dyn Fft<f32>>,
    fft_size: usize,
    buffer_size: usize,
    sample_rate: u32,
    /// Hann window for the most recent valid length
    window: Vec<f32>,
    window_sum: f32,
    buffer: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    magnitudes: Vec<f32>,
}

impl SpectralAnalyzer {
    /// Acquire the FFT context and working buffers.
    ///
    /// # Errors
    /// `AudioError::AllocationFailure` if the context cannot be built for the
    /// requested sizes or its buffers cannot be reserved.
    pub fn new(config: &SpectralConfig) -> Result<Self, AudioError> {
        let fft_size = config.fft_size;
        let buffer_size = config.buffer_size;

        if fft_size < 4 || buffer_size == 0 || buffer_size > fft_size {
            return Err(AudioError::AllocationFailure {
                reason: format!(
                    "cannot build FFT context for fft_size {} and buffer_size {}",
                    fft_size, buffer_size
                ),
            });
        }

        let fft = FftPlanner::new().plan_fft_forward(fft_size);
        let buffer = try_filled(fft_size, Complex::new(0.0, 0.0))?;
        let scratch = try_filled(fft.get_inplace_scratch_len(), Complex::new(0.0, 0.0))?;
        let magnitudes = try_filled(fft_size / 2, 0.0_f32)?;
        let window = try_filled(buffer_size, 0.0_f32)?;

        let mut analyzer = Self {
            fft,
            fft_size,
            buffer_size,
            sample_rate: config.sample_rate,
            window,
            window_sum: 0.0,
            buffer,
            scratch,
            magnitudes,
        };
        analyzer.prepare_window(buffer_size);

        tracing::debug!(
            "[SpectralAnalyzer] FFT context ready: size {}, {} bins of {:.2} Hz",
            fft_size,
            fft_size / 2,
            analyzer.bin_width()
        );

        Ok(analyzer)
    }

    /// Compute the magnitude spectrum of one frame.
    ///
    /// Frames longer than `buffer_size` are truncated. The returned slice
    /// borrows the analyzer's output buffer and is overwritten by the next
    /// call.
    ///
    /// # Errors
    /// `AudioError::InvalidFrame` for an empty frame or non-finite samples;
    /// the caller skips the frame.
    pub fn analyze(&mut self, samples: &[f32]) -> Result<&[f32], AudioError> {
        if samples.is_empty() {
            return Err(AudioError::InvalidFrame {
                reason: "zero-length frame".to_string(),
            });
        }
        if samples.iter().any(|s| !s.is_finite()) {
            return Err(AudioError::InvalidFrame {
                reason: "frame contains non-finite samples".to_string(),
            });
        }

        let valid = samples.len().min(self.buffer_size);
        if valid != self.window.len() {
            self.prepare_window(valid);
        }

        for (slot, (sample, w)) in self
            .buffer
            .iter_mut()
            .zip(samples[..valid].iter().zip(self.window.iter()))
        {
            *slot = Complex::new(sample * w, 0.0);
        }
        for slot in self.buffer[valid..].iter_mut() {
            *slot = Complex::new(0.0, 0.0);
        }

        self.fft
            .process_with_scratch(&mut self.buffer, &mut self.scratch);

        let scale = if self.window_sum > 0.0 {
            2.0 / self.window_sum
        } else {
            0.0
        };
        for (mag, bin) in self.magnitudes.iter_mut().zip(self.buffer.iter()) {
            *mag = bin.norm() * scale;
        }

        Ok(&self.magnitudes)
    }

    /// Centre frequency of a bin in Hz
    #[inline]
    pub fn bin_frequency(&self, bin: usize) -> f32 {
        bin as f32 * self.bin_width()
    }

    /// Frequency resolution in Hz
    #[inline]
    pub fn bin_width(&self) -> f32 {
        self.sample_rate as f32 / self.fft_size as f32
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn prepare_window(&mut self, len: usize) {
        // Capacity is buffer_size, so this never reallocates.
        self.window.clear();
        self.window.extend((0..len).map(|i| hann(i, len)));
        self.window_sum = self.window.iter().sum();
    }
}

/// Hann coefficient `i` of a window spanning `len` samples
#[inline]
fn hann(i: usize, len: usize) -> f32 {
    if len <= 1 {
        return 1.0;
    }
    0.5 * (1.0 - ((2.0 * std::f32::consts::PI * i as f32) / (len as f32 - 1.0)).cos())
}

fn try_filled<T: Clone>(len: usize, value: T) -> Result<Vec<T>, AudioError> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|err| AudioError::AllocationFailure {
            reason: err.to_string(),
        })?;
    buf.resize(len, value);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, amplitude: f32, len: usize, sample_rate: u32) -> Vec<f32> {
        (0..len)
            .map(|i| {
                amplitude
                    * (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate as f32).sin()
            })
            .collect()
    }

    fn strongest_bin(spectrum: &[f32]) -> usize {
        spectrum
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(i, _)| i)
            .unwrap()
    }

    #[test]
    fn test_spectrum_has_half_fft_bins() {
        let mut analyzer = SpectralAnalyzer::new(&SpectralConfig::default()).unwrap();
        let spectrum = analyzer.analyze(&[0.0; 2048]).unwrap();
        assert_eq!(spectrum.len(), 2048);
        assert!(spectrum.iter().all(|&m| m == 0.0));
    }

    #[test]
    fn test_pure_100hz_tone_peak_within_one_bin() {
        let config = SpectralConfig::default();
        let mut analyzer = SpectralAnalyzer::new(&config).unwrap();
        let tone = sine(100.0, 0.8, config.buffer_size, config.sample_rate);

        let peak = strongest_bin(analyzer.analyze(&tone).unwrap());
        let peak_hz = analyzer.bin_frequency(peak);
        let tolerance = config.sample_rate as f32 / config.fft_size as f32;

        assert!(
            (peak_hz - 100.0).abs() <= tolerance,
            "peak at {} Hz, expected 100 Hz ± {}",
            peak_hz,
            tolerance
        );
    }

    #[test]
    fn test_magnitude_scaled_to_amplitude() {
        let config = SpectralConfig::default();
        let mut analyzer = SpectralAnalyzer::new(&config).unwrap();
        let tone = sine(1000.0, 0.5, config.buffer_size, config.sample_rate);

        let spectrum = analyzer.analyze(&tone).unwrap();
        let peak = spectrum[strongest_bin(spectrum)];
        assert!(
            (0.4..=0.55).contains(&peak),
            "expected ~0.5 peak magnitude, got {}",
            peak
        );
    }

    #[test]
    fn test_short_frame_is_zero_padded() {
        let config = SpectralConfig::default();
        let mut analyzer = SpectralAnalyzer::new(&config).unwrap();
        let tone = sine(3000.0, 0.5, 512, config.sample_rate);

        let peak = strongest_bin(analyzer.analyze(&tone).unwrap());
        let peak_hz = analyzer.bin_frequency(peak);
        // 512 valid samples: resolution is coarser but the peak stays close
        assert!((peak_hz - 3000.0).abs() < 50.0, "peak at {} Hz", peak_hz);

        // Window is rebuilt when the frame length returns to normal
        let full = sine(3000.0, 0.5, 2048, config.sample_rate);
        assert!(analyzer.analyze(&full).is_ok());
    }

    #[test]
    fn test_long_frame_is_truncated() {
        let config = SpectralConfig::default();
        let mut analyzer = SpectralAnalyzer::new(&config).unwrap();
        let tone = sine(440.0, 0.5, 5000, config.sample_rate);
        let spectrum = analyzer.analyze(&tone).unwrap();
        assert_eq!(spectrum.len(), config.fft_size / 2);
    }

    #[test]
    fn test_invalid_frames_rejected() {
        let mut analyzer = SpectralAnalyzer::new(&SpectralConfig::default()).unwrap();
        assert!(matches!(
            analyzer.analyze(&[]),
            Err(AudioError::InvalidFrame { .. })
        ));
        assert!(matches!(
            analyzer.analyze(&[0.1, f32::NAN, 0.2]),
            Err(AudioError::InvalidFrame { .. })
        ));
    }

    #[test]
    fn test_construction_failure_reported() {
        let config = SpectralConfig {
            fft_size: 1024,
            buffer_size: 2048,
            sample_rate: 44100,
        };
        assert!(matches!(
            SpectralAnalyzer::new(&config),
            Err(AudioError::AllocationFailure { .. })
        ));
    }

    #[test]
    fn test_bin_frequency_mapping() {
        let analyzer = SpectralAnalyzer::new(&SpectralConfig::default()).unwrap();
        assert_eq!(analyzer.bin_frequency(0), 0.0);
        assert!((analyzer.bin_frequency(1) - 44100.0 / 4096.0).abs() < 1e-4);
        assert!((analyzer.bin_frequency(2048) - 22050.0).abs() < 1e-2);
    }
}
