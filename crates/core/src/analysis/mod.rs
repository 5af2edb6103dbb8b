use std::{f32::consts::PI, fmt, ops::Deref, sync::Arc};

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};

use crate::{config::AnalyzerConfig, Result, SpectrumError};

/// Normalised magnitude spectrum of the most recent analysed block.
///
/// Holds `fft_size / 2` values in [0, 1]. Frames are immutable snapshots:
/// publishing a new one replaces the previous frame wholesale.
#[derive(Clone, PartialEq, Default)]
pub struct SpectrumFrame {
    bins: Arc<[f32]>,
}

impl SpectrumFrame {
    /// A frame of `bins` zeroes, used before the first block is analysed.
    pub fn silent(bins: usize) -> Self {
        Self {
            bins: vec![0.0; bins].into(),
        }
    }

    pub fn bins(&self) -> &[f32] {
        &self.bins
    }

    pub fn to_vec(&self) -> Vec<f32> {
        self.bins.to_vec()
    }
}

impl Deref for SpectrumFrame {
    type Target = [f32];

    fn deref(&self) -> &[f32] {
        &self.bins
    }
}

impl From<Vec<f32>> for SpectrumFrame {
    fn from(value: Vec<f32>) -> Self {
        Self { bins: value.into() }
    }
}

impl fmt::Debug for SpectrumFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpectrumFrame")
            .field("bins", &self.bins.len())
            .finish()
    }
}

/// Windowed FFT turning time-domain blocks into [`SpectrumFrame`]s.
pub struct SpectrumAnalyzer {
    config: AnalyzerConfig,
    window: Vec<f32>,
    fft: FftResources,
}

impl SpectrumAnalyzer {
    pub fn new(config: AnalyzerConfig) -> Result<Self> {
        let size = config.fft_size;
        if size < 2 || !size.is_power_of_two() {
            return Err(SpectrumError::InvalidInput(
                "fft size must be a power of two of at least 2",
            ));
        }
        if config.min_db >= config.max_db {
            return Err(SpectrumError::InvalidInput("min_db must be below max_db"));
        }

        let mut planner = RealFftPlanner::<f32>::new();
        let plan = planner.plan_fft_forward(size);
        let fft = FftResources {
            scratch: plan.make_scratch_vec(),
            spectrum: plan.make_output_vec(),
            input: plan.make_input_vec(),
            plan,
        };
        let window = (0..size).map(|i| hann_value(i, size)).collect();

        Ok(Self {
            config,
            window,
            fft,
        })
    }

    /// Analyses the first `fft_size` samples of `samples`, zero-padding
    /// shorter blocks.
    pub fn compute(&mut self, samples: &[f32]) -> Result<SpectrumFrame> {
        let size = self.config.fft_size;
        let config = &self.config;
        let fft = &mut self.fft;

        for (i, (slot, weight)) in fft.input.iter_mut().zip(&self.window).enumerate() {
            *slot = samples.get(i).copied().unwrap_or(0.0) * weight;
        }

        fft.plan
            .process_with_scratch(&mut fft.input, &mut fft.spectrum, &mut fft.scratch)?;

        let bins = fft.spectrum[..size / 2]
            .iter()
            .map(|bin| normalise(config, bin.norm()))
            .collect::<Vec<_>>();

        Ok(bins.into())
    }
}

impl fmt::Debug for SpectrumAnalyzer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpectrumAnalyzer")
            .field("config", &self.config)
            .finish()
    }
}

struct FftResources {
    plan: Arc<dyn RealToComplex<f32>>,
    scratch: Vec<Complex32>,
    spectrum: Vec<Complex32>,
    input: Vec<f32>,
}

/// Maps a linear magnitude onto [0, 1] through the clamped dB range.
fn normalise(config: &AnalyzerConfig, magnitude: f32) -> f32 {
    let db = 20.0 * (magnitude + config.epsilon).log10();
    if db.is_nan() {
        return 0.0;
    }
    (db.clamp(config.min_db, config.max_db) - config.min_db) / (config.max_db - config.min_db)
}

fn hann_value(index: usize, len: usize) -> f32 {
    if len <= 1 {
        return 1.0;
    }

    0.5 - 0.5 * ((2.0 * PI * index as f32) / (len as f32 - 1.0)).cos()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyzer() -> SpectrumAnalyzer {
        SpectrumAnalyzer::new(AnalyzerConfig::default()).unwrap()
    }

    fn sine(frequency: f32, amplitude: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|n| (2.0 * PI * frequency * n as f32 / 44_100.0).sin() * amplitude)
            .collect()
    }

    #[test]
    fn silence_maps_to_zero() {
        let frame = analyzer().compute(&[0.0; 1024]).unwrap();

        assert_eq!(frame.len(), 512);
        assert!(frame.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn output_is_bounded_for_loud_input() {
        let frame = analyzer().compute(&vec![1.0; 1024]).unwrap();

        assert_eq!(frame.len(), 512);
        assert!(frame.iter().all(|v| (0.0..=1.0).contains(v)));
        assert_eq!(frame[0], 1.0);
    }

    #[test]
    fn zero_pads_short_blocks() {
        let mut analyzer = analyzer();
        let short = analyzer.compute(&sine(1_000.0, 0.5, 300)).unwrap();
        let empty = analyzer.compute(&[]).unwrap();

        assert_eq!(short.len(), 512);
        assert!(short.iter().all(|v| (0.0..=1.0).contains(v)));
        assert!(empty.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn tone_peaks_at_its_bin() {
        // 1024-point FFT at 44.1 kHz: bin 93 sits at ~4005 Hz. The amplitude
        // keeps the peak below the -3 dB ceiling so it does not saturate.
        let frame = analyzer().compute(&sine(4_005.0, 0.001, 1024)).unwrap();

        let loudest = frame
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(loudest, 93);
        assert!(frame[loudest] < 1.0);
        assert!(frame[400] < frame[loudest]);
    }

    #[test]
    fn rejects_invalid_sizes() {
        let config = AnalyzerConfig {
            fft_size: 1000,
            ..Default::default()
        };
        assert!(SpectrumAnalyzer::new(config).is_err());
    }

    #[test]
    fn hann_window_is_symmetric() {
        assert_eq!(hann_value(0, 1024), 0.0);
        assert!((hann_value(100, 1024) - hann_value(923, 1024)).abs() < 1e-5);
        assert_eq!(hann_value(0, 1), 1.0);
    }
}
