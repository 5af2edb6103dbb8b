use std::ops::Range;

use crate::{Result, SpectrumError};

/// Table assigning each visual bar a contiguous range of FFT bins, spaced
/// logarithmically in frequency.
///
/// Bin 0 (DC) is never used. Upper bounds never decrease from one bar to the
/// next and are capped at `fft_size / 2`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogBarMapping {
    upper_bins: Vec<usize>,
    half: usize,
    sample_rate: u32,
}

impl LogBarMapping {
    pub fn new(
        bar_count: usize,
        fft_size: usize,
        sample_rate: u32,
        min_freq_hz: f32,
        max_freq_hz: f32,
    ) -> Result<Self> {
        if bar_count == 0 {
            return Err(SpectrumError::InvalidInput("bar count must be at least 1"));
        }
        if fft_size < 2 || sample_rate == 0 {
            return Err(SpectrumError::InvalidInput(
                "fft size and sample rate must be positive",
            ));
        }
        if min_freq_hz <= 0.0 || min_freq_hz >= max_freq_hz {
            return Err(SpectrumError::InvalidInput("invalid frequency range"));
        }

        let half = fft_size / 2;
        let log_min = min_freq_hz.log10();
        let log_range = max_freq_hz.log10() - log_min;
        let hz_per_bin = sample_rate as f32 / fft_size as f32;

        let mut upper_bins = Vec::with_capacity(bar_count);
        let mut previous = 1;
        for bar in 0..bar_count {
            // Upper edge of the bar; the last bar ends at `max_freq_hz`.
            let fraction = (bar + 1) as f32 / bar_count as f32;
            let freq = 10f32.powf(log_min + fraction * log_range);
            let bin = (freq / hz_per_bin) as usize;
            // Every bar gets at least one bin of its own while bins remain.
            let upper = bin.max(previous + 1).clamp(1, half);
            upper_bins.push(upper);
            previous = upper;
        }

        Ok(Self {
            upper_bins,
            half,
            sample_rate,
        })
    }

    pub fn bar_count(&self) -> usize {
        self.upper_bins.len()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Exclusive upper bin of every bar.
    pub fn upper_bins(&self) -> &[usize] {
        &self.upper_bins
    }

    /// Bins `[start, end)` aggregated into `bar`.
    pub fn bin_range(&self, bar: usize) -> Range<usize> {
        let end = self.upper_bins[bar];
        let start = if bar == 0 {
            1
        } else {
            self.upper_bins[bar - 1]
        };
        start.min(end)..end
    }

    /// Reduces a linear-frequency spectrum to one value per bar by taking the
    /// loudest bin in each range.
    pub fn map_to_bars(&self, spectrum: &[f32]) -> Vec<f32> {
        (0..self.upper_bins.len())
            .map(|bar| {
                let range = self.bin_range(bar);
                let end = range.end.min(spectrum.len()).min(self.half);
                let start = range.start.min(end);
                spectrum[start..end].iter().copied().fold(0.0, f32::max)
            })
            .collect()
    }
}
