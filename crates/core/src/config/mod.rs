use std::{fs, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{Result, SpectrumError};

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub analyzer: AnalyzerConfig,
    pub bars: BarConfig,
}

impl AppConfig {
    /// Reads a JSON configuration file. Missing fields fall back to defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path.as_ref())?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects combinations the engine and bar model cannot operate with.
    pub fn validate(&self) -> Result<()> {
        let fft = self.analyzer.fft_size;
        if fft < 2 || !fft.is_power_of_two() {
            return Err(SpectrumError::InvalidInput(
                "fft_size must be a power of two of at least 2",
            ));
        }
        if self.analyzer.min_db >= self.analyzer.max_db {
            return Err(SpectrumError::InvalidInput("min_db must be below max_db"));
        }
        if self.bars.bar_count == 0 {
            return Err(SpectrumError::InvalidInput("bar_count must be at least 1"));
        }
        if self.bars.min_freq_hz <= 0.0 || self.bars.min_freq_hz >= self.bars.max_freq_hz {
            return Err(SpectrumError::InvalidInput(
                "min_freq_hz must be positive and below max_freq_hz",
            ));
        }
        if self.bars.peak_decay < 0.0 {
            return Err(SpectrumError::InvalidInput("peak_decay must not be negative"));
        }
        if self.engine.buffer_seconds == 0 {
            return Err(SpectrumError::InvalidInput("buffer_seconds must be at least 1"));
        }
        Ok(())
    }
}

/// Timing and buffering knobs for the decode loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Drift between target and last reseek point tolerated before jumping.
    pub reseek_tolerance_ms: i64,
    /// Minimum spacing between two sequential decode passes.
    pub min_process_interval_ms: u64,
    /// Ring buffer capacity expressed in seconds of `sample_rate` samples.
    pub buffer_seconds: u32,
    pub idle_sleep_ms: u64,
    pub end_of_stream_sleep_ms: u64,
    /// Upper bound teardown waits for the worker before detaching it.
    pub shutdown_timeout_ms: u64,
    /// Depth of the snapshot queue handed to consumers.
    pub snapshot_queue: usize,
}

impl EngineConfig {
    pub fn min_process_interval(&self) -> Duration {
        Duration::from_millis(self.min_process_interval_ms)
    }

    pub fn idle_sleep(&self) -> Duration {
        Duration::from_millis(self.idle_sleep_ms)
    }

    pub fn end_of_stream_sleep(&self) -> Duration {
        Duration::from_millis(self.end_of_stream_sleep_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Number of samples the ring buffer holds for a stream at `sample_rate`.
    pub fn buffer_capacity(&self, sample_rate: u32) -> usize {
        sample_rate as usize * self.buffer_seconds as usize
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reseek_tolerance_ms: 100,
            min_process_interval_ms: 50,
            buffer_seconds: 2,
            idle_sleep_ms: 1,
            end_of_stream_sleep_ms: 10,
            shutdown_timeout_ms: 1000,
            snapshot_queue: 8,
        }
    }
}

/// Parameters of the spectrum analysis stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub fft_size: usize,
    pub min_db: f32,
    pub max_db: f32,
    pub epsilon: f32,
}

impl AnalyzerConfig {
    /// Number of bins published per spectrum frame.
    pub fn bins(&self) -> usize {
        self.fft_size / 2
    }
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            fft_size: 1024,
            min_db: -40.0,
            max_db: -3.0,
            epsilon: 1e-9,
        }
    }
}

/// Layout and animation parameters of the bar model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BarConfig {
    pub bar_count: usize,
    pub min_freq_hz: f32,
    pub max_freq_hz: f32,
    /// Amount a peak marker falls per animation tick.
    pub peak_decay: f32,
    pub tick_interval_ms: u64,
    pub frame_interval_ms: u64,
    /// Bar multiplier applied on each frame pass while not playing.
    pub idle_decay: f32,
    /// Bar multiplier applied once when playback pauses or stops.
    pub pause_decay: f32,
    pub default_sample_rate: u32,
}

impl BarConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }
}

impl Default for BarConfig {
    fn default() -> Self {
        Self {
            bar_count: 41,
            min_freq_hz: 20.0,
            max_freq_hz: 20_000.0,
            peak_decay: 0.05,
            tick_interval_ms: 16,
            frame_interval_ms: 10,
            idle_decay: 0.95,
            pause_decay: 0.5,
            default_sample_rate: 44_100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = AppConfig::from_json(r#"{ "bars": { "bar_count": 16 } }"#).unwrap();
        assert_eq!(config.bars.bar_count, 16);
        assert_eq!(config.bars.peak_decay, 0.05);
        assert_eq!(config.analyzer.fft_size, 1024);
        assert_eq!(config.engine.reseek_tolerance_ms, 100);
    }

    #[test]
    fn rejects_non_power_of_two_fft() {
        let err = AppConfig::from_json(r#"{ "analyzer": { "fft_size": 1000 } }"#).unwrap_err();
        assert!(matches!(err, SpectrumError::InvalidInput(_)));
    }

    #[test]
    fn rejects_malformed_json() {
        let err = AppConfig::from_json("{ not json").unwrap_err();
        assert!(matches!(err, SpectrumError::Config(_)));
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "engine": { "buffer_seconds": 3 } }"#).unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.engine.buffer_capacity(44_100), 132_300);
    }
}
