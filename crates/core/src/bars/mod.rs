//! Consumer-side bar model: maps spectrum snapshots onto log-spaced bars and
//! animates their peak markers. Everything here runs on the consumer's own
//! timers, never on the decode thread.

mod mapping;
mod peak;

use crossbeam_channel::Receiver;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub use mapping::LogBarMapping;
pub use peak::PeakTracker;

use crate::{config::BarConfig, DecodeEngine, PlaybackState, Result, SpectrumFrame};

/// Copy of the bar model's visible state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarSnapshot {
    pub bars: Vec<f32>,
    pub peaks: Vec<f32>,
}

/// Bar values, peak markers and the timers that animate them.
#[derive(Debug)]
pub struct SpectrumBars {
    config: BarConfig,
    fft_size: usize,
    mapping: LogBarMapping,
    bars: Vec<f32>,
    peaks: PeakTracker,
    playback: PlaybackState,
    frame_timer: bool,
    tick_timer: bool,
    last_position: Option<i64>,
    snapshots: Option<Receiver<SpectrumFrame>>,
    dirty: bool,
}

impl SpectrumBars {
    pub fn new(config: BarConfig, fft_size: usize) -> Result<Self> {
        let mapping = LogBarMapping::new(
            config.bar_count,
            fft_size,
            config.default_sample_rate,
            config.min_freq_hz,
            config.max_freq_hz,
        )?;
        Ok(Self {
            bars: vec![0.0; config.bar_count],
            peaks: PeakTracker::new(config.bar_count, config.peak_decay),
            config,
            fft_size,
            mapping,
            playback: PlaybackState::Stopped,
            frame_timer: false,
            tick_timer: true,
            last_position: None,
            snapshots: None,
            dirty: false,
        })
    }

    /// Subscribes to `engine`'s snapshots and adopts its sample rate.
    pub fn attach(&mut self, engine: &DecodeEngine) -> Result<()> {
        self.attach_receiver(engine.subscribe()?);
        if let Some(sample_rate) = engine.sample_rate() {
            self.set_sample_rate(sample_rate)?;
        }
        Ok(())
    }

    pub fn attach_receiver(&mut self, snapshots: Receiver<SpectrumFrame>) {
        self.snapshots = Some(snapshots);
    }

    /// Rebuilds the bin table when the stream's sample rate changes.
    pub fn set_sample_rate(&mut self, sample_rate: u32) -> Result<()> {
        if sample_rate == self.mapping.sample_rate() {
            return Ok(());
        }
        self.mapping = LogBarMapping::new(
            self.config.bar_count,
            self.fft_size,
            sample_rate,
            self.config.min_freq_hz,
            self.config.max_freq_hz,
        )?;
        debug!(sample_rate, "rebuilt bar mapping");
        Ok(())
    }

    pub fn mapping(&self) -> &LogBarMapping {
        &self.mapping
    }

    pub fn bars(&self) -> &[f32] {
        &self.bars
    }

    pub fn peaks(&self) -> &[f32] {
        self.peaks.peaks()
    }

    pub fn snapshot(&self) -> BarSnapshot {
        BarSnapshot {
            bars: self.bars.clone(),
            peaks: self.peaks.peaks().to_vec(),
        }
    }

    pub fn playback_state(&self) -> PlaybackState {
        self.playback
    }

    pub fn peak_decay(&self) -> f32 {
        self.peaks.decay()
    }

    pub fn set_peak_decay(&mut self, decay: f32) {
        self.peaks.set_decay(decay);
    }

    /// Whether anything visible changed since the last call.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    /// Maps a spectrum onto the bars and runs one round of peak tracking.
    pub fn apply_spectrum(&mut self, spectrum: &[f32]) {
        self.bars = self.mapping.map_to_bars(spectrum);
        self.peaks.update(&self.bars);
        self.dirty = true;
    }

    /// Applies the newest queued snapshot, discarding older ones.
    pub fn drain_snapshots(&mut self) -> bool {
        let latest = self
            .snapshots
            .as_ref()
            .and_then(|rx| rx.try_iter().last());
        match latest {
            Some(frame) => {
                self.apply_spectrum(&frame);
                true
            }
            None => false,
        }
    }

    /// Animation tick: lets peaks fall toward their bars.
    pub fn tick(&mut self) {
        if self.tick_timer && self.peaks.update(&self.bars) {
            self.dirty = true;
        }
    }

    /// Frame pass run on the faster frame timer.
    ///
    /// While playing, forwards the transport position to the engine (nudged
    /// by 1ms if it has not moved so the decoder keeps producing frames) and
    /// applies the latest snapshot. Otherwise lets the bars sink.
    pub fn update_frame(&mut self, engine: &DecodeEngine, position_ms: i64) -> Result<()> {
        if !self.frame_timer {
            return Ok(());
        }

        if self.playback == PlaybackState::Playing {
            let position = match self.last_position {
                Some(last) if last == position_ms => position_ms + 1,
                _ => position_ms,
            };
            self.last_position = Some(position);
            engine.set_position(position)?;
            self.drain_snapshots();
        } else {
            let decay = self.config.idle_decay;
            self.bars.iter_mut().for_each(|bar| *bar *= decay);
            self.peaks.update(&self.bars);
            self.dirty = true;
        }
        Ok(())
    }

    /// Reacts to a transport state change.
    pub fn handle_playback_state(
        &mut self,
        engine: &DecodeEngine,
        state: PlaybackState,
        position_ms: i64,
    ) -> Result<()> {
        self.playback = state;
        if state == PlaybackState::Playing {
            self.frame_timer = true;
            self.tick_timer = true;
            return Ok(());
        }

        self.update_for_position(engine, position_ms)?;
        if self.frame_timer {
            self.frame_timer = false;
            let decay = self.config.pause_decay;
            self.bars.iter_mut().for_each(|bar| *bar *= decay);
            self.peaks.settle(&self.bars);
            self.dirty = true;
        }
        self.tick_timer = false;
        Ok(())
    }

    /// Jumps the engine to `position_ms` (a scrub) and republishes the bars
    /// straight away from the engine's current spectrum.
    pub fn update_for_position(&mut self, engine: &DecodeEngine, position_ms: i64) -> Result<()> {
        engine.set_position(position_ms)?;
        self.last_position = Some(position_ms);

        if self.playback == PlaybackState::Playing {
            self.frame_timer = true;
            self.tick_timer = true;
        }

        // Queued frames predate the jump.
        if let Some(rx) = self.snapshots.as_ref() {
            rx.try_iter().for_each(drop);
        }
        let spectrum = engine.get_spectrum_data()?;
        self.apply_spectrum(&spectrum);
        Ok(())
    }

    /// Clears bars and peaks, e.g. when a new stream starts.
    pub fn reset(&mut self) {
        self.bars.iter_mut().for_each(|bar| *bar = 0.0);
        self.peaks.reset();
        self.last_position = None;
        if let Some(rx) = self.snapshots.as_ref() {
            rx.try_iter().for_each(drop);
        }
        self.dirty = true;
    }
}
