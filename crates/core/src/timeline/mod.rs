use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Playback signal published by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PlaybackState {
    Playing,
    Paused,
    #[default]
    Stopped,
}

/// Wall-clock driven stand-in for a playback transport. It owns the
/// authoritative position that the decode engine follows.
#[derive(Debug, Clone, Default)]
pub struct PlaybackClock {
    state: PlaybackState,
    base_ms: i64,
    started: Option<Instant>,
    duration_ms: Option<i64>,
}

impl PlaybackClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clock that stops advancing at `duration_ms`.
    pub fn with_duration(duration_ms: Option<u64>) -> Self {
        Self {
            duration_ms: duration_ms.map(|ms| ms as i64),
            ..Self::default()
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn play(&mut self) {
        self.play_at(Instant::now());
    }

    pub fn play_at(&mut self, now: Instant) {
        if self.state != PlaybackState::Playing {
            self.state = PlaybackState::Playing;
            self.started = Some(now);
        }
    }

    pub fn pause(&mut self) {
        self.pause_at(Instant::now());
    }

    pub fn pause_at(&mut self, now: Instant) {
        if self.state == PlaybackState::Playing {
            self.base_ms = self.position_at(now);
            self.started = None;
            self.state = PlaybackState::Paused;
        }
    }

    pub fn stop(&mut self) {
        self.state = PlaybackState::Stopped;
        self.base_ms = 0;
        self.started = None;
    }

    /// Jumps to `position_ms`, keeping the current playback state.
    pub fn seek(&mut self, position_ms: i64) {
        self.seek_at(position_ms, Instant::now());
    }

    pub fn seek_at(&mut self, position_ms: i64, now: Instant) {
        self.base_ms = self.clamp(position_ms);
        if self.state == PlaybackState::Playing {
            self.started = Some(now);
        }
    }

    pub fn position_ms(&self) -> i64 {
        self.position_at(Instant::now())
    }

    pub fn position_at(&self, now: Instant) -> i64 {
        let elapsed = self
            .started
            .map(|started| now.saturating_duration_since(started))
            .unwrap_or(Duration::ZERO);
        self.clamp(self.base_ms + elapsed.as_millis() as i64)
    }

    /// True once a clock with a known duration has reached its end.
    pub fn finished_at(&self, now: Instant) -> bool {
        self.duration_ms
            .map(|duration| self.position_at(now) >= duration)
            .unwrap_or(false)
    }

    fn clamp(&self, position_ms: i64) -> i64 {
        let position_ms = position_ms.max(0);
        match self.duration_ms {
            Some(duration) => position_ms.min(duration),
            None => position_ms,
        }
    }
}
