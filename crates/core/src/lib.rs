//! Core library for the Spectrum Bars visualiser.
//!
//! A [`DecodeEngine`] decodes a compressed audio file on a background thread,
//! following a playback position pushed by an external transport. It keeps a
//! bounded buffer of normalised PCM and publishes a [`SpectrumFrame`] for each
//! decoded chunk. On the consumer side, [`SpectrumBars`] folds those frames
//! into log-spaced bars with falling peak markers, driven by its own timers.

pub mod analysis;
pub mod bars;
pub mod buffer;
pub mod config;
pub mod decode;
pub mod engine;
pub mod error;
pub mod render;
pub mod timeline;

pub use analysis::{SpectrumAnalyzer, SpectrumFrame};
pub use bars::{BarSnapshot, LogBarMapping, PeakTracker, SpectrumBars};
pub use buffer::PcmRingBuffer;
pub use config::{AnalyzerConfig, AppConfig, BarConfig, EngineConfig};
pub use decode::{AudioSource, DecodedFrame, FrameDecoder, SymphoniaDecoder};
pub use engine::{DecodeEngine, EngineState, LoopStep, SeekReconciler, SpectrumCallback};
pub use error::{Result, SpectrumError};
pub use render::{BarColumn, BarGeometry};
pub use timeline::{PlaybackClock, PlaybackState};
