use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering},
        Arc,
    },
    thread,
    time::Instant,
};

use crossbeam_channel::Sender;
use tracing::{debug, info, trace, warn};

use super::{reconcile::LoopStep, EngineState, SeekReconciler, Shared};
use crate::{
    config::EngineConfig,
    decode::{downmix_to_mono, DecodedFrame, FrameDecoder},
    Result, SpectrumAnalyzer,
};

/// Flags shared between one session's worker and the engine façade.
#[derive(Debug)]
pub(crate) struct SessionControl {
    stop: AtomicBool,
    state: AtomicU8,
    frames_decoded: AtomicU64,
}

impl SessionControl {
    pub(crate) fn new() -> Self {
        Self {
            stop: AtomicBool::new(false),
            state: AtomicU8::new(EngineState::Opened as u8),
            frames_decoded: AtomicU64::new(0),
        }
    }

    pub(crate) fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
        // Only a live loop moves to Stopping; a finished one stays Closed.
        let _ = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |state| {
                match EngineState::from_u8(state) {
                    EngineState::Opened | EngineState::Running => {
                        Some(EngineState::Stopping as u8)
                    }
                    _ => None,
                }
            });
    }

    /// Moves a freshly opened session to Running unless a stop came first.
    pub(crate) fn mark_running(&self) {
        let _ = self.state.compare_exchange(
            EngineState::Opened as u8,
            EngineState::Running as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    pub(crate) fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    pub(crate) fn state(&self) -> EngineState {
        EngineState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: EngineState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub(crate) fn frames_decoded(&self) -> u64 {
        self.frames_decoded.load(Ordering::Acquire)
    }
}

/// Marks the session Closed when the loop exits, including by unwinding.
struct ClosedOnExit(Arc<SessionControl>);

impl Drop for ClosedOnExit {
    fn drop(&mut self) {
        self.0.set_state(EngineState::Closed);
    }
}

/// Background loop of a single decode session.
pub(crate) struct DecodeWorker {
    decoder: Box<dyn FrameDecoder>,
    analyzer: SpectrumAnalyzer,
    reconciler: SeekReconciler,
    config: EngineConfig,
    shared: Arc<Shared>,
    generation: u64,
    control: Arc<SessionControl>,
    // Dropped last: disconnecting tells teardown the decoder is released.
    _done: Sender<()>,
}

impl DecodeWorker {
    pub(crate) fn new(
        decoder: Box<dyn FrameDecoder>,
        analyzer: SpectrumAnalyzer,
        config: EngineConfig,
        shared: Arc<Shared>,
        generation: u64,
        control: Arc<SessionControl>,
        done: Sender<()>,
    ) -> Self {
        let reconciler = SeekReconciler::new(
            decoder.sample_rate(),
            config.reseek_tolerance_ms,
            config.min_process_interval(),
        );
        Self {
            decoder,
            analyzer,
            reconciler,
            config,
            shared,
            generation,
            control,
            _done: done,
        }
    }

    pub(crate) fn run(mut self) {
        let _closed = ClosedOnExit(self.control.clone());
        self.control.mark_running();
        info!(
            sample_rate = self.decoder.sample_rate(),
            channels = self.decoder.channels(),
            "decode loop started"
        );
        let mut at_end = false;
        let mut failed_seeks = 0u32;

        while !self.control.stop_requested() {
            let target_ms = match self.shared.target_position() {
                Ok(target) => target,
                Err(err) => {
                    warn!(%err, "decode loop lost its shared state");
                    break;
                }
            };

            let now = Instant::now();
            match self.reconciler.plan(target_ms, now) {
                LoopStep::Seek {
                    target_ms,
                    sample_index,
                } => match self.decoder.seek(sample_index) {
                    Ok(()) => {
                        debug!(target_ms, sample_index, "decoder reseeked");
                        self.reconciler.seek_succeeded(target_ms, now);
                        at_end = false;
                        failed_seeks = 0;
                    }
                    Err(err) => {
                        if failed_seeks == 0 {
                            warn!(target_ms, %err, "seek failed, retrying");
                        } else {
                            debug!(target_ms, failed_seeks, %err, "seek still failing");
                        }
                        failed_seeks = failed_seeks.saturating_add(1);
                        thread::sleep(self.config.idle_sleep());
                        continue;
                    }
                },
                LoopStep::Decode => self.reconciler.mark_processed(now),
                LoopStep::Wait => {
                    thread::sleep(self.config.idle_sleep());
                    continue;
                }
            }

            let samples = match self.decoder.decode_frame() {
                Ok(DecodedFrame::Samples(samples)) => samples,
                Ok(DecodedFrame::EndOfStream) => {
                    if !at_end {
                        debug!(target_ms, "end of stream reached");
                        at_end = true;
                    }
                    thread::sleep(self.config.end_of_stream_sleep());
                    continue;
                }
                Err(err) => {
                    warn!(%err, "decode failed, stopping decode loop");
                    break;
                }
            };

            match self.publish(&samples) {
                Ok(true) => trace!("buffer below half, decoding ahead"),
                Ok(false) => thread::sleep(self.config.idle_sleep()),
                Err(err) => {
                    warn!(%err, "failed to publish decoded frame");
                    break;
                }
            }
        }

        info!(
            frames = self.control.frames_decoded(),
            "decode loop finished"
        );
    }

    /// Buffers the frame, analyses it and hands the spectrum to consumers.
    ///
    /// Returns whether the ring buffer is still below half its capacity.
    fn publish(&mut self, samples: &[f32]) -> Result<bool> {
        // A detached worker must not write into its successor's buffers.
        if samples.is_empty() || self.control.stop_requested() {
            return Ok(true);
        }
        let Some(below_half) = self.shared.push_samples(self.generation, samples)? else {
            return Ok(true);
        };

        let mono = downmix_to_mono(samples, self.decoder.channels());
        let frame = self.analyzer.compute(&mono)?;
        self.shared.publish_spectrum(self.generation, frame)?;
        // Counted once consumers can see the frame.
        self.control.frames_decoded.fetch_add(1, Ordering::Release);

        Ok(below_half)
    }
}
