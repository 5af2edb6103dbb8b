//! Decode engine: owns one decode session at a time and the state shared
//! with its background loop.

mod reconcile;
mod worker;

use std::{
    fmt,
    path::Path,
    sync::{Arc, Mutex, MutexGuard},
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use tracing::{info, warn};

pub use reconcile::{LoopStep, SeekReconciler};

use self::worker::{DecodeWorker, SessionControl};
use crate::{
    config::{AnalyzerConfig, AppConfig, EngineConfig},
    decode::{FrameDecoder, SymphoniaDecoder},
    PcmRingBuffer, Result, SpectrumAnalyzer, SpectrumError, SpectrumFrame,
};

/// Callback invoked on the decode thread with every fresh spectrum. It must
/// copy what it needs and return quickly.
pub type SpectrumCallback = Arc<dyn Fn(&SpectrumFrame) + Send + Sync>;

/// Lifecycle of the decode engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EngineState {
    /// No session has been opened yet.
    Idle,
    /// A stream was initialised and its loop is about to start.
    Opened,
    /// The background loop is decoding.
    Running,
    /// Termination was requested; the loop exits at its next iteration.
    Stopping,
    /// The loop has exited and the decoder was released.
    Closed,
}

impl EngineState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Opened,
            2 => Self::Running,
            3 => Self::Stopping,
            _ => Self::Closed,
        }
    }
}

/// State guarded by the engine's single data lock.
#[derive(Debug)]
struct SessionData {
    /// Bumped on every open; writes from older workers are ignored.
    generation: u64,
    target_position_ms: i64,
    ring: PcmRingBuffer,
    spectrum: SpectrumFrame,
}

/// Everything the façade and the worker thread share.
pub(crate) struct Shared {
    data: Mutex<SessionData>,
    callback: Mutex<Option<SpectrumCallback>>,
    subscribers: Mutex<Vec<Sender<SpectrumFrame>>>,
}

impl Shared {
    fn new(bins: usize) -> Self {
        Self {
            data: Mutex::new(SessionData {
                generation: 0,
                target_position_ms: 0,
                ring: PcmRingBuffer::new(0),
                spectrum: SpectrumFrame::silent(bins),
            }),
            callback: Mutex::new(None),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    fn lock_data(&self) -> Result<MutexGuard<'_, SessionData>> {
        self.data
            .lock()
            .map_err(|_| SpectrumError::Poisoned("decode session state"))
    }

    fn lock_callback(&self) -> Result<MutexGuard<'_, Option<SpectrumCallback>>> {
        self.callback
            .lock()
            .map_err(|_| SpectrumError::Poisoned("spectrum callback"))
    }

    fn lock_subscribers(&self) -> Result<MutexGuard<'_, Vec<Sender<SpectrumFrame>>>> {
        self.subscribers
            .lock()
            .map_err(|_| SpectrumError::Poisoned("spectrum subscribers"))
    }

    pub(crate) fn target_position(&self) -> Result<i64> {
        Ok(self.lock_data()?.target_position_ms)
    }

    /// Appends decoded samples, returning whether occupancy is below half,
    /// or `None` when `generation` is no longer the current session.
    pub(crate) fn push_samples(&self, generation: u64, samples: &[f32]) -> Result<Option<bool>> {
        let mut data = self.lock_data()?;
        if data.generation != generation {
            return Ok(None);
        }
        data.ring.push(samples);
        Ok(Some(data.ring.is_below_half()))
    }

    /// Replaces the current frame, then notifies the callback and the
    /// subscribers with the lock released. Frames of a stale session are
    /// dropped.
    pub(crate) fn publish_spectrum(&self, generation: u64, frame: SpectrumFrame) -> Result<()> {
        {
            let mut data = self.lock_data()?;
            if data.generation != generation {
                return Ok(());
            }
            data.spectrum = frame.clone();
        }

        let callback = self.lock_callback()?.clone();
        if let Some(callback) = callback {
            callback(&frame);
        }

        self.lock_subscribers()?
            .retain(|tx| match tx.try_send(frame.clone()) {
                Ok(()) | Err(TrySendError::Full(_)) => true,
                Err(TrySendError::Disconnected(_)) => false,
            });
        Ok(())
    }

    /// Clears the session state and returns the new session's generation.
    fn reset(&self, capacity: usize, bins: usize) -> Result<u64> {
        let mut data = self.lock_data()?;
        data.generation += 1;
        data.target_position_ms = 0;
        data.ring.reset(capacity);
        data.spectrum = SpectrumFrame::silent(bins);
        Ok(data.generation)
    }
}

/// A running decode session as seen from the façade.
struct Session {
    control: Arc<SessionControl>,
    done: Receiver<()>,
    handle: Option<JoinHandle<()>>,
    sample_rate: u32,
    channels: u16,
    duration_ms: Option<u64>,
}

/// Decodes a compressed stream on a background thread, keeping a bounded
/// PCM buffer and the latest spectrum in step with an externally driven
/// playback position.
///
/// Only one session exists at a time. Opening a new stream drains the
/// previous session before replacing it.
pub struct DecodeEngine {
    engine_config: EngineConfig,
    analyzer_config: AnalyzerConfig,
    shared: Arc<Shared>,
    session: Option<Session>,
    closed: bool,
}

impl DecodeEngine {
    pub fn new(engine_config: EngineConfig, analyzer_config: AnalyzerConfig) -> Self {
        let shared = Arc::new(Shared::new(analyzer_config.bins()));
        Self {
            engine_config,
            analyzer_config,
            shared,
            session: None,
            closed: false,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.engine.clone(), config.analyzer.clone())
    }

    /// Reads `path` into memory, initialises the decoder from its header and
    /// starts the decode loop.
    ///
    /// On failure the engine keeps whatever session it had before.
    pub fn open(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let decoder = SymphoniaDecoder::open(path).map_err(|err| {
            warn!(?path, %err, "failed to open audio source");
            err
        })?;
        info!(
            ?path,
            sample_rate = decoder.sample_rate(),
            channels = decoder.channels(),
            "opened audio source"
        );
        self.open_with_decoder(Box::new(decoder))
    }

    /// Starts a session over an already initialised decoder.
    pub fn open_with_decoder(&mut self, decoder: Box<dyn FrameDecoder>) -> Result<()> {
        let sample_rate = decoder.sample_rate();
        let channels = decoder.channels();
        if sample_rate == 0 || channels == 0 {
            return Err(SpectrumError::Decode(
                "stream reports no sample rate or channels".to_string(),
            ));
        }
        let analyzer = SpectrumAnalyzer::new(self.analyzer_config.clone())?;
        let duration_ms = decoder.duration_ms();

        if let Some(previous) = self.session.take() {
            self.shutdown(previous);
        }

        let capacity = self.engine_config.buffer_capacity(sample_rate);
        let generation = self.shared.reset(capacity, self.analyzer_config.bins())?;

        let control = Arc::new(SessionControl::new());
        let (done_tx, done_rx) = bounded(0);
        let worker = DecodeWorker::new(
            decoder,
            analyzer,
            self.engine_config.clone(),
            self.shared.clone(),
            generation,
            control.clone(),
            done_tx,
        );

        let handle = thread::Builder::new()
            .name("decode-engine".to_string())
            .spawn(move || worker.run())
            .map_err(|err| {
                control.set_state(EngineState::Closed);
                SpectrumError::msg(format!("failed to spawn decode thread: {err}"))
            })?;

        self.closed = false;
        self.session = Some(Session {
            control,
            done: done_rx,
            handle: Some(handle),
            sample_rate,
            channels,
            duration_ms,
        });
        Ok(())
    }

    /// Records the playback position the loop should follow. Last write wins.
    pub fn set_position(&self, position_ms: i64) -> Result<()> {
        self.shared.lock_data()?.target_position_ms = position_ms;
        Ok(())
    }

    /// Most recently requested playback position.
    pub fn target_position(&self) -> Result<i64> {
        self.shared.target_position()
    }

    /// Pops exactly `count` samples, or returns `None` without consuming
    /// anything when fewer are buffered.
    pub fn get_audio_data(&self, count: usize) -> Result<Option<Vec<f32>>> {
        Ok(self.shared.lock_data()?.ring.pop_exact(count))
    }

    /// Copy of the latest published spectrum.
    pub fn get_spectrum_data(&self) -> Result<SpectrumFrame> {
        Ok(self.shared.lock_data()?.spectrum.clone())
    }

    /// Number of samples currently buffered.
    pub fn buffered_samples(&self) -> Result<usize> {
        Ok(self.shared.lock_data()?.ring.len())
    }

    /// Asks the loop to stop at its next iteration without waiting for it.
    pub fn stop_decoding(&self) {
        if let Some(session) = &self.session {
            session.control.request_stop();
        }
    }

    /// Stops the loop, waits for it within the shutdown bound and releases
    /// the session.
    pub fn close(&mut self) {
        if let Some(session) = self.session.take() {
            self.shutdown(session);
            self.closed = true;
        }
    }

    /// Registers the callback invoked with each new spectrum frame.
    pub fn set_spectrum_callback<F>(&self, callback: F) -> Result<()>
    where
        F: Fn(&SpectrumFrame) + Send + Sync + 'static,
    {
        let callback: SpectrumCallback = Arc::new(callback);
        *self.shared.lock_callback()? = Some(callback);
        Ok(())
    }

    pub fn clear_spectrum_callback(&self) -> Result<()> {
        *self.shared.lock_callback()? = None;
        Ok(())
    }

    /// Returns a queue receiving every published frame. Frames are dropped
    /// for a subscriber whose queue is full.
    pub fn subscribe(&self) -> Result<Receiver<SpectrumFrame>> {
        let (tx, rx) = bounded(self.engine_config.snapshot_queue.max(1));
        self.shared.lock_subscribers()?.push(tx);
        Ok(rx)
    }

    pub fn state(&self) -> EngineState {
        match &self.session {
            Some(session) => session.control.state(),
            None if self.closed => EngineState::Closed,
            None => EngineState::Idle,
        }
    }

    /// Whether a decode loop is alive. A loop that died on a decode error
    /// or a panic reports `false` while its session is still installed.
    pub fn is_running(&self) -> bool {
        matches!(
            self.state(),
            EngineState::Opened | EngineState::Running | EngineState::Stopping
        )
    }

    /// Frames decoded by the current session.
    pub fn frames_decoded(&self) -> u64 {
        self.session
            .as_ref()
            .map(|session| session.control.frames_decoded())
            .unwrap_or(0)
    }

    pub fn sample_rate(&self) -> Option<u32> {
        self.session.as_ref().map(|session| session.sample_rate)
    }

    pub fn channels(&self) -> Option<u16> {
        self.session.as_ref().map(|session| session.channels)
    }

    pub fn duration_ms(&self) -> Option<u64> {
        self.session.as_ref().and_then(|session| session.duration_ms)
    }

    fn shutdown(&self, mut session: Session) {
        session.control.request_stop();
        let timeout = self.engine_config.shutdown_timeout();
        if wait_for_exit(&session.done, timeout) {
            if let Some(handle) = session.handle.take() {
                if handle.join().is_err() {
                    warn!("decode thread panicked");
                }
            }
        } else {
            // The worker still owns the decoder and drops it once it
            // observes the stop flag.
            warn!(?timeout, "decode thread did not stop in time, detaching it");
            session.handle.take();
        }
    }
}

impl Default for DecodeEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default(), AnalyzerConfig::default())
    }
}

impl Drop for DecodeEngine {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for DecodeEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodeEngine")
            .field("state", &self.state())
            .field("sample_rate", &self.sample_rate())
            .field("channels", &self.channels())
            .finish()
    }
}

/// True once the worker dropped its end of `done`, i.e. it has exited.
fn wait_for_exit(done: &Receiver<()>, timeout: Duration) -> bool {
    matches!(
        done.recv_timeout(timeout),
        Ok(()) | Err(RecvTimeoutError::Disconnected)
    )
}
