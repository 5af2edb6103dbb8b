//! Compressed audio decoding.
//!
//! [`FrameDecoder`] is the seam between the decode loop and the codec
//! backend. [`SymphoniaDecoder`] implements it for every container and codec
//! symphonia was built with (MP3, WAV, FLAC, Ogg Vorbis, ...).

use std::{
    fmt,
    fs,
    io::{self, Cursor},
    path::{Path, PathBuf},
    sync::Arc,
};

use symphonia::core::{
    audio::SampleBuffer,
    codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL},
    errors::Error as SymphoniaError,
    formats::{FormatOptions, FormatReader, SeekMode, SeekTo},
    io::{MediaSourceStream, MediaSourceStreamOptions},
    meta::MetadataOptions,
    probe::Hint,
    units::Time,
};
use tracing::debug;

use crate::{Result, SpectrumError};

/// Full-scale divisor used to normalise 16-bit PCM into [-1, 1).
const I16_FULL_SCALE: f32 = 32_768.0;

/// Outcome of a single decode step.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedFrame {
    /// Interleaved, normalised samples of one compressed frame.
    Samples(Vec<f32>),
    /// The stream has no further frames at the current cursor.
    EndOfStream,
}

/// Decoder primitive driven by the decode loop.
pub trait FrameDecoder: Send {
    fn sample_rate(&self) -> u32;

    fn channels(&self) -> u16;

    /// Total stream length, when the container reports it.
    fn duration_ms(&self) -> Option<u64> {
        None
    }

    /// Moves the decode cursor to the frame with index `sample_index`.
    fn seek(&mut self, sample_index: u64) -> Result<()>;

    /// Decodes the next frame at the cursor.
    fn decode_frame(&mut self) -> Result<DecodedFrame>;
}

/// Raw compressed bytes plus the stream parameters read from the header.
///
/// Immutable for the lifetime of a session.
#[derive(Clone)]
pub struct AudioSource {
    path: PathBuf,
    bytes: Arc<[u8]>,
    sample_rate: u32,
    channels: u16,
}

impl AudioSource {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }
}

impl fmt::Debug for AudioSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioSource")
            .field("path", &self.path)
            .field("bytes", &self.bytes.len())
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .finish()
    }
}

/// Symphonia-backed implementation of [`FrameDecoder`].
pub struct SymphoniaDecoder {
    source: AudioSource,
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    n_frames: Option<u64>,
    sample_buf: Option<SampleBuffer<i16>>,
    // Timestamp the last seek asked for; earlier decoded frames are dropped.
    skip_until: Option<u64>,
}

impl SymphoniaDecoder {
    /// Reads the whole file into memory and initialises the decoder from its
    /// header.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path)?;
        if bytes.is_empty() {
            return Err(SpectrumError::EmptySource(path.to_path_buf()));
        }
        Self::from_bytes(path, bytes)
    }

    /// Initialises the decoder over an in-memory stream. `path` only serves
    /// as an extension hint and for diagnostics.
    pub fn from_bytes(path: impl AsRef<Path>, bytes: Vec<u8>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if bytes.is_empty() {
            return Err(SpectrumError::EmptySource(path));
        }
        let bytes: Arc<[u8]> = bytes.into();

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|ext| ext.to_str()) {
            hint.with_extension(ext);
        }

        let mss = MediaSourceStream::new(
            Box::new(Cursor::new(bytes.clone())),
            MediaSourceStreamOptions::default(),
        );
        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| SpectrumError::Decode(format!("failed to probe stream: {e}")))?;
        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| SpectrumError::Decode("no audio track found".to_string()))?;

        let sample_rate = track
            .codec_params
            .sample_rate
            .filter(|rate| *rate > 0)
            .ok_or_else(|| SpectrumError::Decode("stream header has no sample rate".to_string()))?;
        let channels = track
            .codec_params
            .channels
            .map(|c| c.count() as u16)
            .filter(|count| *count > 0)
            .ok_or_else(|| SpectrumError::Decode("stream header has no channel layout".to_string()))?;
        let track_id = track.id;
        let n_frames = track.codec_params.n_frames;

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| SpectrumError::Decode(format!("failed to create decoder: {e}")))?;

        debug!(?path, sample_rate, channels, track_id, "decoder initialised");

        Ok(Self {
            source: AudioSource {
                path,
                bytes,
                sample_rate,
                channels,
            },
            format,
            decoder,
            track_id,
            n_frames,
            sample_buf: None,
            skip_until: None,
        })
    }

    pub fn source(&self) -> &AudioSource {
        &self.source
    }
}

impl FrameDecoder for SymphoniaDecoder {
    fn sample_rate(&self) -> u32 {
        self.source.sample_rate
    }

    fn channels(&self) -> u16 {
        self.source.channels
    }

    fn duration_ms(&self) -> Option<u64> {
        self.n_frames
            .map(|frames| frames * 1000 / u64::from(self.source.sample_rate))
    }

    fn seek(&mut self, sample_index: u64) -> Result<()> {
        let rate = u64::from(self.source.sample_rate);
        let seconds = sample_index as f64 / rate as f64;
        let seeked = self
            .format
            .seek(
                SeekMode::Accurate,
                SeekTo::Time {
                    time: Time::from(seconds),
                    track_id: Some(self.track_id),
                },
            )
            .map_err(|e| SpectrumError::Seek {
                position_ms: (seconds * 1000.0) as i64,
                reason: e.to_string(),
            })?;
        self.decoder.reset();
        self.skip_until = Some(seeked.required_ts);
        Ok(())
    }

    fn decode_frame(&mut self) -> Result<DecodedFrame> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    return Ok(DecodedFrame::EndOfStream);
                }
                Err(e) => return Err(e.into()),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = self.decoder.decode(&packet)?;
            let frames = decoded.frames() as u64;
            if frames == 0 {
                continue;
            }

            // An accurate seek lands on the packet containing the target.
            let skip = match self.skip_until {
                Some(required) if required > packet.ts() => {
                    let skip = (required - packet.ts()).min(frames);
                    if skip == frames {
                        continue;
                    }
                    skip
                }
                _ => 0,
            };
            self.skip_until = None;

            let spec = *decoded.spec();
            let capacity = decoded.capacity() as u64;
            let needs_alloc = self
                .sample_buf
                .as_ref()
                .map(|buf| buf.capacity() < decoded.capacity() * spec.channels.count())
                .unwrap_or(true);
            if needs_alloc {
                self.sample_buf = Some(SampleBuffer::new(capacity, spec));
            }

            if let Some(buf) = self.sample_buf.as_mut() {
                buf.copy_interleaved_ref(decoded);
                let offset = skip as usize * spec.channels.count();
                let samples = buf.samples().get(offset..).unwrap_or_default();
                return Ok(DecodedFrame::Samples(pcm_to_float(samples)));
            }
        }
    }
}

impl fmt::Debug for SymphoniaDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SymphoniaDecoder")
            .field("source", &self.source)
            .field("track_id", &self.track_id)
            .field("n_frames", &self.n_frames)
            .finish()
    }
}

/// Normalises signed 16-bit PCM into [-1, 1).
pub fn pcm_to_float(samples: &[i16]) -> Vec<f32> {
    samples
        .iter()
        .map(|sample| f32::from(*sample) / I16_FULL_SCALE)
        .collect()
}

/// Averages interleaved frames down to one channel.
pub fn downmix_to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    let channels = usize::from(channels.max(1));
    if channels == 1 {
        return samples.to_vec();
    }
    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}
