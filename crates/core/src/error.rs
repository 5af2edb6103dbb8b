use std::path::PathBuf;

/// Result alias that carries the custom [`SpectrumError`] type.
pub type Result<T> = std::result::Result<T, SpectrumError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum SpectrumError {
    /// Free-form error message for conditions without a dedicated variant.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// The source file was readable but contained no bytes.
    #[error("audio source `{}` is empty", .0.display())]
    EmptySource(PathBuf),
    /// The compressed stream could not be probed, or a frame failed to decode.
    #[error("decode failed: {0}")]
    Decode(String),
    /// The decoder rejected a reseek target.
    #[error("seek to {position_ms}ms failed: {reason}")]
    Seek { position_ms: i64, reason: String },
    /// A caller supplied an argument the operation cannot work with.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    /// A shared lock was poisoned by a panicking thread.
    #[error("{0} has been poisoned")]
    Poisoned(&'static str),
    /// Configuration file could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
    /// The FFT backend refused the supplied buffers.
    #[error("fft failed: {0}")]
    Fft(String),
}

impl SpectrumError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }
}

impl From<&str> for SpectrumError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for SpectrumError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}

impl From<realfft::FftError> for SpectrumError {
    fn from(value: realfft::FftError) -> Self {
        Self::Fft(value.to_string())
    }
}

impl From<symphonia::core::errors::Error> for SpectrumError {
    fn from(value: symphonia::core::errors::Error) -> Self {
        Self::Decode(value.to_string())
    }
}
