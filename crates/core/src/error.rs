/// Result alias that carries the custom [`MetronomeError`] type.
pub type Result<T> = std::result::Result<T, MetronomeError>;

/// Common error type for the core crate.
///
/// Scheduling itself never fails; errors only surface while building an audio
/// host, validating configuration, analysing rendered audio, or doing IO.
#[derive(Debug, thiserror::Error)]
pub enum MetronomeError {
    /// The host audio capability could not be constructed. There is no
    /// degraded mode, so callers must stop before building a scheduler.
    #[error("audio output unavailable: {0}")]
    AudioUnavailable(String),
    /// Tempo must be a positive finite number and beats at least one.
    #[error("invalid rhythm: tempo {tempo} bpm with {beats} beats per bar")]
    InvalidRhythm { tempo: f64, beats: u32 },
    /// Spectral analysis of a rendered buffer failed.
    #[error("analysis failed: {0}")]
    Analysis(String),
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
}

impl MetronomeError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }
}

impl From<&str> for MetronomeError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for MetronomeError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}

impl From<realfft::FftError> for MetronomeError {
    fn from(value: realfft::FftError) -> Self {
        Self::Analysis(value.to_string())
    }
}
