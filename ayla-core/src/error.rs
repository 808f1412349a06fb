use thiserror::Error;

/// All errors produced by ayla-core.
#[derive(Debug, Error)]
pub enum AylaError {
    #[error("malformed base64 payload: {0}")]
    MalformedBase64(#[from] base64::DecodeError),

    #[error("malformed PCM16 chunk: {len} bytes is not a whole number of samples")]
    MalformedAudioChunk { len: usize },

    #[error("unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("playback source {0} already stopped")]
    SourceAlreadyStopped(u64),

    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default output device found")]
    NoDefaultOutputDevice,

    #[error("no default input device found")]
    NoDefaultInputDevice,

    #[error("uplink error: {0}")]
    Uplink(String),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, AylaError>;
