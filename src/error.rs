//! Error types for the companion controller.

use std::fmt;

/// Top-level error type for the companion.
#[derive(Debug, thiserror::Error)]
pub enum CompanionError {
    /// Audio device, decoding or stream construction error.
    #[error("audio error: {0}")]
    Audio(String),

    /// Remote audio fetch error.
    #[error("fetch error: {0}")]
    Fetch(String),

    /// Playback could not be started on a constructed stream.
    #[error("playback error: {0}")]
    Playback(PlaybackFailure),

    /// Voice synthesis error.
    #[error("voice error: {0}")]
    Voice(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Malformed or rejected host command.
    #[error("command error: {0}")]
    Command(String),

    /// Actor channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, CompanionError>;

/// Diagnostic fields reported when an audio stream fails to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackFailure {
    /// Subsystem that produced the status code (e.g. `"cpal"`, `"symphonia"`).
    pub domain: String,
    /// Raw status code. Negative values follow the classic audio file status table.
    pub code: i32,
    /// Free-form backend message.
    pub message: String,
}

impl PlaybackFailure {
    pub fn new(domain: impl Into<String>, code: i32, message: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            code,
            message: message.into(),
        }
    }

    /// Best-effort decode of the status code.
    #[must_use]
    pub fn status(&self) -> AudioStatus {
        AudioStatus::from_code(self.code)
    }
}

impl fmt::Display for PlaybackFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (domain={}, code={}, {})",
            self.message,
            self.domain,
            self.code,
            self.status().describe()
        )
    }
}

/// Well-known audio status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioStatus {
    ParameterError,
    FileNotFound,
    EndOfFile,
    FileExists,
    FileNotOpen,
    UnsupportedFormat,
    Unknown,
}

impl AudioStatus {
    /// Status code for a format that cannot be decoded (`'wht?'`).
    pub const UNSUPPORTED_FORMAT_CODE: i32 = 2_003_334_207;

    #[must_use]
    pub fn from_code(code: i32) -> Self {
        match code {
            -50 => Self::ParameterError,
            -43 => Self::FileNotFound,
            -39 => Self::EndOfFile,
            -208 => Self::FileExists,
            -38 => Self::FileNotOpen,
            Self::UNSUPPORTED_FORMAT_CODE => Self::UnsupportedFormat,
            _ => Self::Unknown,
        }
    }

    /// Code reported for this status, the inverse of [`AudioStatus::from_code`].
    #[must_use]
    pub fn code(self) -> i32 {
        match self {
            Self::ParameterError => -50,
            Self::FileNotFound => -43,
            Self::EndOfFile => -39,
            Self::FileExists => -208,
            Self::FileNotOpen => -38,
            Self::UnsupportedFormat => Self::UNSUPPORTED_FORMAT_CODE,
            Self::Unknown => 0,
        }
    }

    #[must_use]
    pub fn describe(self) -> &'static str {
        match self {
            Self::ParameterError => "parameter error, check file format",
            Self::FileNotFound => "file not found",
            Self::EndOfFile => "end of file",
            Self::FileExists => "file already exists",
            Self::FileNotOpen => "file not open",
            Self::UnsupportedFormat => "audio format not supported or corrupted file",
            Self::Unknown => "unknown audio error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_status_codes_decode() {
        assert_eq!(AudioStatus::from_code(-50), AudioStatus::ParameterError);
        assert_eq!(AudioStatus::from_code(-43), AudioStatus::FileNotFound);
        assert_eq!(AudioStatus::from_code(-39), AudioStatus::EndOfFile);
        assert_eq!(AudioStatus::from_code(-208), AudioStatus::FileExists);
        assert_eq!(AudioStatus::from_code(-38), AudioStatus::FileNotOpen);
        assert_eq!(
            AudioStatus::from_code(2_003_334_207),
            AudioStatus::UnsupportedFormat
        );
        assert_eq!(AudioStatus::from_code(7), AudioStatus::Unknown);
    }

    #[test]
    fn playback_failure_display_includes_diagnostics() {
        let failure = PlaybackFailure::new("cpal", -43, "cannot start");
        let text = CompanionError::Playback(failure).to_string();
        assert!(text.contains("domain=cpal"));
        assert!(text.contains("code=-43"));
        assert!(text.contains("file not found"));
    }
}
