/*!
    Error types for hardware-accelerated decoding.
*/

use thiserror::Error;

/**
    Error type shared by the decode, interop and transform crates.

    Most variants are recovered locally: setup failures degrade the stream to
    software decoding, surface failures drop a single frame, and unsupported
    features steer callers to the host copy path. See [`Error::category`].
*/
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// I/O error (file not found, shared library missing, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Codec error (decode failure, rejected parameters)
    #[error("codec error: {message}")]
    Codec { message: String },
    /// Invalid data (malformed input, inconsistent frame layout)
    #[error("invalid data: {message}")]
    InvalidData { message: String },
    /// Unsupported format (valid but not handled)
    #[error("unsupported format: {message}")]
    UnsupportedFormat { message: String },
    /// Device, session or context creation failed for a backend
    #[error("{backend} setup failed: {message}")]
    Setup { backend: String, message: String },
    /// A single surface could not be provided or mapped
    #[error("surface error: {message}")]
    Surface { message: String },
    /// A required driver feature or extension is missing
    #[error("unsupported: {feature}")]
    Unsupported { feature: String },
    /// End of stream (not really an error, but part of control flow)
    #[error("end of stream")]
    Eof,
}

/**
    Coarse classification of an [`Error`], used to decide how to recover.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Accelerator setup failed; fall back to software for the stream.
    Setup,
    /// One frame is lost; playback continues.
    Frame,
    /// Format mismatch; convert on the host.
    Format,
    /// Driver or extension missing; use the copy path from now on.
    Unsupported,
    /// Codec or container level failure.
    Codec,
    /// Operating system level failure.
    Io,
    /// End of stream.
    Eof,
}

impl Error {
    /**
        Create a codec error with the given message.
    */
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /**
        Create an invalid data error with the given message.
    */
    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::InvalidData {
            message: message.into(),
        }
    }

    /**
        Create an unsupported format error with the given message.
    */
    pub fn unsupported_format(message: impl Into<String>) -> Self {
        Self::UnsupportedFormat {
            message: message.into(),
        }
    }

    /**
        Create a setup error for the named backend.
    */
    pub fn setup(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Setup {
            backend: backend.into(),
            message: message.into(),
        }
    }

    /**
        Create a per-surface error with the given message.
    */
    pub fn surface(message: impl Into<String>) -> Self {
        Self::Surface {
            message: message.into(),
        }
    }

    /**
        Create an error for a missing driver feature or extension.
    */
    pub fn unsupported(feature: impl Into<String>) -> Self {
        Self::Unsupported {
            feature: feature.into(),
        }
    }

    /**
        Returns true if this is an EOF error.
    */
    pub fn is_eof(&self) -> bool {
        matches!(self, Self::Eof)
    }

    /**
        Returns the recovery class of this error.
    */
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Io(_) => ErrorCategory::Io,
            Self::Codec { .. } | Self::InvalidData { .. } => ErrorCategory::Codec,
            Self::UnsupportedFormat { .. } => ErrorCategory::Format,
            Self::Setup { .. } => ErrorCategory::Setup,
            Self::Surface { .. } => ErrorCategory::Frame,
            Self::Unsupported { .. } => ErrorCategory::Unsupported,
            Self::Eof => ErrorCategory::Eof,
        }
    }
}

/**
    Result type alias for hardware-accelerated decoding.
*/
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as StdError;

    #[test]
    fn error_display() {
        let e = Error::codec("decode failed");
        assert_eq!(format!("{e}"), "codec error: decode failed");

        let e = Error::setup("vaapi", "vaInitialize returned 1");
        assert_eq!(format!("{e}"), "vaapi setup failed: vaInitialize returned 1");

        let e = Error::surface("pool exhausted");
        assert_eq!(format!("{e}"), "surface error: pool exhausted");

        let e = Error::unsupported("EGL_EXT_image_dma_buf_import");
        assert_eq!(format!("{e}"), "unsupported: EGL_EXT_image_dma_buf_import");

        let e = Error::Eof;
        assert_eq!(format!("{e}"), "end of stream");
    }

    #[test]
    fn error_categories() {
        assert_eq!(Error::setup("cuda", "x").category(), ErrorCategory::Setup);
        assert_eq!(Error::surface("x").category(), ErrorCategory::Frame);
        assert_eq!(
            Error::unsupported_format("x").category(),
            ErrorCategory::Format
        );
        assert_eq!(Error::unsupported("x").category(), ErrorCategory::Unsupported);
        assert_eq!(Error::invalid_data("x").category(), ErrorCategory::Codec);
        assert_eq!(Error::Eof.category(), ErrorCategory::Eof);
    }

    #[test]
    fn error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "libva.so.2");
        let e: Error = io_err.into();
        assert!(matches!(e, Error::Io(_)));
        assert!(StdError::source(&e).is_some());
        assert!(StdError::source(&Error::Eof).is_none());
    }
}
