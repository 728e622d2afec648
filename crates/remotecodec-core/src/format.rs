//! Stream format descriptors and output targets.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Media kind and its kind-specific parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MediaKind {
    Video { width: u32, height: u32 },
    Audio { sample_rate: u32, channel_count: u32 },
}

impl MediaKind {
    /// Top-level mime type this kind expects (`video` or `audio`).
    pub const fn mime_prefix(&self) -> &'static str {
        match self {
            Self::Video { .. } => "video/",
            Self::Audio { .. } => "audio/",
        }
    }
}

/// Describes the encoded stream a session decodes.
///
/// Immutable for the lifetime of a session; a different format needs a new
/// session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FormatDescriptor {
    pub mime: String,
    #[serde(flatten)]
    pub kind: MediaKind,
}

impl FormatDescriptor {
    pub fn video(mime: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            mime: mime.into(),
            kind: MediaKind::Video { width, height },
        }
    }

    pub fn audio(mime: impl Into<String>, sample_rate: u32, channel_count: u32) -> Self {
        Self {
            mime: mime.into(),
            kind: MediaKind::Audio {
                sample_rate,
                channel_count,
            },
        }
    }

    /// Check the mime is present and agrees with the media kind.
    pub fn validate(&self) -> Result<()> {
        if self.mime.is_empty() {
            return Err(Error::BadMime("mime type is empty".into()));
        }
        let prefix = self.kind.mime_prefix();
        if !self.mime.starts_with(prefix) || self.mime.len() == prefix.len() {
            return Err(Error::BadMime(format!(
                "{} does not describe a {} stream",
                self.mime,
                prefix.trim_end_matches('/')
            )));
        }
        Ok(())
    }

    pub const fn is_video(&self) -> bool {
        matches!(self.kind, MediaKind::Video { .. })
    }

    pub const fn is_audio(&self) -> bool {
        matches!(self.kind, MediaKind::Audio { .. })
    }
}

impl fmt::Display for FormatDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            MediaKind::Video { width, height } => write!(f, "{} {width}x{height}", self.mime),
            MediaKind::Audio {
                sample_rate,
                channel_count,
            } => write!(f, "{} {sample_rate}Hz/{channel_count}ch", self.mime),
        }
    }
}

/// Where decoded output is released to.
///
/// Opaque to the protocol: the decoding capability interprets the name (a
/// surface, a sink). `None` means output is consumed without rendering.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutputTarget {
    pub name: Option<String>,
}

impl OutputTarget {
    pub const fn none() -> Self {
        Self { name: None }
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
        }
    }

    pub const fn renders(&self) -> bool {
        self.name.is_some()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn valid_video_and_audio_formats() {
        FormatDescriptor::video("video/avc", 640, 360)
            .validate()
            .unwrap();
        FormatDescriptor::audio("audio/mp4a-latm", 44_100, 2)
            .validate()
            .unwrap();
    }

    #[test]
    fn empty_mime_is_bad() {
        let err = FormatDescriptor::video("", 640, 360).validate().unwrap_err();
        assert!(matches!(err, Error::BadMime(_)));
    }

    #[test]
    fn mismatched_kind_is_bad() {
        let err = FormatDescriptor::audio("video/avc", 48_000, 2)
            .validate()
            .unwrap_err();
        assert!(matches!(err, Error::BadMime(_)));

        let err = FormatDescriptor::video("video/", 1, 1).validate().unwrap_err();
        assert!(matches!(err, Error::BadMime(_)));
    }

    #[test]
    fn format_round_trips_through_json() {
        let format = FormatDescriptor::video("video/avc", 640, 360);
        let json = serde_json::to_string(&format).unwrap();
        assert!(json.contains("\"kind\":\"video\""));
        let back: FormatDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(back, format);
    }

    #[test]
    fn display_includes_dimensions() {
        assert_eq!(
            FormatDescriptor::video("video/avc", 640, 360).to_string(),
            "video/avc 640x360"
        );
        assert_eq!(
            FormatDescriptor::audio("audio/opus", 48_000, 2).to_string(),
            "audio/opus 48000Hz/2ch"
        );
    }
}
