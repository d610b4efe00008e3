//! Serializable canvas settings.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::coords::HostKind;
use crate::error::ConfigError;
use crate::streaming::ring::MIN_RING_SIZE;
use crate::streaming::sink::PixelFormat;

/// Stream destination used when the host asks for streaming without a path.
pub const DEFAULT_STREAM_PATH: &str = "/tmp/bge";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CanvasConfig {
    /// Offscreen resolution; `None` draws straight to the window
    pub rendering_resolution: Option<(i32, i32)>,
    /// Start streaming to this path right away
    pub stream_path: Option<PathBuf>,
    pub stream_format: PixelFormat,
    pub ring_size: usize,
    pub swap_interval: Option<i32>,
    pub clear_color: [f32; 4],
    pub host: HostKind,
}

impl Default for CanvasConfig {
    fn default() -> Self {
        Self {
            rendering_resolution: None,
            stream_path: None,
            stream_format: PixelFormat::Rgba8,
            ring_size: MIN_RING_SIZE,
            swap_interval: None,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            host: HostKind::Standalone,
        }
    }
}

impl CanvasConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Ring size clamped to the double-buffering minimum.
    pub fn effective_ring_size(&self) -> usize {
        self.ring_size.max(MIN_RING_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let config = CanvasConfig::from_json_str(r#"{ "rendering_resolution": [640, 480] }"#)
            .expect("valid config");
        assert_eq!(config.rendering_resolution, Some((640, 480)));
        assert_eq!(config.stream_format, PixelFormat::Rgba8);
        assert_eq!(config.host, HostKind::Standalone);
    }

    #[test]
    fn embedded_host_and_rgb_stream() {
        let config = CanvasConfig::from_json_str(
            r#"{
                "stream_path": "/tmp/canvas",
                "stream_format": "rgb8",
                "ring_size": 1,
                "host": { "kind": "embedded", "region_left": 4, "region_top": 700 }
            }"#,
        )
        .expect("valid config");
        assert_eq!(config.stream_path.as_deref(), Some(Path::new("/tmp/canvas")));
        assert_eq!(config.stream_format, PixelFormat::Rgb8);
        assert_eq!(config.effective_ring_size(), 2);
        assert_eq!(
            config.host,
            HostKind::Embedded {
                region_left: 4,
                region_top: 700
            }
        );
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let err = CanvasConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
