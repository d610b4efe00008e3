//! Stream sink protocol and the sinks shipped with the crate.
//!
//! A sink is opened against a destination path, negotiated for one
//! [`StreamFormat`], fed frames, and closed. The pipeline reopens it whenever
//! the format changes.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::SinkError;

/// Pixel layout of streamed frames. Frames leave the GPU as RGBA8; `Rgb8`
/// drops the alpha channel on the host before pushing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    #[default]
    Rgba8,
    Rgb8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgba8 => 4,
            PixelFormat::Rgb8 => 3,
        }
    }

    /// Converts tightly packed RGBA8 into this layout, replacing `out`.
    pub fn repack_rgba(self, rgba: &[u8], out: &mut Vec<u8>) {
        out.clear();
        match self {
            PixelFormat::Rgba8 => out.extend_from_slice(rgba),
            PixelFormat::Rgb8 => {
                out.reserve(rgba.len() / 4 * 3);
                for px in rgba.chunks_exact(4) {
                    out.extend_from_slice(&px[..3]);
                }
            }
        }
    }

    /// Raw-video caps describing frames of this layout, big-endian masks.
    pub fn caps(self, width: u32, height: u32) -> String {
        let (bpp, red, green, blue) = match self {
            PixelFormat::Rgba8 => (32, -16777216i64, 16711680i64, 65280i64),
            PixelFormat::Rgb8 => (24, 16711680, 65280, 255),
        };
        format!(
            "video/x-raw-rgb,bpp={bpp},endianness=4321,depth={bpp},red_mask={red},green_mask={green},blue_mask={blue},width={width},height={height},framerate=60/1"
        )
    }
}

/// What a sink connection was negotiated for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StreamFormat {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
}

impl StreamFormat {
    pub fn new(width: u32, height: u32, pixel_format: PixelFormat) -> Self {
        Self {
            width,
            height,
            pixel_format,
        }
    }

    /// Size in bytes of one frame.
    pub fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * self.pixel_format.bytes_per_pixel()
    }

    pub fn caps(&self) -> String {
        self.pixel_format.caps(self.width, self.height)
    }
}

/// Factory side of a sink: opens connections to a destination.
pub trait StreamSink {
    fn open(&mut self, path: &Path) -> Result<Box<dyn SinkConnection>, SinkError>;
}

/// One open connection to a sink.
pub trait SinkConnection {
    fn negotiate(&mut self, format: &StreamFormat) -> Result<(), SinkError>;

    /// Hands over one frame. Fire-and-forget: no acknowledgment is expected.
    fn push(&mut self, frame: &[u8]) -> Result<(), SinkError>;

    fn close(self: Box<Self>);
}

/// Sink that accepts everything and keeps nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

struct NullConnection;

impl StreamSink for NullSink {
    fn open(&mut self, _path: &Path) -> Result<Box<dyn SinkConnection>, SinkError> {
        Ok(Box::new(NullConnection))
    }
}

impl SinkConnection for NullConnection {
    fn negotiate(&mut self, _format: &StreamFormat) -> Result<(), SinkError> {
        Ok(())
    }

    fn push(&mut self, _frame: &[u8]) -> Result<(), SinkError> {
        Ok(())
    }

    fn close(self: Box<Self>) {}
}

/// Writes the stream to a file: one caps line per negotiation followed by
/// raw frames back to back.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileSink;

struct FileConnection {
    path: PathBuf,
    writer: BufWriter<File>,
    frame_len: Option<usize>,
}

impl StreamSink for FileSink {
    fn open(&mut self, path: &Path) -> Result<Box<dyn SinkConnection>, SinkError> {
        let file = File::create(path).map_err(|e| SinkError::Open {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        log::debug!("file sink opened at {}", path.display());
        Ok(Box::new(FileConnection {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            frame_len: None,
        }))
    }
}

impl SinkConnection for FileConnection {
    fn negotiate(&mut self, format: &StreamFormat) -> Result<(), SinkError> {
        if format.frame_len() == 0 {
            return Err(SinkError::Negotiate(format!(
                "empty frame format {}x{}",
                format.width, format.height
            )));
        }
        writeln!(self.writer, "{}", format.caps())?;
        self.frame_len = Some(format.frame_len());
        Ok(())
    }

    fn push(&mut self, frame: &[u8]) -> Result<(), SinkError> {
        match self.frame_len {
            Some(len) if len == frame.len() => {
                self.writer.write_all(frame)?;
                Ok(())
            }
            Some(len) => Err(SinkError::Push(format!(
                "frame is {} bytes, negotiated {len}",
                frame.len()
            ))),
            None => Err(SinkError::Push("push before negotiation".to_string())),
        }
    }

    fn close(mut self: Box<Self>) {
        if let Err(err) = self.writer.flush() {
            log::warn!("flushing {} failed: {err}", self.path.display());
        }
    }
}
