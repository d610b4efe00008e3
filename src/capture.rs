//! Synchronous frame capture and screenshot encoding.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::error::{CanvasError, CodecError};
use crate::gpu::GraphicsDevice;
use crate::rect::Rect;

/// Pixels read back from the presented buffer: RGBA8, rows top to bottom.
#[derive(Clone, PartialEq, Eq)]
pub struct CapturedFrame {
    pub pixels: Vec<[u8; 4]>,
    pub width: u32,
    pub height: u32,
}

impl std::fmt::Debug for CapturedFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapturedFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("pixels", &self.pixels.len())
            .finish()
    }
}

impl CapturedFrame {
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Pixel at column `x` of row `y`, counting rows from the top.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels
            .get(y as usize * self.width as usize + x as usize)
            .copied()
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.pixels)
    }
}

/// Blocking readback of the presented image.
#[derive(Debug, Default, Clone, Copy)]
pub struct CaptureService;

impl CaptureService {
    /// Reads `frame` out of the presented buffer. All submitted GPU work,
    /// including in-flight streaming copies, completes before the read.
    pub fn capture_frame<D: GraphicsDevice + ?Sized>(
        device: &mut D,
        frame: &Rect,
    ) -> Result<CapturedFrame, CanvasError> {
        let (width, height) = frame.extent().ok_or(CanvasError::EmptyCapture)?;
        device.finish();
        let pixels = device.read_front_buffer(*frame)?;
        log::debug!("captured {width}x{height} frame");
        Ok(CapturedFrame {
            pixels,
            width,
            height,
        })
    }
}

/// Image file encoder used by screenshots.
pub trait ImageCodec {
    /// File extension, without the dot.
    fn extension(&self) -> &str;

    fn encode(&self, frame: &CapturedFrame, path: &Path) -> Result<(), CodecError>;

    /// `path` with this codec's extension appended unless it already ends in it.
    fn output_path(&self, path: &Path) -> PathBuf {
        let ext = self.extension();
        let has_ext = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(ext));
        if has_ext {
            return path.to_path_buf();
        }
        let mut name = OsString::from(path.as_os_str());
        name.push(".");
        name.push(ext);
        PathBuf::from(name)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PngCodec;

impl ImageCodec for PngCodec {
    fn extension(&self) -> &str {
        "png"
    }

    fn encode(&self, frame: &CapturedFrame, path: &Path) -> Result<(), CodecError> {
        if frame.pixels.len() != frame.pixel_count() {
            return Err(CodecError::SizeMismatch {
                expected: frame.pixel_count(),
                actual: frame.pixels.len(),
            });
        }
        image::save_buffer_with_format(
            path,
            frame.as_bytes(),
            frame.width,
            frame.height,
            image::ColorType::Rgba8,
            image::ImageFormat::Png,
        )?;
        Ok(())
    }
}

/// Captures `frame` and writes it through `codec`. Returns the written path.
pub fn make_screenshot<D: GraphicsDevice + ?Sized>(
    device: &mut D,
    frame: &Rect,
    path: &Path,
    codec: &dyn ImageCodec,
) -> Result<PathBuf, CanvasError> {
    let captured = CaptureService::capture_frame(device, frame)?;
    let path = codec.output_path(path);
    codec.encode(&captured, &path)?;
    log::info!("screenshot written to {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_is_appended_once() {
        let codec = PngCodec;
        assert_eq!(codec.output_path(Path::new("shot")), PathBuf::from("shot.png"));
        assert_eq!(codec.output_path(Path::new("shot.PNG")), PathBuf::from("shot.PNG"));
        assert_eq!(
            codec.output_path(Path::new("frame.0001")),
            PathBuf::from("frame.0001.png")
        );
    }

    #[test]
    fn pixel_lookup_is_row_major_from_top() {
        let frame = CapturedFrame {
            pixels: vec![[1, 0, 0, 255], [2, 0, 0, 255], [3, 0, 0, 255], [4, 0, 0, 255]],
            width: 2,
            height: 2,
        };
        assert_eq!(frame.pixel(1, 0), Some([2, 0, 0, 255]));
        assert_eq!(frame.pixel(0, 1), Some([3, 0, 0, 255]));
        assert_eq!(frame.pixel(2, 0), None);
        assert_eq!(frame.as_bytes().len(), 16);
    }
}
