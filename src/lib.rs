pub mod canvas;
pub mod capture;
pub mod config;
pub mod coords;
pub mod error;
pub mod gpu;
pub mod rect;
pub mod render_target;
pub mod viewport;
pub mod window;
pub mod backends {
    pub mod software;
    #[cfg(feature = "backend-wgpu")]
    pub mod wgpu;
}
pub mod streaming {
    pub mod pipeline;
    pub mod ring;
    pub mod sink;

    pub use pipeline::{StreamState, StreamStats, StreamingPipeline};
    pub use ring::PixelTransferRing;
    pub use sink::{FileSink, NullSink, PixelFormat, SinkConnection, StreamFormat, StreamSink};
}

pub use canvas::Canvas;
pub use capture::{CaptureService, CapturedFrame, ImageCodec, PngCodec};
pub use config::CanvasConfig;
pub use coords::{CoordinateMapper, HostKind};
pub use error::{CanvasError, Result};
pub use gpu::{ClearMask, DrawTarget, GraphicsDevice};
pub use rect::Rect;
pub use render_target::RenderTarget;
pub use viewport::{Viewport, ViewportController, ViewportProbe};
pub use window::{HeadlessWindow, MouseState, WindowSystem};
