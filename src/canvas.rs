//! The canvas: one drawable surface inside a host window, optionally
//! rendered offscreen at its own resolution and streamed out frame by frame.
//!
//! A frame looks like
//!
//! ```text
//! begin_draw -> (host draws) -> end_draw -> swap_buffers
//!                                             |- blit offscreen -> default
//!                                             |- streaming step
//!                                             '- present + window swap
//! ```

use std::path::{Path, PathBuf};

use crate::capture::{self, CaptureService, CapturedFrame, ImageCodec};
use crate::config::{CanvasConfig, DEFAULT_STREAM_PATH};
use crate::coords::{CoordinateMapper, HostKind};
use crate::error::Result;
use crate::gpu::{ClearMask, DrawTarget, GraphicsDevice};
use crate::rect::Rect;
use crate::render_target::RenderTarget;
use crate::streaming::{
    NullSink, PixelFormat, StreamSink, StreamState, StreamStats, StreamingPipeline,
};
use crate::viewport::{Viewport, ViewportController, ViewportProbe};
use crate::window::{CursorShape, MouseState, WindowSystem};

pub struct Canvas<D: GraphicsDevice, W: WindowSystem> {
    device: D,
    window: W,
    host: HostKind,
    /// Canvas placement in the host window
    frame_rect: Rect,
    /// Active drawing area, moved by `set_viewport`
    area_rect: Rect,
    target: RenderTarget,
    viewport: ViewportController,
    probe: Option<Box<dyn ViewportProbe>>,
    streaming: StreamingPipeline,
    mouse_state: MouseState,
}

impl<D: GraphicsDevice, W: WindowSystem> Canvas<D, W> {
    pub fn new(device: D, window: W, host: HostKind, frame_rect: Rect) -> Self {
        let initial = device
            .current_viewport()
            .unwrap_or_else(|| Viewport::from_inclusive(&frame_rect));
        Self {
            device,
            window,
            host,
            frame_rect,
            area_rect: frame_rect,
            target: RenderTarget::new(),
            viewport: ViewportController::new(initial),
            probe: None,
            streaming: StreamingPipeline::default(),
            mouse_state: MouseState::Normal,
        }
    }

    /// Builds a canvas and applies `config`. Streaming starts disabled
    /// unless the config names a path.
    pub fn from_config(device: D, window: W, frame_rect: Rect, config: &CanvasConfig) -> Self {
        let mut canvas = Self::new(device, window, config.host, frame_rect);
        canvas.streaming = StreamingPipeline::new(
            Box::new(NullSink),
            config.stream_format,
            config.effective_ring_size(),
        );
        let [r, g, b, a] = config.clear_color;
        canvas.clear_color(r, g, b, a);
        if let Some((width, height)) = config.rendering_resolution {
            canvas.set_rendering_resolution(width, height);
        }
        if let Some(interval) = config.swap_interval {
            canvas.set_swap_interval(interval);
        }
        if let Some(path) = &config.stream_path {
            canvas.enable_streaming(path.clone());
        }
        canvas
    }

    /// Resets the viewport to cover the whole frame.
    pub fn init(&mut self) {
        let width = self.frame_rect.width();
        let height = self.frame_rect.height();
        self.set_viewport(0, 0, width.saturating_sub(1), height.saturating_sub(1));
    }

    /// Offscreen resolution. Non-positive sizes are ignored; a change frees
    /// the current target and transfer ring, the next frame reallocates.
    pub fn set_rendering_resolution(&mut self, width: i32, height: i32) {
        if self.target.configure(&mut self.device, width, height) {
            self.streaming.invalidate(&mut self.device);
        }
    }

    /// Makes the context current and binds where this frame should be drawn:
    /// the offscreen target when it is usable, the default target otherwise.
    pub fn begin_draw(&mut self) -> DrawTarget {
        self.window.make_current();
        if self.target.is_configured() {
            self.target.ensure_ready(&mut self.device);
        }
        self.target.bind(&mut self.device)
    }

    pub fn end_draw(&mut self) {
        log::trace!("frame drawn into {:?}", self.device.draw_target());
    }

    /// Resolves the offscreen image into the window, runs the streaming step
    /// and presents.
    pub fn swap_buffers(&mut self) {
        if let (Some(framebuffer), Some(src)) = (self.target.framebuffer(), self.target.rect()) {
            self.device.bind_draw_target(DrawTarget::Default);
            if let Err(err) = self.device.blit_to_default(framebuffer, src, self.frame_rect) {
                log::warn!("offscreen resolve failed: {err}");
            }
            self.streaming.on_frame_presented(&mut self.device, &self.target);
        }
        self.device.present();
        self.window.swap_buffers();
    }

    /// Activates the inclusive range `(x1, y1)..=(x2, y2)` relative to the
    /// frame origin.
    pub fn set_viewport(&mut self, x1: i32, y1: i32, x2: i32, y2: i32) -> Viewport {
        self.viewport.set_viewport(
            &mut self.device,
            &self.frame_rect,
            &mut self.area_rect,
            x1,
            y1,
            x2,
            y2,
        )
    }

    /// Records a viewport the host set on the GPU itself.
    pub fn update_viewport(&mut self, x: i32, y: i32, width: i32, height: i32) {
        self.viewport.update_viewport(Viewport::new(x, y, width, height));
    }

    pub fn viewport(&self) -> Viewport {
        match &self.probe {
            Some(probe) => self.viewport.viewport(probe.as_ref()),
            None => self.viewport.viewport(&self.device),
        }
    }

    /// Replaces the device as the source of truth for the debug viewport
    /// check.
    pub fn set_viewport_probe(&mut self, probe: Box<dyn ViewportProbe>) {
        self.probe = Some(probe);
    }

    pub fn capture_frame(&mut self) -> Result<CapturedFrame> {
        CaptureService::capture_frame(&mut self.device, &self.frame_rect)
    }

    /// Captures the visible frame and writes it through `codec`, which
    /// appends its extension to `path`. Returns the written file.
    pub fn make_screenshot(
        &mut self,
        path: impl AsRef<Path>,
        codec: &dyn ImageCodec,
    ) -> Result<PathBuf> {
        capture::make_screenshot(&mut self.device, &self.frame_rect, path.as_ref(), codec)
    }

    pub fn width(&self) -> i32 {
        self.target
            .dimensions()
            .map_or(self.frame_rect.width(), |(w, _)| w)
    }

    pub fn height(&self) -> i32 {
        self.target
            .dimensions()
            .map_or(self.frame_rect.height(), |(_, h)| h)
    }

    /// Resizes the frame rect in place and resets the viewport and area to
    /// cover it.
    pub fn resize(&mut self, width: i32, height: i32) {
        self.frame_rect.resize(width, height);
        self.init();
    }

    /// Resizes the frame rect to the window's current client area.
    pub fn resize_to_window(&mut self) {
        let (width, height) = self.window.client_size();
        self.resize(
            i32::try_from(width).unwrap_or(i32::MAX),
            i32::try_from(height).unwrap_or(i32::MAX),
        );
    }

    pub fn frame_rect(&self) -> Rect {
        self.frame_rect
    }

    /// Moves the canvas within its host and resets the viewport to the full
    /// frame.
    pub fn set_frame_rect(&mut self, frame_rect: Rect) {
        self.frame_rect = frame_rect;
        self.init();
    }

    pub fn area_rect(&self) -> Rect {
        self.area_rect
    }

    pub fn clear_color(&mut self, r: f32, g: f32, b: f32, a: f32) {
        self.device.set_clear_color([r, g, b, a]);
    }

    pub fn clear_buffer(&mut self, mask: ClearMask) {
        if !mask.is_empty() {
            self.device.clear(mask);
        }
    }

    pub fn set_swap_interval(&mut self, interval: i32) -> bool {
        let accepted = self.window.set_swap_interval(interval);
        if !accepted {
            log::warn!("swap interval {interval} rejected by the window system");
        }
        accepted
    }

    pub fn swap_interval(&self) -> Option<i32> {
        self.window.swap_interval()
    }

    pub fn set_mouse_state(&mut self, state: MouseState) {
        self.mouse_state = state;
        match state {
            MouseState::Invisible => self.window.set_cursor_visible(false),
            MouseState::Wait => {
                self.window.set_cursor_shape(CursorShape::Wait);
                self.window.set_cursor_visible(true);
            }
            MouseState::Normal => {
                self.window.set_cursor_shape(CursorShape::Default);
                self.window.set_cursor_visible(true);
            }
        }
    }

    pub fn mouse_state(&self) -> MouseState {
        self.mouse_state
    }

    /// Warps the pointer to canvas position `(x, y)`.
    pub fn set_mouse_position(&mut self, x: i32, y: i32) {
        let (wx, wy) = self.mapper().warp_position(x, y);
        self.window.warp_cursor(wx, wy);
    }

    /// Coordinate mapper for the current frame, area and canvas size.
    pub fn mapper(&self) -> CoordinateMapper {
        CoordinateMapper::new(
            self.host,
            self.frame_rect,
            self.area_rect,
            self.width(),
            self.height(),
        )
    }

    pub fn mouse_x(&self, host_x: i32) -> i32 {
        self.mapper().to_canvas_x(host_x)
    }

    pub fn mouse_y(&self, host_y: i32) -> i32 {
        self.mapper().to_canvas_y(host_y)
    }

    pub fn mouse_normalized(&self, host_x: i32, host_y: i32) -> (f32, f32) {
        self.mapper().to_normalized(host_x, host_y)
    }

    pub fn host(&self) -> HostKind {
        self.host
    }

    /// Starts streaming to `path`; an empty path streams to
    /// [`DEFAULT_STREAM_PATH`].
    pub fn set_shared_memory_path(&mut self, path: &str) {
        let path = if path.is_empty() { DEFAULT_STREAM_PATH } else { path };
        self.enable_streaming(path);
    }

    pub fn enable_streaming(&mut self, path: impl Into<PathBuf>) {
        self.streaming.enable(path);
    }

    pub fn disable_streaming(&mut self) {
        self.streaming.disable(&mut self.device);
    }

    pub fn set_stream_sink(&mut self, sink: Box<dyn StreamSink>) {
        self.streaming.set_sink(sink);
    }

    pub fn set_stream_format(&mut self, format: PixelFormat) {
        self.streaming.set_pixel_format(format);
    }

    pub fn stream_state(&self) -> StreamState {
        self.streaming.state()
    }

    pub fn stream_stats(&self) -> StreamStats {
        self.streaming.stats()
    }

    pub fn streaming(&self) -> &StreamingPipeline {
        &self.streaming
    }

    pub fn render_target(&self) -> &RenderTarget {
        &self.target
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn window(&self) -> &W {
        &self.window
    }

    pub fn window_mut(&mut self) -> &mut W {
        &mut self.window
    }

    /// Frees the offscreen target, then stops streaming and frees the ring.
    /// Idempotent; also runs on drop.
    pub fn destroy(&mut self) {
        self.target.destroy(&mut self.device);
        self.streaming.disable(&mut self.device);
    }
}

impl<D: GraphicsDevice, W: WindowSystem> Drop for Canvas<D, W> {
    fn drop(&mut self) {
        self.destroy();
    }
}
