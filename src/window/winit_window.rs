use std::sync::Arc;

use winit::dpi::PhysicalPosition;
use winit::window::{CursorIcon, Window};

use super::{CursorShape, WindowSystem};

/// [`WindowSystem`] backed by a winit window. Presentation itself belongs to
/// the surface owner; swaps only notify winit that a frame is going out.
pub struct WinitWindow {
    window: Arc<Window>,
    swap_interval: Option<i32>,
}

impl WinitWindow {
    pub fn new(window: Arc<Window>) -> Self {
        Self {
            window,
            swap_interval: None,
        }
    }

    pub fn window(&self) -> &Window {
        &self.window
    }
}

impl WindowSystem for WinitWindow {
    fn client_size(&self) -> (u32, u32) {
        let size = self.window.inner_size();
        (size.width, size.height)
    }

    fn set_cursor_visible(&mut self, visible: bool) {
        self.window.set_cursor_visible(visible);
    }

    fn set_cursor_shape(&mut self, shape: CursorShape) {
        let icon = match shape {
            CursorShape::Default => CursorIcon::Default,
            CursorShape::Wait => CursorIcon::Wait,
        };
        self.window.set_cursor(icon);
    }

    fn warp_cursor(&mut self, x: i32, y: i32) {
        if let Err(err) = self.window.set_cursor_position(PhysicalPosition::new(x, y)) {
            log::warn!("cursor warp to ({x}, {y}) failed: {err}");
        }
    }

    fn make_current(&mut self) {}

    fn swap_buffers(&mut self) {
        self.window.pre_present_notify();
        self.window.request_redraw();
    }

    fn set_swap_interval(&mut self, interval: i32) -> bool {
        // winit has no vsync control; the surface's present mode decides
        log::debug!("swap interval {interval} recorded for the surface owner");
        self.swap_interval = Some(interval);
        true
    }

    fn swap_interval(&self) -> Option<i32> {
        self.swap_interval
    }
}
