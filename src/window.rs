//! Window-system services the canvas needs from its host: cursor control,
//! context activation and buffer swaps.

#[cfg(feature = "winit-window")]
pub mod winit_window;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MouseState {
    Invisible,
    /// Busy cursor
    Wait,
    #[default]
    Normal,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CursorShape {
    #[default]
    Default,
    Wait,
}

pub trait WindowSystem {
    /// Client area size in pixels.
    fn client_size(&self) -> (u32, u32);

    fn set_cursor_visible(&mut self, visible: bool);

    fn set_cursor_shape(&mut self, shape: CursorShape);

    /// Moves the pointer to `(x, y)` in window coordinates.
    fn warp_cursor(&mut self, x: i32, y: i32);

    /// Makes the window's graphics context current on this thread.
    fn make_current(&mut self);

    fn swap_buffers(&mut self);

    /// Requests a vsync interval. Returns `false` if the window system
    /// rejected it.
    fn set_swap_interval(&mut self, interval: i32) -> bool;

    fn swap_interval(&self) -> Option<i32>;
}

/// Window system for hosts without a visible window. Records what the canvas
/// asked of it.
#[derive(Debug, Clone)]
pub struct HeadlessWindow {
    size: (u32, u32),
    cursor_visible: bool,
    cursor_shape: CursorShape,
    cursor_position: Option<(i32, i32)>,
    swap_interval: Option<i32>,
    swaps: u64,
    activations: u64,
}

impl HeadlessWindow {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            size: (width, height),
            cursor_visible: true,
            cursor_shape: CursorShape::Default,
            cursor_position: None,
            swap_interval: None,
            swaps: 0,
            activations: 0,
        }
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.size = (width, height);
    }

    pub fn cursor_visible(&self) -> bool {
        self.cursor_visible
    }

    pub fn cursor_shape(&self) -> CursorShape {
        self.cursor_shape
    }

    /// Last warp target, if the cursor was ever warped.
    pub fn cursor_position(&self) -> Option<(i32, i32)> {
        self.cursor_position
    }

    pub fn swaps(&self) -> u64 {
        self.swaps
    }

    pub fn activations(&self) -> u64 {
        self.activations
    }
}

impl WindowSystem for HeadlessWindow {
    fn client_size(&self) -> (u32, u32) {
        self.size
    }

    fn set_cursor_visible(&mut self, visible: bool) {
        self.cursor_visible = visible;
    }

    fn set_cursor_shape(&mut self, shape: CursorShape) {
        self.cursor_shape = shape;
    }

    fn warp_cursor(&mut self, x: i32, y: i32) {
        self.cursor_position = Some((x, y));
    }

    fn make_current(&mut self) {
        self.activations += 1;
    }

    fn swap_buffers(&mut self) {
        self.swaps += 1;
    }

    fn set_swap_interval(&mut self, interval: i32) -> bool {
        self.swap_interval = Some(interval);
        true
    }

    fn swap_interval(&self) -> Option<i32> {
        self.swap_interval
    }
}
