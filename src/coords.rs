//! Mapping between host-window pointer coordinates and the canvas.
//!
//! Host coordinates have their origin at the top-left of the host window with
//! Y growing downward. Canvas-local pointer coordinates are measured from the
//! top-left corner of the active area, so pointer Y still grows downward;
//! rendering coordinates (rects, viewports) use a bottom-left origin.

use serde::{Deserialize, Serialize};

use crate::rect::Rect;

/// How the canvas sits inside its host window.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HostKind {
    /// Embedded in a region of a larger editor window. `region_left` and
    /// `region_top` are the region's window-relative edges.
    Embedded { region_left: i32, region_top: i32 },
    /// The canvas owns the whole client area of its window.
    #[default]
    Standalone,
}

/// Pure coordinate conversions for one canvas state. Build a fresh mapper
/// whenever the frame or area rect changes; it holds copies, not references.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CoordinateMapper {
    host: HostKind,
    frame: Rect,
    area: Rect,
    width: i32,
    height: i32,
}

impl CoordinateMapper {
    /// `width`/`height` are the canvas extent pointer coordinates are
    /// normalized against (the render target size when drawing offscreen).
    pub fn new(host: HostKind, frame: Rect, area: Rect, width: i32, height: i32) -> Self {
        Self {
            host,
            frame,
            area,
            width,
            height,
        }
    }

    pub fn to_canvas_x(&self, host_x: i32) -> i32 {
        match self.host {
            HostKind::Embedded { region_left, .. } => host_x.saturating_sub(self.area.left().saturating_sub(region_left)),
            HostKind::Standalone => host_x,
        }
    }

    pub fn to_canvas_y(&self, host_y: i32) -> i32 {
        match self.host {
            HostKind::Embedded { region_top, .. } => host_y.saturating_sub(region_top.saturating_sub(self.area.top())),
            HostKind::Standalone => host_y,
        }
    }

    /// Canvas-local position divided by the canvas extent. Points outside the
    /// canvas fall outside `[0, 1]`; clamp at the call site if that matters.
    pub fn to_normalized(&self, host_x: i32, host_y: i32) -> (f32, f32) {
        (
            normalize(self.to_canvas_x(host_x), self.width),
            normalize(self.to_canvas_y(host_y), self.height),
        )
    }

    /// Host-window position for a cursor warp to canvas position `(x, y)`,
    /// where `(0, 0)` is the top-left and `(width, height)` the bottom-right.
    pub fn warp_position(&self, x: i32, y: i32) -> (i32, i32) {
        match self.host {
            HostKind::Embedded { .. } => (
                self.frame.left().saturating_add(x),
                self.frame
                    .bottom()
                    .saturating_add(self.frame.height().saturating_sub(y)),
            ),
            HostKind::Standalone => (x, y),
        }
    }

    pub fn extent(&self) -> (i32, i32) {
        (self.width, self.height)
    }
}

fn normalize(value: i32, extent: i32) -> f32 {
    if extent == 0 {
        0.0
    } else {
        value as f32 / extent as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standalone_is_identity() {
        let frame = Rect::new(0, 0, 799, 599);
        let m = CoordinateMapper::new(HostKind::Standalone, frame, frame, 800, 600);
        assert_eq!((m.to_canvas_x(17), m.to_canvas_y(42)), (17, 42));
        assert_eq!(m.to_normalized(400, 300), (0.5, 0.5));
    }

    #[test]
    fn embedded_subtracts_region_offsets() {
        let frame = Rect::new(100, 50, 739, 529);
        let area = Rect::new(120, 60, 719, 509);
        let host = HostKind::Embedded {
            region_left: 100,
            region_top: 529,
        };
        let m = CoordinateMapper::new(host, frame, area, 600, 450);
        assert_eq!(m.to_canvas_x(120), 100);
        assert_eq!(m.to_canvas_y(20), 0);
    }

    #[test]
    fn zero_extent_normalizes_to_zero() {
        let frame = Rect::new(0, 0, 9, 9);
        let m = CoordinateMapper::new(HostKind::Standalone, frame, frame, 0, 0);
        assert_eq!(m.to_normalized(5, 5), (0.0, 0.0));
    }
}
