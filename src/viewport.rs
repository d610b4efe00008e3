//! Viewport state for the canvas.
//!
//! A [`Viewport`] mirrors the GPU's active drawing sub-rectangle: origin
//! `(x, y)` in canvas coordinates (bottom-left origin, Y up) plus a size.
//! [`ViewportController`] keeps the cached copy in sync with the device and
//! the canvas' area rect.
//!
//! ```
//! use render_canvas::rect::Rect;
//! use render_canvas::viewport::Viewport;
//!
//! let vp = Viewport::from_inclusive(&Rect::new(0, 0, 319, 239));
//! assert_eq!(vp, Viewport::new(0, 0, 320, 240));
//! ```

use crate::gpu::GraphicsDevice;
use crate::rect::Rect;

/// The GPU's active viewport. Values are kept signed so a degenerate
/// caller-supplied viewport is representable rather than wrapped.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Viewport {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl std::fmt::Debug for Viewport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Viewport {{ x: {}, y: {}, width: {}, height: {} }}",
            self.x, self.y, self.width, self.height
        )
    }
}

impl Viewport {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Viewport covering every pixel of an inclusive rect.
    pub fn from_inclusive(rect: &Rect) -> Self {
        Self::new(rect.left(), rect.bottom(), rect.width(), rect.height())
    }

    pub fn is_degenerate(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    /// Returns `width / height`, or `0.0` for a zero height.
    pub fn aspect_ratio(&self) -> f32 {
        if self.height == 0 {
            0.0
        } else {
            self.width as f32 / self.height as f32
        }
    }
}

/// Reports the viewport the GPU currently has active.
///
/// Debug builds compare this against the canvas' cached viewport. Tests and
/// hosts without a queryable context substitute their own implementation.
pub trait ViewportProbe {
    fn current_viewport(&self) -> Option<Viewport>;
}

/// Probe that never reports anything, disabling the debug cross-check.
#[derive(Debug, Default, Clone, Copy)]
pub struct TrustCachedViewport;

impl ViewportProbe for TrustCachedViewport {
    fn current_viewport(&self) -> Option<Viewport> {
        None
    }
}

/// Owns the cached viewport and applies viewport changes to the device.
#[derive(Debug, Clone)]
pub struct ViewportController {
    viewport: Viewport,
}

impl ViewportController {
    pub fn new(initial: Viewport) -> Self {
        Self { viewport: initial }
    }

    /// Activates the inclusive pixel range `(x1, y1)..=(x2, y2)`, given
    /// relative to the frame rect's origin.
    ///
    /// `area` is rewritten in host-window space and the device receives the
    /// matching viewport and clip rectangle. `x2 < x1` or `y2 < y1` produces a
    /// degenerate viewport; that is the caller's problem. Out-of-range sums
    /// saturate instead of wrapping.
    #[allow(clippy::too_many_arguments)]
    pub fn set_viewport<D: GraphicsDevice + ?Sized>(
        &mut self,
        device: &mut D,
        frame: &Rect,
        area: &mut Rect,
        x1: i32,
        y1: i32,
        x2: i32,
        y2: i32,
    ) -> Viewport {
        let min_x = frame.left();
        let min_y = frame.bottom();

        area.set_left(min_x.saturating_add(x1));
        area.set_bottom(min_y.saturating_add(y1));
        area.set_right(min_x.saturating_add(x2));
        area.set_top(min_y.saturating_add(y2));
        let requested = Rect::new(x1, y1, x2, y2);
        self.viewport = Viewport::new(
            area.left(),
            area.bottom(),
            requested.width(),
            requested.height(),
        );
        if self.viewport.is_degenerate() {
            log::warn!("degenerate viewport requested: ({x1}, {y1})..=({x2}, {y2})");
        }

        device.set_viewport(self.viewport);
        device.set_scissor(self.viewport);
        self.viewport
    }

    /// Overwrites the cached viewport without touching the device. For hosts
    /// that changed the GPU viewport behind the canvas' back.
    pub fn update_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    /// The last viewport set. Debug builds assert that `probe` agrees.
    pub fn viewport(&self, probe: &dyn ViewportProbe) -> Viewport {
        if cfg!(debug_assertions) {
            if let Some(actual) = probe.current_viewport() {
                debug_assert_eq!(
                    actual, self.viewport,
                    "cached viewport drifted from the GPU viewport"
                );
            }
        }
        self.viewport
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Viewport);

    impl ViewportProbe for Fixed {
        fn current_viewport(&self) -> Option<Viewport> {
            Some(self.0)
        }
    }

    #[test]
    fn trusted_probe_skips_check() {
        let ctl = ViewportController::new(Viewport::new(1, 2, 3, 4));
        assert_eq!(ctl.viewport(&TrustCachedViewport), Viewport::new(1, 2, 3, 4));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "cached viewport drifted")]
    fn mismatched_probe_asserts_in_debug() {
        let ctl = ViewportController::new(Viewport::new(0, 0, 10, 10));
        let _ = ctl.viewport(&Fixed(Viewport::new(0, 0, 20, 10)));
    }

    #[test]
    fn inverted_bounds_give_a_degenerate_viewport() {
        let mut device = crate::backends::software::SoftwareDevice::new(8, 8);
        let mut ctl = ViewportController::new(Viewport::default());
        let frame = Rect::new(0, 0, 7, 7);
        let mut area = frame;
        let vp = ctl.set_viewport(&mut device, &frame, &mut area, 5, 5, 2, 2);
        assert!(vp.is_degenerate());
        assert!(!Viewport::new(0, 0, 1, 1).is_degenerate());
    }

    #[test]
    fn aspect_ratio_handles_zero_height() {
        assert_eq!(Viewport::new(0, 0, 10, 0).aspect_ratio(), 0.0);
        assert_eq!(Viewport::new(0, 0, 1920, 1080).aspect_ratio(), 1920.0 / 1080.0);
    }
}
