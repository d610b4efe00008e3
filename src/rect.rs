use std::fmt;

/// Axis-aligned pixel rectangle using inclusive edges.
///
/// `left..=right` and `bottom..=top` are both covered, so a rect spanning a
/// single pixel has `left == right`. Y grows upward (canvas convention).
/// Edge and extent arithmetic saturates at the `i32` range.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    left: i32,
    bottom: i32,
    right: i32,
    top: i32,
}

impl Rect {
    pub fn new(left: i32, bottom: i32, right: i32, top: i32) -> Self {
        Self {
            left,
            bottom,
            right,
            top,
        }
    }

    /// Rect anchored at `(left, bottom)` covering `width x height` pixels.
    pub fn from_origin_size(left: i32, bottom: i32, width: i32, height: i32) -> Self {
        Self::new(
            left,
            bottom,
            left.saturating_add(width).saturating_sub(1),
            bottom.saturating_add(height).saturating_sub(1),
        )
    }

    pub fn left(&self) -> i32 {
        self.left
    }

    pub fn bottom(&self) -> i32 {
        self.bottom
    }

    pub fn right(&self) -> i32 {
        self.right
    }

    pub fn top(&self) -> i32 {
        self.top
    }

    pub fn set_left(&mut self, left: i32) {
        self.left = left;
    }

    pub fn set_bottom(&mut self, bottom: i32) {
        self.bottom = bottom;
    }

    pub fn set_right(&mut self, right: i32) {
        self.right = right;
    }

    pub fn set_top(&mut self, top: i32) {
        self.top = top;
    }

    pub fn width(&self) -> i32 {
        span(self.left, self.right)
    }

    pub fn height(&self) -> i32 {
        span(self.bottom, self.top)
    }

    /// Width and height as unsigned extents, `None` when the rect is degenerate.
    pub fn extent(&self) -> Option<(u32, u32)> {
        let (w, h) = (self.width(), self.height());
        if w > 0 && h > 0 {
            Some((w as u32, h as u32))
        } else {
            None
        }
    }

    pub fn is_valid(&self) -> bool {
        self.right >= self.left && self.top >= self.bottom
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.left && x <= self.right && y >= self.bottom && y <= self.top
    }

    /// Whether `other` lies fully inside this rect.
    pub fn encloses(&self, other: &Rect) -> bool {
        self.contains(other.left, other.bottom) && self.contains(other.right, other.top)
    }

    /// Keeps the origin and resizes to `width x height`.
    pub fn resize(&mut self, width: i32, height: i32) {
        self.right = self.left.saturating_add(width).saturating_sub(1);
        self.top = self.bottom.saturating_add(height).saturating_sub(1);
    }
}

/// Pixel count of the inclusive range `low..=high`, clamped to `i32`.
/// Inverted ranges give zero or a negative count.
fn span(low: i32, high: i32) -> i32 {
    let count = i64::from(high) - i64::from(low) + 1;
    count.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

impl fmt::Debug for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Rect {{ left: {}, bottom: {}, right: {}, top: {} }} ({}x{})",
            self.left,
            self.bottom,
            self.right,
            self.top,
            self.width(),
            self.height()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inclusive_extent() {
        let r = Rect::new(0, 0, 639, 479);
        assert_eq!(r.width(), 640);
        assert_eq!(r.height(), 480);
        assert_eq!(r.extent(), Some((640, 480)));
    }

    #[test]
    fn origin_size_round_trips() {
        let r = Rect::from_origin_size(10, 20, 32, 16);
        assert_eq!((r.left(), r.bottom(), r.right(), r.top()), (10, 20, 41, 35));
        assert_eq!((r.width(), r.height()), (32, 16));
    }

    #[test]
    fn degenerate_has_no_extent() {
        let r = Rect::new(5, 5, 3, 9);
        assert!(!r.is_valid());
        assert_eq!(r.extent(), None);
    }

    #[test]
    fn extreme_edges_saturate() {
        let full = Rect::new(i32::MIN, i32::MIN, i32::MAX, i32::MAX);
        assert_eq!((full.width(), full.height()), (i32::MAX, i32::MAX));

        let inverted = Rect::new(i32::MAX, 0, i32::MIN, 0);
        assert_eq!(inverted.width(), i32::MIN);
        assert_eq!(inverted.extent(), None);

        let r = Rect::from_origin_size(i32::MAX - 1, 0, 10, 1);
        assert_eq!(r.right(), i32::MAX - 1);
    }
}
