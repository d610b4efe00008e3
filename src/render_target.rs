//! Offscreen render target: a framebuffer with one color attachment and one
//! combined depth/stencil attachment, allocated lazily at the configured
//! resolution.

use crate::error::GpuError;
use crate::gpu::{
    AttachmentId, AttachmentKind, DrawTarget, FramebufferId, FramebufferStatus, GraphicsDevice,
};
use crate::rect::Rect;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Allocation {
    framebuffer: FramebufferId,
    color: AttachmentId,
    depth_stencil: AttachmentId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TargetState {
    /// Configured (or not) but nothing allocated yet
    Idle,
    Ready(Allocation),
    /// Allocation or validation failed for the current configuration
    Failed,
}

/// Lifecycle of the offscreen framebuffer.
///
/// `configure` only records a resolution. The GPU objects appear on the first
/// [`ensure_ready`](Self::ensure_ready) and disappear on
/// [`destroy`](Self::destroy) or when the resolution changes.
#[derive(Debug)]
pub struct RenderTarget {
    rect: Option<Rect>,
    state: TargetState,
}

impl Default for RenderTarget {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderTarget {
    pub fn new() -> Self {
        Self {
            rect: None,
            state: TargetState::Idle,
        }
    }

    /// Records the offscreen resolution. Non-positive sizes are ignored.
    ///
    /// Returns `true` when the dimensions changed; any previous allocation is
    /// released before returning so no two generations coexist.
    pub fn configure<D: GraphicsDevice + ?Sized>(
        &mut self,
        device: &mut D,
        width: i32,
        height: i32,
    ) -> bool {
        if width <= 0 || height <= 0 {
            log::debug!("ignoring offscreen resolution {width}x{height}");
            return false;
        }

        if let Some(rect) = self.rect {
            if rect.width() == width && rect.height() == height {
                return false;
            }
        }

        self.destroy(device);
        self.rect = Some(Rect::from_origin_size(0, 0, width, height));
        self.state = TargetState::Idle;
        log::debug!("offscreen resolution set to {width}x{height}");
        true
    }

    /// Allocates and validates the framebuffer on first use.
    ///
    /// Returns whether the target can be drawn to. A failure is remembered
    /// until the target is reconfigured or destroyed, so a broken
    /// configuration is not retried every frame.
    pub fn ensure_ready<D: GraphicsDevice + ?Sized>(&mut self, device: &mut D) -> bool {
        let rect = match (self.state, self.rect) {
            (TargetState::Ready(_), _) => return true,
            (TargetState::Failed, _) | (_, None) => return false,
            (TargetState::Idle, Some(rect)) => rect,
        };

        match Self::allocate(device, &rect) {
            Some(allocation) => {
                log::info!(
                    "offscreen rendering initialized at {}x{}",
                    rect.width(),
                    rect.height()
                );
                self.state = TargetState::Ready(allocation);
                true
            }
            None => {
                log::warn!(
                    "offscreen rendering unavailable at {}x{}, drawing to the default target",
                    rect.width(),
                    rect.height()
                );
                self.state = TargetState::Failed;
                false
            }
        }
    }

    fn allocate<D: GraphicsDevice + ?Sized>(device: &mut D, rect: &Rect) -> Option<Allocation> {
        let (width, height) = rect.extent()?;

        let color = match device.create_attachment(AttachmentKind::Color, width, height) {
            Ok(id) => id,
            Err(err) => {
                log::error!("color attachment: {err}");
                return None;
            }
        };

        let depth_stencil =
            match device.create_attachment(AttachmentKind::DepthStencil, width, height) {
                Ok(id) => id,
                Err(err) => {
                    log::error!("depth/stencil attachment: {err}");
                    device.destroy_attachment(color);
                    return None;
                }
            };

        let framebuffer = match device.create_framebuffer(color, depth_stencil) {
            Ok(id) => id,
            Err(err) => {
                log::error!("framebuffer: {err}");
                device.destroy_attachment(depth_stencil);
                device.destroy_attachment(color);
                return None;
            }
        };

        if let FramebufferStatus::Incomplete(reason) = device.framebuffer_status(framebuffer) {
            log::error!("{}", GpuError::Incomplete(framebuffer, reason));
            device.destroy_framebuffer(framebuffer);
            device.destroy_attachment(depth_stencil);
            device.destroy_attachment(color);
            return None;
        }

        Some(Allocation {
            framebuffer,
            color,
            depth_stencil,
        })
    }

    /// Releases the framebuffer and its attachments. Safe to call repeatedly.
    ///
    /// The configured resolution is kept, so the next
    /// [`ensure_ready`](Self::ensure_ready) rebuilds an identical target.
    pub fn destroy<D: GraphicsDevice + ?Sized>(&mut self, device: &mut D) {
        if let TargetState::Ready(allocation) = self.state {
            if device.draw_target() == DrawTarget::Offscreen(allocation.framebuffer) {
                device.bind_draw_target(DrawTarget::Default);
            }
            device.destroy_framebuffer(allocation.framebuffer);
            device.destroy_attachment(allocation.depth_stencil);
            device.destroy_attachment(allocation.color);
            log::debug!("offscreen target released");
        }
        self.state = TargetState::Idle;
    }

    /// Binds the offscreen framebuffer if it is ready, the default target
    /// otherwise. Returns what was bound.
    pub fn bind<D: GraphicsDevice + ?Sized>(&self, device: &mut D) -> DrawTarget {
        let target = match self.framebuffer() {
            Some(framebuffer) => DrawTarget::Offscreen(framebuffer),
            None => DrawTarget::Default,
        };
        device.bind_draw_target(target);
        target
    }

    pub fn is_configured(&self) -> bool {
        self.rect.is_some()
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, TargetState::Ready(_))
    }

    pub fn has_failed(&self) -> bool {
        self.state == TargetState::Failed
    }

    /// Target rect in render-target pixel space, once configured.
    pub fn rect(&self) -> Option<Rect> {
        self.rect
    }

    pub fn dimensions(&self) -> Option<(i32, i32)> {
        self.rect.map(|r| (r.width(), r.height()))
    }

    pub fn framebuffer(&self) -> Option<FramebufferId> {
        match self.state {
            TargetState::Ready(allocation) => Some(allocation.framebuffer),
            _ => None,
        }
    }

    pub fn color_attachment(&self) -> Option<AttachmentId> {
        match self.state {
            TargetState::Ready(allocation) => Some(allocation.color),
            _ => None,
        }
    }

    pub fn depth_stencil_attachment(&self) -> Option<AttachmentId> {
        match self.state {
            TargetState::Ready(allocation) => Some(allocation.depth_stencil),
            _ => None,
        }
    }
}
