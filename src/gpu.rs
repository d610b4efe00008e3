//! The narrow GPU surface the canvas drives.
//!
//! Everything the render target, streaming pipeline and capture path need
//! from the graphics context goes through [`GraphicsDevice`]. Handles are
//! opaque ids owned by the device; the canvas never sees API objects.
//!
//! Coordinates passed to the device use the canvas convention: origin at the
//! bottom-left, Y up, inclusive [`Rect`]s. Pixel data handed back to the
//! caller is tightly packed RGBA8 with rows ordered top to bottom.

use std::fmt;

use uuid::Uuid;

use crate::error::GpuError;
use crate::rect::Rect;
use crate::viewport::{Viewport, ViewportProbe};

macro_rules! gpu_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let short = self.0.simple().to_string();
                write!(f, "{}({})", stringify!($name), &short[..8])
            }
        }
    };
}

gpu_handle!(
    /// Color or depth/stencil image bound to a framebuffer.
    AttachmentId
);
gpu_handle!(
    /// Offscreen draw destination made of attachments.
    FramebufferId
);
gpu_handle!(
    /// Host-readable buffer used for asynchronous pixel transfers.
    TransferBufferId
);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AttachmentKind {
    /// RGBA8 color image
    Color,
    /// Combined 24-bit depth / 8-bit stencil image
    DepthStencil,
}

/// Where draw calls currently land.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum DrawTarget {
    /// The host window's own back buffer
    #[default]
    Default,
    Offscreen(FramebufferId),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FramebufferStatus {
    Complete,
    Incomplete(String),
}

impl FramebufferStatus {
    pub fn is_complete(&self) -> bool {
        matches!(self, FramebufferStatus::Complete)
    }
}

/// Which buffers a clear touches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct ClearMask {
    pub color: bool,
    pub depth: bool,
}

impl ClearMask {
    pub const COLOR: ClearMask = ClearMask {
        color: true,
        depth: false,
    };
    pub const DEPTH: ClearMask = ClearMask {
        color: false,
        depth: true,
    };
    pub const ALL: ClearMask = ClearMask {
        color: true,
        depth: true,
    };

    pub fn is_empty(&self) -> bool {
        !self.color && !self.depth
    }
}

/// Bytes per pixel of every transfer and readback.
pub const BYTES_PER_PIXEL: usize = 4;

/// GPU primitives used by the canvas. Calls happen on the thread that owns
/// the graphics context.
pub trait GraphicsDevice: ViewportProbe {
    fn create_attachment(
        &mut self,
        kind: AttachmentKind,
        width: u32,
        height: u32,
    ) -> Result<AttachmentId, GpuError>;

    /// Releases an attachment. Unknown ids are ignored.
    fn destroy_attachment(&mut self, attachment: AttachmentId);

    fn create_framebuffer(
        &mut self,
        color: AttachmentId,
        depth_stencil: AttachmentId,
    ) -> Result<FramebufferId, GpuError>;

    /// Completeness check run before a framebuffer is drawn to.
    fn framebuffer_status(&mut self, framebuffer: FramebufferId) -> FramebufferStatus;

    /// Releases a framebuffer (not its attachments). Unknown ids are ignored.
    /// If the framebuffer is bound, the default target is bound instead.
    fn destroy_framebuffer(&mut self, framebuffer: FramebufferId);

    fn bind_draw_target(&mut self, target: DrawTarget);

    fn draw_target(&self) -> DrawTarget;

    fn set_viewport(&mut self, viewport: Viewport);

    /// Clip rectangle applied to clears and draws.
    fn set_scissor(&mut self, scissor: Viewport);

    fn set_clear_color(&mut self, rgba: [f32; 4]);

    /// Clears the bound target inside the scissor rectangle.
    fn clear(&mut self, mask: ClearMask);

    /// Scales the color attachment region `src` of `source` into the region
    /// `dst` of the default target.
    fn blit_to_default(
        &mut self,
        source: FramebufferId,
        src: Rect,
        dst: Rect,
    ) -> Result<(), GpuError>;

    /// Allocates a transfer buffer able to hold a `width x height` RGBA8 region.
    fn create_transfer_buffer(
        &mut self,
        width: u32,
        height: u32,
    ) -> Result<TransferBufferId, GpuError>;

    /// Releases a transfer buffer. An in-flight copy into it is abandoned and
    /// its result is never observable. Unknown ids are ignored.
    fn destroy_transfer_buffer(&mut self, buffer: TransferBufferId);

    /// Issues an asynchronous copy of `region` of the color attachment of
    /// `source` into `buffer`. Returns once the copy is queued.
    fn request_copy(
        &mut self,
        source: FramebufferId,
        region: Rect,
        buffer: TransferBufferId,
    ) -> Result<(), GpuError>;

    /// Maps `buffer` for reading, waits for its pending copy if needed, hands
    /// the packed pixels to `visit` and unmaps it again.
    fn read_transfer_buffer(
        &mut self,
        buffer: TransferBufferId,
        visit: &mut dyn FnMut(&[u8]),
    ) -> Result<(), GpuError>;

    /// Blocks until all submitted GPU work has completed.
    fn finish(&mut self);

    /// Blocking read of `region` of the presented (front) buffer.
    fn read_front_buffer(&mut self, region: Rect) -> Result<Vec<[u8; 4]>, GpuError>;

    /// Latches the default target as the presented image. Called right before
    /// the window system swaps.
    fn present(&mut self) {}
}
