//! CPU reference implementation of [`GraphicsDevice`].
//!
//! Keeps real pixel storage for every color attachment and for the default
//! target (a back and a front buffer), so clears, blits, copies and
//! readbacks can be checked pixel by pixel. Every call is recorded in an
//! operation log and failures can be injected per operation kind.
//!
//! Storage rows run bottom to top like the canvas coordinate system; data
//! handed back to callers is converted to rows top to bottom.

use std::collections::HashMap;

use crate::error::GpuError;
use crate::gpu::{
    AttachmentId, AttachmentKind, ClearMask, DrawTarget, FramebufferId, FramebufferStatus,
    GraphicsDevice, TransferBufferId,
};
use crate::rect::Rect;
use crate::viewport::{Viewport, ViewportProbe};

/// One recorded device call.
#[derive(Clone, Debug, PartialEq)]
pub enum DeviceOp {
    CreateAttachment(AttachmentKind, u32, u32),
    DestroyAttachment(AttachmentId),
    CreateFramebuffer(FramebufferId),
    DestroyFramebuffer(FramebufferId),
    Bind(DrawTarget),
    SetViewport(Viewport),
    SetScissor(Viewport),
    SetClearColor([f32; 4]),
    Clear(ClearMask),
    Blit { src: Rect, dst: Rect },
    CreateTransferBuffer(TransferBufferId),
    DestroyTransferBuffer(TransferBufferId),
    RequestCopy(TransferBufferId),
    ReadTransferBuffer(TransferBufferId),
    Finish,
    ReadFrontBuffer(Rect),
    Present,
}

/// Failures to inject into upcoming calls.
#[derive(Clone, Debug, Default)]
struct Faults {
    color_allocation: bool,
    depth_allocation: bool,
    transfer_allocation: bool,
    incomplete: bool,
    copies: u32,
    maps: u32,
}

struct Image {
    width: u32,
    height: u32,
    pixels: Vec<[u8; 4]>,
}

impl Image {
    fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![[0, 0, 0, 0]; width as usize * height as usize],
        }
    }

    fn bounds(&self) -> Rect {
        Rect::from_origin_size(0, 0, self.width as i32, self.height as i32)
    }

    fn get(&self, x: i32, y: i32) -> Option<[u8; 4]> {
        if x < 0 || y < 0 || x >= self.width as i32 || y >= self.height as i32 {
            return None;
        }
        Some(self.pixels[y as usize * self.width as usize + x as usize])
    }

    fn set(&mut self, x: i32, y: i32, px: [u8; 4]) {
        if x < 0 || y < 0 || x >= self.width as i32 || y >= self.height as i32 {
            return;
        }
        self.pixels[y as usize * self.width as usize + x as usize] = px;
    }

    fn fill(&mut self, region: Viewport, px: [u8; 4]) {
        for y in region.y..region.y + region.height {
            for x in region.x..region.x + region.width {
                self.set(x, y, px);
            }
        }
    }

    /// `region` as RGBA8 rows top to bottom; pixels outside the image read as
    /// transparent black.
    fn read_top_down(&self, region: &Rect) -> Vec<[u8; 4]> {
        let mut out = Vec::with_capacity(region.width().max(0) as usize * region.height().max(0) as usize);
        for y in (region.bottom()..=region.top()).rev() {
            for x in region.left()..=region.right() {
                out.push(self.get(x, y).unwrap_or([0, 0, 0, 0]));
            }
        }
        out
    }
}

struct Attachment {
    kind: AttachmentKind,
    /// Color attachments only; depth/stencil contents are not modeled
    image: Option<Image>,
    width: u32,
    height: u32,
}

#[derive(Clone, Copy)]
struct Framebuffer {
    color: AttachmentId,
    depth_stencil: AttachmentId,
}

enum Transfer {
    Empty,
    /// Copy issued; lands on the next finish or when mapped
    InFlight(Vec<u8>),
    Landed(Vec<u8>),
}

struct TransferBuffer {
    width: u32,
    height: u32,
    state: Transfer,
}

pub struct SoftwareDevice {
    back: Image,
    front: Image,
    attachments: HashMap<AttachmentId, Attachment>,
    framebuffers: HashMap<FramebufferId, Framebuffer>,
    transfers: HashMap<TransferBufferId, TransferBuffer>,
    bound: DrawTarget,
    viewport: Viewport,
    scissor: Viewport,
    clear_color: [f32; 4],
    faults: Faults,
    ops: Vec<DeviceOp>,
    map_stalls: u64,
}

impl SoftwareDevice {
    /// Device whose default target is `width x height`.
    pub fn new(width: u32, height: u32) -> Self {
        let full = Viewport::new(0, 0, width as i32, height as i32);
        Self {
            back: Image::new(width, height),
            front: Image::new(width, height),
            attachments: HashMap::new(),
            framebuffers: HashMap::new(),
            transfers: HashMap::new(),
            bound: DrawTarget::Default,
            viewport: full,
            scissor: full,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            faults: Faults::default(),
            ops: Vec::new(),
            map_stalls: 0,
        }
    }

    /// Makes every following allocation of `kind` fail.
    pub fn fail_attachment_allocation(&mut self, kind: AttachmentKind) {
        match kind {
            AttachmentKind::Color => self.faults.color_allocation = true,
            AttachmentKind::DepthStencil => self.faults.depth_allocation = true,
        }
    }

    pub fn fail_transfer_allocation(&mut self, fail: bool) {
        self.faults.transfer_allocation = fail;
    }

    /// Reports every framebuffer as incomplete.
    pub fn report_incomplete_framebuffers(&mut self, incomplete: bool) {
        self.faults.incomplete = incomplete;
    }

    pub fn fail_next_copies(&mut self, count: u32) {
        self.faults.copies = count;
    }

    pub fn fail_next_maps(&mut self, count: u32) {
        self.faults.maps = count;
    }

    pub fn clear_faults(&mut self) {
        self.faults = Faults::default();
    }

    pub fn ops(&self) -> &[DeviceOp] {
        &self.ops
    }

    pub fn take_ops(&mut self) -> Vec<DeviceOp> {
        std::mem::take(&mut self.ops)
    }

    pub fn count_ops(&self, pred: impl Fn(&DeviceOp) -> bool) -> usize {
        self.ops.iter().filter(|op| pred(op)).count()
    }

    pub fn live_attachments(&self) -> usize {
        self.attachments.len()
    }

    pub fn live_framebuffers(&self) -> usize {
        self.framebuffers.len()
    }

    pub fn live_transfer_buffers(&self) -> usize {
        self.transfers.len()
    }

    /// Maps that had to wait for their copy to land.
    pub fn map_stalls(&self) -> u64 {
        self.map_stalls
    }

    pub fn attachment_size(&self, attachment: AttachmentId) -> Option<(u32, u32)> {
        self.attachments
            .get(&attachment)
            .map(|a| (a.width, a.height))
    }

    pub fn attachment_kind(&self, attachment: AttachmentId) -> Option<AttachmentKind> {
        self.attachments.get(&attachment).map(|a| a.kind)
    }

    /// Pixel of the default back buffer, bottom-left origin.
    pub fn back_pixel(&self, x: i32, y: i32) -> Option<[u8; 4]> {
        self.back.get(x, y)
    }

    /// Pixel of the presented front buffer, bottom-left origin.
    pub fn front_pixel(&self, x: i32, y: i32) -> Option<[u8; 4]> {
        self.front.get(x, y)
    }

    /// Pixel of a framebuffer's color attachment, bottom-left origin.
    pub fn framebuffer_pixel(&self, framebuffer: FramebufferId, x: i32, y: i32) -> Option<[u8; 4]> {
        let fb = self.framebuffers.get(&framebuffer)?;
        self.attachments.get(&fb.color)?.image.as_ref()?.get(x, y)
    }

    fn bound_image_mut(&mut self) -> Option<&mut Image> {
        match self.bound {
            DrawTarget::Default => Some(&mut self.back),
            DrawTarget::Offscreen(fb) => {
                let color = self.framebuffers.get(&fb)?.color;
                self.attachments.get_mut(&color)?.image.as_mut()
            }
        }
    }

    fn color_image(&self, framebuffer: FramebufferId) -> Result<&Image, GpuError> {
        let fb = self
            .framebuffers
            .get(&framebuffer)
            .ok_or(GpuError::UnknownFramebuffer(framebuffer))?;
        self.attachments
            .get(&fb.color)
            .and_then(|a| a.image.as_ref())
            .ok_or(GpuError::UnknownAttachment(fb.color))
    }

    fn land_copies(&mut self) {
        for transfer in self.transfers.values_mut() {
            if let Transfer::InFlight(_) = transfer.state {
                if let Transfer::InFlight(bytes) =
                    std::mem::replace(&mut transfer.state, Transfer::Empty)
                {
                    transfer.state = Transfer::Landed(bytes);
                }
            }
        }
    }
}

fn to_unorm8(rgba: [f32; 4]) -> [u8; 4] {
    rgba.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8)
}

/// Overlap of two viewports. Edges are summed in `i64`, so an extreme
/// scissor still clips to `b`.
fn intersect(a: Viewport, b: Viewport) -> Viewport {
    let far = |v: Viewport| {
        (
            i64::from(v.x) + i64::from(v.width),
            i64::from(v.y) + i64::from(v.height),
        )
    };
    let ((ax1, ay1), (bx1, by1)) = (far(a), far(b));
    let x0 = a.x.max(b.x);
    let y0 = a.y.max(b.y);
    let width = (ax1.min(bx1) - i64::from(x0)).max(0);
    let height = (ay1.min(by1) - i64::from(y0)).max(0);
    Viewport::new(x0, y0, width as i32, height as i32)
}

impl ViewportProbe for SoftwareDevice {
    fn current_viewport(&self) -> Option<Viewport> {
        Some(self.viewport)
    }
}

impl GraphicsDevice for SoftwareDevice {
    fn create_attachment(
        &mut self,
        kind: AttachmentKind,
        width: u32,
        height: u32,
    ) -> Result<AttachmentId, GpuError> {
        self.ops.push(DeviceOp::CreateAttachment(kind, width, height));
        let injected = match kind {
            AttachmentKind::Color => self.faults.color_allocation,
            AttachmentKind::DepthStencil => self.faults.depth_allocation,
        };
        if injected || width == 0 || height == 0 {
            return Err(GpuError::Allocation(format!(
                "{kind:?} attachment {width}x{height}"
            )));
        }
        let id = AttachmentId::new();
        let image = match kind {
            AttachmentKind::Color => Some(Image::new(width, height)),
            AttachmentKind::DepthStencil => None,
        };
        self.attachments.insert(
            id,
            Attachment {
                kind,
                image,
                width,
                height,
            },
        );
        Ok(id)
    }

    fn destroy_attachment(&mut self, attachment: AttachmentId) {
        self.ops.push(DeviceOp::DestroyAttachment(attachment));
        self.attachments.remove(&attachment);
    }

    fn create_framebuffer(
        &mut self,
        color: AttachmentId,
        depth_stencil: AttachmentId,
    ) -> Result<FramebufferId, GpuError> {
        if !self.attachments.contains_key(&color) {
            return Err(GpuError::UnknownAttachment(color));
        }
        if !self.attachments.contains_key(&depth_stencil) {
            return Err(GpuError::UnknownAttachment(depth_stencil));
        }
        let id = FramebufferId::new();
        self.ops.push(DeviceOp::CreateFramebuffer(id));
        self.framebuffers.insert(
            id,
            Framebuffer {
                color,
                depth_stencil,
            },
        );
        Ok(id)
    }

    fn framebuffer_status(&mut self, framebuffer: FramebufferId) -> FramebufferStatus {
        if self.faults.incomplete {
            return FramebufferStatus::Incomplete("incomplete attachment (injected)".to_string());
        }
        let Some(fb) = self.framebuffers.get(&framebuffer) else {
            return FramebufferStatus::Incomplete("unknown framebuffer".to_string());
        };
        let color = self.attachments.get(&fb.color);
        let depth = self.attachments.get(&fb.depth_stencil);
        match (color, depth) {
            (Some(c), Some(d))
                if c.kind == AttachmentKind::Color
                    && d.kind == AttachmentKind::DepthStencil
                    && (c.width, c.height) == (d.width, d.height) =>
            {
                FramebufferStatus::Complete
            }
            (Some(_), Some(_)) => {
                FramebufferStatus::Incomplete("attachment kinds or sizes disagree".to_string())
            }
            _ => FramebufferStatus::Incomplete("missing attachment".to_string()),
        }
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferId) {
        self.ops.push(DeviceOp::DestroyFramebuffer(framebuffer));
        if self.framebuffers.remove(&framebuffer).is_some()
            && self.bound == DrawTarget::Offscreen(framebuffer)
        {
            self.bound = DrawTarget::Default;
        }
    }

    fn bind_draw_target(&mut self, target: DrawTarget) {
        self.ops.push(DeviceOp::Bind(target));
        self.bound = target;
    }

    fn draw_target(&self) -> DrawTarget {
        self.bound
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.ops.push(DeviceOp::SetViewport(viewport));
        self.viewport = viewport;
    }

    fn set_scissor(&mut self, scissor: Viewport) {
        self.ops.push(DeviceOp::SetScissor(scissor));
        self.scissor = scissor;
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.ops.push(DeviceOp::SetClearColor(rgba));
        self.clear_color = rgba;
    }

    fn clear(&mut self, mask: ClearMask) {
        self.ops.push(DeviceOp::Clear(mask));
        if !mask.color {
            return;
        }
        let px = to_unorm8(self.clear_color);
        let scissor = self.scissor;
        if let Some(image) = self.bound_image_mut() {
            let region = intersect(scissor, Viewport::from_inclusive(&image.bounds()));
            image.fill(region, px);
        }
    }

    fn blit_to_default(
        &mut self,
        source: FramebufferId,
        src: Rect,
        dst: Rect,
    ) -> Result<(), GpuError> {
        self.ops.push(DeviceOp::Blit { src, dst });
        let (Some((sw, sh)), Some((dw, dh))) = (src.extent(), dst.extent()) else {
            return Err(GpuError::Copy(format!("degenerate blit {src:?} -> {dst:?}")));
        };
        let image = self.color_image(source)?;
        let mut scaled = Vec::with_capacity(dw as usize * dh as usize);
        for dy in 0..dh {
            let sy = src.bottom() + (dy as u64 * sh as u64 / dh as u64) as i32;
            for dx in 0..dw {
                let sx = src.left() + (dx as u64 * sw as u64 / dw as u64) as i32;
                scaled.push(image.get(sx, sy).unwrap_or([0, 0, 0, 0]));
            }
        }
        for dy in 0..dh {
            for dx in 0..dw {
                let px = scaled[dy as usize * dw as usize + dx as usize];
                self.back
                    .set(dst.left() + dx as i32, dst.bottom() + dy as i32, px);
            }
        }
        Ok(())
    }

    fn create_transfer_buffer(
        &mut self,
        width: u32,
        height: u32,
    ) -> Result<TransferBufferId, GpuError> {
        if self.faults.transfer_allocation || width == 0 || height == 0 {
            return Err(GpuError::Allocation(format!(
                "transfer buffer {width}x{height}"
            )));
        }
        let id = TransferBufferId::new();
        self.ops.push(DeviceOp::CreateTransferBuffer(id));
        self.transfers.insert(
            id,
            TransferBuffer {
                width,
                height,
                state: Transfer::Empty,
            },
        );
        Ok(id)
    }

    fn destroy_transfer_buffer(&mut self, buffer: TransferBufferId) {
        self.ops.push(DeviceOp::DestroyTransferBuffer(buffer));
        self.transfers.remove(&buffer);
    }

    fn request_copy(
        &mut self,
        source: FramebufferId,
        region: Rect,
        buffer: TransferBufferId,
    ) -> Result<(), GpuError> {
        self.ops.push(DeviceOp::RequestCopy(buffer));
        if self.faults.copies > 0 {
            self.faults.copies -= 1;
            return Err(GpuError::Copy("copy rejected (injected)".to_string()));
        }
        let image = self.color_image(source)?;
        if !image.bounds().encloses(&region) {
            return Err(GpuError::Copy(format!(
                "{region:?} outside {}x{} attachment",
                image.width, image.height
            )));
        }
        let pixels = image.read_top_down(&region);
        let transfer = self
            .transfers
            .get_mut(&buffer)
            .ok_or(GpuError::UnknownTransferBuffer(buffer))?;
        if region.extent() != Some((transfer.width, transfer.height)) {
            return Err(GpuError::Copy(format!(
                "{region:?} does not fit {}x{} transfer buffer",
                transfer.width, transfer.height
            )));
        }
        transfer.state = Transfer::InFlight(bytemuck::cast_slice(&pixels).to_vec());
        Ok(())
    }

    fn read_transfer_buffer(
        &mut self,
        buffer: TransferBufferId,
        visit: &mut dyn FnMut(&[u8]),
    ) -> Result<(), GpuError> {
        self.ops.push(DeviceOp::ReadTransferBuffer(buffer));
        if self.faults.maps > 0 {
            self.faults.maps -= 1;
            return Err(GpuError::Map("map rejected (injected)".to_string()));
        }
        let transfer = self
            .transfers
            .get_mut(&buffer)
            .ok_or(GpuError::UnknownTransferBuffer(buffer))?;
        if let Transfer::InFlight(_) = transfer.state {
            self.map_stalls += 1;
            if let Transfer::InFlight(bytes) =
                std::mem::replace(&mut transfer.state, Transfer::Empty)
            {
                transfer.state = Transfer::Landed(bytes);
            }
        }
        match &transfer.state {
            Transfer::Landed(bytes) => {
                visit(bytes);
                Ok(())
            }
            _ => Err(GpuError::Map("no copy was requested into this buffer".to_string())),
        }
    }

    fn finish(&mut self) {
        self.ops.push(DeviceOp::Finish);
        self.land_copies();
    }

    fn read_front_buffer(&mut self, region: Rect) -> Result<Vec<[u8; 4]>, GpuError> {
        self.ops.push(DeviceOp::ReadFrontBuffer(region));
        if region.extent().is_none() {
            return Err(GpuError::Readback(format!("empty region {region:?}")));
        }
        Ok(self.front.read_top_down(&region))
    }

    fn present(&mut self) {
        self.ops.push(DeviceOp::Present);
        self.front.pixels.copy_from_slice(&self.back.pixels);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_respects_scissor() {
        let mut device = SoftwareDevice::new(4, 4);
        device.set_clear_color([1.0, 0.0, 0.0, 1.0]);
        device.set_scissor(Viewport::new(0, 0, 2, 2));
        device.clear(ClearMask::COLOR);
        assert_eq!(device.back_pixel(1, 1), Some([255, 0, 0, 255]));
        assert_eq!(device.back_pixel(2, 2), Some([0, 0, 0, 0]));
    }

    #[test]
    fn extreme_scissor_clips_to_the_image() {
        let mut device = SoftwareDevice::new(4, 4);
        device.set_clear_color([0.0, 0.0, 1.0, 1.0]);
        device.set_scissor(Viewport::new(i32::MAX - 1, 0, i32::MAX, 4));
        device.clear(ClearMask::COLOR);
        assert_eq!(device.back_pixel(3, 3), Some([0, 0, 0, 0]));

        device.set_scissor(Viewport::new(-2, -2, i32::MAX, i32::MAX));
        device.clear(ClearMask::COLOR);
        assert_eq!(device.back_pixel(0, 0), Some([0, 0, 255, 255]));
        assert_eq!(device.back_pixel(3, 3), Some([0, 0, 255, 255]));
    }

    #[test]
    fn copies_land_on_finish() {
        let mut device = SoftwareDevice::new(2, 2);
        let color = device.create_attachment(AttachmentKind::Color, 2, 2).unwrap();
        let depth = device
            .create_attachment(AttachmentKind::DepthStencil, 2, 2)
            .unwrap();
        let fb = device.create_framebuffer(color, depth).unwrap();
        let buffer = device.create_transfer_buffer(2, 2).unwrap();
        device
            .request_copy(fb, Rect::new(0, 0, 1, 1), buffer)
            .unwrap();
        device.finish();
        let mut len = 0;
        device
            .read_transfer_buffer(buffer, &mut |bytes| len = bytes.len())
            .unwrap();
        assert_eq!(len, 16);
        assert_eq!(device.map_stalls(), 0);
    }
}
