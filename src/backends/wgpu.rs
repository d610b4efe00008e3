//! Headless wgpu implementation of [`GraphicsDevice`].
//!
//! Attachments are textures (`Rgba8Unorm` color, `Depth24PlusStencil8`
//! depth/stencil). The default target is a pair of textures standing in for
//! a window's back and front buffers; [`present`](GraphicsDevice::present)
//! copies one into the other. Transfers use `copy_texture_to_buffer` into
//! `MAP_READ` buffers with rows padded to `COPY_BYTES_PER_ROW_ALIGNMENT`.
//!
//! Clears honor the scissor rectangle. A clear that covers the whole target
//! runs as load ops; a smaller one draws a solid triangle clipped by
//! `set_scissor_rect`.

use std::collections::HashMap;
use std::sync::mpsc;

use wgpu::util::DeviceExt;

use crate::error::GpuError;
use crate::gpu::{
    AttachmentId, AttachmentKind, ClearMask, DrawTarget, FramebufferId, FramebufferStatus,
    GraphicsDevice, TransferBufferId, BYTES_PER_PIXEL,
};
use crate::rect::Rect;
use crate::viewport::{Viewport, ViewportProbe};

pub const COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
pub const DEPTH_STENCIL_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth24PlusStencil8;

#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct BlitUniform {
    uv_offset: [f32; 2],
    uv_scale: [f32; 2],
}

#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct ClearUniform {
    color: [f32; 4],
}

struct GpuImage {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
}

impl GpuImage {
    fn new(
        device: &wgpu::Device,
        label: &str,
        format: wgpu::TextureFormat,
        usage: wgpu::TextureUsages,
        width: u32,
        height: u32,
    ) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            texture,
            view,
            width,
            height,
        }
    }

    fn bounds(&self) -> Rect {
        Rect::from_origin_size(0, 0, self.width as i32, self.height as i32)
    }

    /// Texture origin (top-left) of a bottom-left-origin rect.
    fn origin_of(&self, region: &Rect) -> wgpu::Origin3d {
        wgpu::Origin3d {
            x: region.left() as u32,
            y: (self.height as i32 - 1 - region.top()) as u32,
            z: 0,
        }
    }
}

#[derive(Clone, Copy)]
struct Framebuffer {
    color: AttachmentId,
    depth_stencil: AttachmentId,
}

struct TransferBuffer {
    buffer: wgpu::Buffer,
    width: u32,
    height: u32,
    padded_bytes_per_row: u32,
    /// Submission carrying the last requested copy, until it is read
    submission: Option<wgpu::SubmissionIndex>,
}

struct BlitPipeline {
    pipeline: wgpu::RenderPipeline,
    layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
}

/// Buffers a scissored clear writes, and whether its pass carries a
/// depth/stencil attachment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct ClearVariant {
    depth_attachment: bool,
    color: bool,
    depth: bool,
}

/// Solid-fill pipelines for scissored clears, built on first use per variant.
struct ClearPipelines {
    shader: wgpu::ShaderModule,
    layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    variants: HashMap<ClearVariant, wgpu::RenderPipeline>,
}

impl ClearPipelines {
    fn new(device: &wgpu::Device) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("clear-shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../../shaders/clear.wgsl").into()),
        });
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("clear_bind_group_layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: wgpu::BufferSize::new(
                        std::mem::size_of::<ClearUniform>() as _
                    ),
                },
                count: None,
            }],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("clear-pipeline-layout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });
        Self {
            shader,
            layout,
            pipeline_layout,
            variants: HashMap::new(),
        }
    }

    fn prepare(&mut self, device: &wgpu::Device, variant: ClearVariant) {
        if self.variants.contains_key(&variant) {
            return;
        }
        let write_mask = if variant.color {
            wgpu::ColorWrites::ALL
        } else {
            wgpu::ColorWrites::empty()
        };
        let overwrite = wgpu::StencilFaceState {
            compare: wgpu::CompareFunction::Always,
            fail_op: wgpu::StencilOperation::Replace,
            depth_fail_op: wgpu::StencilOperation::Replace,
            pass_op: wgpu::StencilOperation::Replace,
        };
        let depth_stencil = variant.depth_attachment.then(|| wgpu::DepthStencilState {
            format: DEPTH_STENCIL_FORMAT,
            depth_write_enabled: variant.depth,
            depth_compare: wgpu::CompareFunction::Always,
            stencil: if variant.depth {
                wgpu::StencilState {
                    front: overwrite,
                    back: overwrite,
                    read_mask: !0,
                    write_mask: !0,
                }
            } else {
                wgpu::StencilState::default()
            },
            bias: wgpu::DepthBiasState::default(),
        });
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("clear-pipeline"),
            layout: Some(&self.pipeline_layout),
            vertex: wgpu::VertexState {
                module: &self.shader,
                entry_point: Some("vs_main"),
                buffers: &[],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &self.shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: COLOR_FORMAT,
                    blend: None,
                    write_mask,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });
        self.variants.insert(variant, pipeline);
    }
}

/// How a clear covers a target under the current scissor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ClearRegion {
    Nothing,
    Whole,
    /// Top-left-origin `(x, y, width, height)`
    Scissored((u32, u32, u32, u32)),
}

fn clear_region(bounds: (u32, u32), scissor: Viewport) -> ClearRegion {
    match clip_to(bounds, scissor) {
        None => ClearRegion::Nothing,
        Some((0, 0, w, h)) if (w, h) == bounds => ClearRegion::Whole,
        Some(rect) => ClearRegion::Scissored(rect),
    }
}

pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    back: GpuImage,
    front: GpuImage,
    attachments: HashMap<AttachmentId, (AttachmentKind, GpuImage)>,
    framebuffers: HashMap<FramebufferId, Framebuffer>,
    transfers: HashMap<TransferBufferId, TransferBuffer>,
    bound: DrawTarget,
    viewport: Viewport,
    scissor: Viewport,
    clear_color: wgpu::Color,
    blit: BlitPipeline,
    clear: ClearPipelines,
}

fn padded_row(width: u32) -> u32 {
    let unpadded = width * BYTES_PER_PIXEL as u32;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unpadded.div_ceil(align) * align
}

/// Maps `buffer` for reading and blocks until the map resolves.
fn map_blocking(
    device: &wgpu::Device,
    buffer: &wgpu::Buffer,
    submission: wgpu::SubmissionIndex,
) -> Result<(), String> {
    let (tx, rx) = mpsc::channel();
    buffer.slice(..).map_async(wgpu::MapMode::Read, move |result| {
        tx.send(result).ok();
    });
    device.poll(wgpu::Maintain::wait_for(submission));
    let result = match rx.try_recv() {
        Ok(result) => result,
        Err(_) => {
            device.poll(wgpu::Maintain::Wait);
            rx.try_recv()
                .map_err(|_| "map callback never fired".to_string())?
        }
    };
    result.map_err(|e| e.to_string())
}

/// Copies a mapped, row-padded buffer into tightly packed rows.
fn unpad(buffer: &wgpu::Buffer, width: u32, height: u32, padded_bytes_per_row: u32) -> Vec<u8> {
    let row = (width as usize) * BYTES_PER_PIXEL;
    let mut packed = Vec::with_capacity(row * height as usize);
    {
        let view = buffer.slice(..).get_mapped_range();
        for chunk in view.chunks(padded_bytes_per_row as usize).take(height as usize) {
            packed.extend_from_slice(&chunk[..row]);
        }
    }
    buffer.unmap();
    packed
}

impl WgpuDevice {
    /// Creates an adapter and device without a surface, with a default
    /// target of `width x height`.
    pub fn headless(width: u32, height: u32) -> Result<Self, GpuError> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::LowPower,
            force_fallback_adapter: false,
            compatible_surface: None,
        }))
        .ok_or_else(|| GpuError::Allocation("no suitable GPU adapter".to_string()))?;
        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("render-canvas-device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default().using_resolution(adapter.limits()),
                memory_hints: Default::default(),
            },
            None,
        ))
        .map_err(|e| GpuError::Allocation(e.to_string()))?;
        log::info!("wgpu adapter: {:?}", adapter.get_info().name);
        Ok(Self::from_device(device, queue, width, height))
    }

    /// Wraps an existing device and queue.
    pub fn from_device(device: wgpu::Device, queue: wgpu::Queue, width: u32, height: u32) -> Self {
        let usage = wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::COPY_SRC
            | wgpu::TextureUsages::COPY_DST;
        let back = GpuImage::new(&device, "default-back", COLOR_FORMAT, usage, width, height);
        let front = GpuImage::new(&device, "default-front", COLOR_FORMAT, usage, width, height);
        let blit = Self::create_blit_pipeline(&device);
        let clear = ClearPipelines::new(&device);
        let full = Viewport::new(0, 0, width as i32, height as i32);
        Self {
            device,
            queue,
            back,
            front,
            attachments: HashMap::new(),
            framebuffers: HashMap::new(),
            transfers: HashMap::new(),
            bound: DrawTarget::Default,
            viewport: full,
            scissor: full,
            clear_color: wgpu::Color::BLACK,
            blit,
            clear,
        }
    }

    fn create_blit_pipeline(device: &wgpu::Device) -> BlitPipeline {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("blit-shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../../shaders/blit.wgsl").into()),
        });

        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("blit_bind_group_layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        multisampled: false,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::VERTEX,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: wgpu::BufferSize::new(
                            std::mem::size_of::<BlitUniform>() as _
                        ),
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("blit-pipeline-layout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("blit-pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: COLOR_FORMAT,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("blit-sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        BlitPipeline {
            pipeline,
            layout,
            sampler,
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn create_encoder(&self, label: &str) -> wgpu::CommandEncoder {
        self.device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) })
    }

    pub fn submit(&self, encoder: wgpu::CommandEncoder) -> wgpu::SubmissionIndex {
        self.queue.submit(Some(encoder.finish()))
    }

    /// Records commands into a fresh encoder and submits them. Validation
    /// errors raised while recording or at `finish` are captured and
    /// returned, and the rejected commands are never submitted.
    pub fn submit_checked(
        &self,
        label: &str,
        record: impl FnOnce(&mut wgpu::CommandEncoder),
    ) -> Result<wgpu::SubmissionIndex, String> {
        let commands = self.scoped(|device| {
            let mut encoder =
                device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) });
            record(&mut encoder);
            encoder.finish()
        })?;
        Ok(self.queue.submit(Some(commands)))
    }

    /// Opens a pass on the bound draw target that keeps its contents, with
    /// the current viewport and scissor applied.
    pub fn begin_render_pass<'e>(
        &self,
        encoder: &'e mut wgpu::CommandEncoder,
    ) -> Option<wgpu::RenderPass<'e>> {
        let (color, depth, bounds) = self.bound_views()?;
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("canvas-pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: color,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: depth.map(|view| wgpu::RenderPassDepthStencilAttachment {
                view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                }),
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        if let Some((x, y, w, h)) = clip_to(bounds, self.viewport) {
            pass.set_viewport(x as f32, y as f32, w as f32, h as f32, 0.0, 1.0);
        }
        if let Some((x, y, w, h)) = clip_to(bounds, self.scissor) {
            pass.set_scissor_rect(x, y, w, h);
        }
        Some(pass)
    }

    fn clear_whole(&self, mask: ClearMask) {
        let Some((color, depth, _)) = self.bound_views() else {
            return;
        };
        let color_load = if mask.color {
            wgpu::LoadOp::Clear(self.clear_color)
        } else {
            wgpu::LoadOp::Load
        };
        let (depth_load, stencil_load) = if mask.depth {
            (wgpu::LoadOp::Clear(1.0), wgpu::LoadOp::Clear(0))
        } else {
            (wgpu::LoadOp::Load, wgpu::LoadOp::Load)
        };
        let mut encoder = self.create_encoder("clear-encoder");
        // load ops do the work, the pass records no draws
        let pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("clear-pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: color,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: color_load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: depth.map(|view| wgpu::RenderPassDepthStencilAttachment {
                view,
                depth_ops: Some(wgpu::Operations {
                    load: depth_load,
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: Some(wgpu::Operations {
                    load: stencil_load,
                    store: wgpu::StoreOp::Store,
                }),
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        drop(pass);
        self.submit(encoder);
    }

    /// Fills `rect` of the bound target by drawing at the far plane with
    /// depth and stencil forced to their clear values.
    fn clear_scissored(
        &mut self,
        mask: ClearMask,
        depth_attachment: bool,
        (x, y, w, h): (u32, u32, u32, u32),
    ) {
        let variant = ClearVariant {
            depth_attachment,
            color: mask.color,
            depth: mask.depth && depth_attachment,
        };
        if !variant.color && !variant.depth {
            return;
        }
        self.clear.prepare(&self.device, variant);

        let c = self.clear_color;
        let uniform = ClearUniform {
            color: [c.r as f32, c.g as f32, c.b as f32, c.a as f32],
        };
        let uniform_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("clear-uniform"),
                contents: bytemuck::cast_slice(&[uniform]),
                usage: wgpu::BufferUsages::UNIFORM,
            });
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("clear-bind-group"),
            layout: &self.clear.layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            }],
        });
        let Some(pipeline) = self.clear.variants.get(&variant) else {
            return;
        };
        let Some((_, _, (tw, th))) = self.bound_views() else {
            return;
        };

        let mut encoder = self.create_encoder("scissored-clear-encoder");
        if let Some(mut pass) = self.begin_render_pass(&mut encoder) {
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            // the clear ignores the viewport, only the scissor bounds it
            pass.set_viewport(0.0, 0.0, tw as f32, th as f32, 0.0, 1.0);
            pass.set_scissor_rect(x, y, w, h);
            pass.set_stencil_reference(0);
            pass.draw(0..3, 0..1);
        }
        self.submit(encoder);
    }

    fn bound_views(&self) -> Option<(&wgpu::TextureView, Option<&wgpu::TextureView>, (u32, u32))> {
        match self.bound {
            DrawTarget::Default => Some((&self.back.view, None, (self.back.width, self.back.height))),
            DrawTarget::Offscreen(fb) => {
                let fb = self.framebuffers.get(&fb)?;
                let (_, color) = self.attachments.get(&fb.color)?;
                let (_, depth) = self.attachments.get(&fb.depth_stencil)?;
                Some((&color.view, Some(&depth.view), (color.width, color.height)))
            }
        }
    }

    fn color_image(&self, framebuffer: FramebufferId) -> Result<&GpuImage, GpuError> {
        let fb = self
            .framebuffers
            .get(&framebuffer)
            .ok_or(GpuError::UnknownFramebuffer(framebuffer))?;
        self.attachments
            .get(&fb.color)
            .map(|(_, image)| image)
            .ok_or(GpuError::UnknownAttachment(fb.color))
    }

    /// Runs `f` inside validation and out-of-memory error scopes and reports
    /// the first captured error.
    fn scoped<T>(&self, f: impl FnOnce(&wgpu::Device) -> T) -> Result<T, String> {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = f(&self.device);
        let validation = pollster::block_on(self.device.pop_error_scope());
        let oom = pollster::block_on(self.device.pop_error_scope());
        match validation.or(oom) {
            Some(err) => Err(err.to_string()),
            None => Ok(value),
        }
    }
}

/// Converts a bottom-left-origin viewport into a top-left-origin rect clipped
/// to a `bounds` sized target. `None` when nothing is left.
fn clip_to(bounds: (u32, u32), vp: Viewport) -> Option<(u32, u32, u32, u32)> {
    let (tw, th) = (i64::from(bounds.0), i64::from(bounds.1));
    let (x, y) = (i64::from(vp.x), i64::from(vp.y));
    let x0 = x.clamp(0, tw);
    let x1 = (x + i64::from(vp.width)).clamp(0, tw);
    let y0 = y.clamp(0, th);
    let y1 = (y + i64::from(vp.height)).clamp(0, th);
    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    Some((x0 as u32, (th - y1) as u32, (x1 - x0) as u32, (y1 - y0) as u32))
}

impl ViewportProbe for WgpuDevice {
    fn current_viewport(&self) -> Option<Viewport> {
        Some(self.viewport)
    }
}

impl GraphicsDevice for WgpuDevice {
    fn create_attachment(
        &mut self,
        kind: AttachmentKind,
        width: u32,
        height: u32,
    ) -> Result<AttachmentId, GpuError> {
        let max = self.device.limits().max_texture_dimension_2d;
        if width == 0 || height == 0 || width > max || height > max {
            return Err(GpuError::Allocation(format!(
                "{kind:?} attachment {width}x{height} exceeds limits (max {max})"
            )));
        }
        let (label, format, usage) = match kind {
            AttachmentKind::Color => (
                "offscreen-color",
                COLOR_FORMAT,
                wgpu::TextureUsages::RENDER_ATTACHMENT
                    | wgpu::TextureUsages::TEXTURE_BINDING
                    | wgpu::TextureUsages::COPY_SRC,
            ),
            AttachmentKind::DepthStencil => (
                "offscreen-depth-stencil",
                DEPTH_STENCIL_FORMAT,
                wgpu::TextureUsages::RENDER_ATTACHMENT,
            ),
        };
        let image = self
            .scoped(|device| GpuImage::new(device, label, format, usage, width, height))
            .map_err(GpuError::Allocation)?;
        let id = AttachmentId::new();
        self.attachments.insert(id, (kind, image));
        Ok(id)
    }

    fn destroy_attachment(&mut self, attachment: AttachmentId) {
        if let Some((_, image)) = self.attachments.remove(&attachment) {
            image.texture.destroy();
        }
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
        let Some(fb) = self.framebuffers.get(&framebuffer) else {
            return FramebufferStatus::Incomplete("unknown framebuffer".to_string());
        };
        match (
            self.attachments.get(&fb.color),
            self.attachments.get(&fb.depth_stencil),
        ) {
            (Some((_, color)), Some((_, depth)))
                if color.texture.format() == COLOR_FORMAT
                    && depth.texture.format() == DEPTH_STENCIL_FORMAT
                    && color.texture.size() == depth.texture.size() =>
            {
                FramebufferStatus::Complete
            }
            (Some(_), Some(_)) => {
                FramebufferStatus::Incomplete("attachment formats or sizes disagree".to_string())
            }
            _ => FramebufferStatus::Incomplete("missing attachment".to_string()),
        }
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferId) {
        if self.framebuffers.remove(&framebuffer).is_some()
            && self.bound == DrawTarget::Offscreen(framebuffer)
        {
            self.bound = DrawTarget::Default;
        }
    }

    fn bind_draw_target(&mut self, target: DrawTarget) {
        self.bound = target;
    }

    fn draw_target(&self) -> DrawTarget {
        self.bound
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    fn set_scissor(&mut self, scissor: Viewport) {
        self.scissor = scissor;
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) {
        let [r, g, b, a] = rgba.map(f64::from);
        self.clear_color = wgpu::Color { r, g, b, a };
    }

    fn clear(&mut self, mask: ClearMask) {
        if !mask.color && !mask.depth {
            return;
        }
        let Some((_, depth, bounds)) = self.bound_views() else {
            log::warn!("clear with no valid draw target bound");
            return;
        };
        let depth_attachment = depth.is_some();
        match clear_region(bounds, self.scissor) {
            ClearRegion::Nothing => {}
            ClearRegion::Whole => self.clear_whole(mask),
            ClearRegion::Scissored(rect) => self.clear_scissored(mask, depth_attachment, rect),
        }
    }

    fn blit_to_default(
        &mut self,
        source: FramebufferId,
        src: Rect,
        dst: Rect,
    ) -> Result<(), GpuError> {
        let image = self.color_image(source)?;
        if !image.bounds().encloses(&src) || !self.back.bounds().encloses(&dst) {
            return Err(GpuError::Copy(format!("blit {src:?} -> {dst:?} out of bounds")));
        }
        let (tw, th) = (image.width as f32, image.height as f32);
        let uniform = BlitUniform {
            uv_offset: [
                src.left() as f32 / tw,
                (th - (src.top() + 1) as f32) / th,
            ],
            uv_scale: [src.width() as f32 / tw, src.height() as f32 / th],
        };
        let uniform_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("blit-uniform"),
                contents: bytemuck::cast_slice(&[uniform]),
                usage: wgpu::BufferUsages::UNIFORM,
            });
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("blit-bind-group"),
            layout: &self.blit.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&image.view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.blit.sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: uniform_buffer.as_entire_binding(),
                },
            ],
        });

        let Some((x, y, w, h)) = clip_to(
            (self.back.width, self.back.height),
            Viewport::from_inclusive(&dst),
        ) else {
            return Ok(());
        };
        let mut encoder = self.create_encoder("blit-encoder");
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("blit-pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &self.back.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&self.blit.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.set_viewport(x as f32, y as f32, w as f32, h as f32, 0.0, 1.0);
            pass.draw(0..3, 0..1);
        }
        self.submit(encoder);
        Ok(())
    }

    fn create_transfer_buffer(
        &mut self,
        width: u32,
        height: u32,
    ) -> Result<TransferBufferId, GpuError> {
        if width == 0 || height == 0 {
            return Err(GpuError::Allocation(format!(
                "transfer buffer {width}x{height}"
            )));
        }
        let padded_bytes_per_row = padded_row(width);
        let size = padded_bytes_per_row as u64 * height as u64;
        let buffer = self
            .scoped(|device| {
                device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some("pixel-transfer"),
                    size,
                    usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                })
            })
            .map_err(GpuError::Allocation)?;
        let id = TransferBufferId::new();
        self.transfers.insert(
            id,
            TransferBuffer {
                buffer,
                width,
                height,
                padded_bytes_per_row,
                submission: None,
            },
        );
        Ok(id)
    }

    fn destroy_transfer_buffer(&mut self, buffer: TransferBufferId) {
        if let Some(transfer) = self.transfers.remove(&buffer) {
            transfer.buffer.destroy();
        }
    }

    fn request_copy(
        &mut self,
        source: FramebufferId,
        region: Rect,
        buffer: TransferBufferId,
    ) -> Result<(), GpuError> {
        let image = self.color_image(source)?;
        if !image.bounds().encloses(&region) {
            return Err(GpuError::Copy(format!(
                "{region:?} outside {}x{} attachment",
                image.width, image.height
            )));
        }
        let transfer = self
            .transfers
            .get(&buffer)
            .ok_or(GpuError::UnknownTransferBuffer(buffer))?;
        if region.extent() != Some((transfer.width, transfer.height)) {
            return Err(GpuError::Copy(format!(
                "{region:?} does not fit {}x{} transfer buffer",
                transfer.width, transfer.height
            )));
        }

        let submission = self
            .submit_checked("transfer-encoder", |encoder| {
                encoder.copy_texture_to_buffer(
                    wgpu::ImageCopyTexture {
                        texture: &image.texture,
                        mip_level: 0,
                        origin: image.origin_of(&region),
                        aspect: wgpu::TextureAspect::All,
                    },
                    wgpu::ImageCopyBuffer {
                        buffer: &transfer.buffer,
                        layout: wgpu::ImageDataLayout {
                            offset: 0,
                            bytes_per_row: Some(transfer.padded_bytes_per_row),
                            rows_per_image: Some(transfer.height),
                        },
                    },
                    wgpu::Extent3d {
                        width: transfer.width,
                        height: transfer.height,
                        depth_or_array_layers: 1,
                    },
                );
            })
            .map_err(GpuError::Copy)?;
        if let Some(transfer) = self.transfers.get_mut(&buffer) {
            transfer.submission = Some(submission);
        }
        Ok(())
    }

    fn read_transfer_buffer(
        &mut self,
        buffer: TransferBufferId,
        visit: &mut dyn FnMut(&[u8]),
    ) -> Result<(), GpuError> {
        let transfer = self
            .transfers
            .get_mut(&buffer)
            .ok_or(GpuError::UnknownTransferBuffer(buffer))?;
        let submission = transfer
            .submission
            .take()
            .ok_or_else(|| GpuError::Map("no copy was requested into this buffer".to_string()))?;
        map_blocking(&self.device, &transfer.buffer, submission).map_err(GpuError::Map)?;
        let packed = unpad(
            &transfer.buffer,
            transfer.width,
            transfer.height,
            transfer.padded_bytes_per_row,
        );
        visit(&packed);
        Ok(())
    }

    fn finish(&mut self) {
        self.device.poll(wgpu::Maintain::Wait);
    }

    fn read_front_buffer(&mut self, region: Rect) -> Result<Vec<[u8; 4]>, GpuError> {
        let Some((width, height)) = region.extent() else {
            return Err(GpuError::Readback(format!("empty region {region:?}")));
        };
        if !self.front.bounds().encloses(&region) {
            return Err(GpuError::Readback(format!(
                "{region:?} outside {}x{} front buffer",
                self.front.width, self.front.height
            )));
        }
        let padded_bytes_per_row = padded_row(width);
        let output = self
            .scoped(|device| {
                device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some("front-readback"),
                    size: padded_bytes_per_row as u64 * height as u64,
                    usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                })
            })
            .map_err(GpuError::Readback)?;
        let front = &self.front;
        let submission = self
            .submit_checked("readback-encoder", |encoder| {
                encoder.copy_texture_to_buffer(
                    wgpu::ImageCopyTexture {
                        texture: &front.texture,
                        mip_level: 0,
                        origin: front.origin_of(&region),
                        aspect: wgpu::TextureAspect::All,
                    },
                    wgpu::ImageCopyBuffer {
                        buffer: &output,
                        layout: wgpu::ImageDataLayout {
                            offset: 0,
                            bytes_per_row: Some(padded_bytes_per_row),
                            rows_per_image: Some(height),
                        },
                    },
                    wgpu::Extent3d {
                        width,
                        height,
                        depth_or_array_layers: 1,
                    },
                );
            })
            .map_err(GpuError::Readback)?;
        map_blocking(&self.device, &output, submission).map_err(GpuError::Readback)?;
        let packed = unpad(&output, width, height, padded_bytes_per_row);
        output.destroy();
        Ok(packed
            .chunks_exact(BYTES_PER_PIXEL)
            .map(|px| [px[0], px[1], px[2], px[3]])
            .collect())
    }

    fn present(&mut self) {
        let mut encoder = self.create_encoder("present-encoder");
        encoder.copy_texture_to_texture(
            self.back.texture.as_image_copy(),
            self.front.texture.as_image_copy(),
            self.back.texture.size(),
        );
        self.submit(encoder);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_pad_to_copy_alignment() {
        assert_eq!(padded_row(1), 256);
        assert_eq!(padded_row(64), 256);
        assert_eq!(padded_row(65), 512);
    }

    fn headless(width: u32, height: u32) -> Option<WgpuDevice> {
        match WgpuDevice::headless(width, height) {
            Ok(device) => Some(device),
            Err(err) => {
                eprintln!("skipping wgpu test: {err}");
                None
            }
        }
    }

    #[test]
    fn extreme_viewports_clip_without_overflow() {
        assert_eq!(
            clip_to((100, 50), Viewport::new(i32::MAX - 1, 0, i32::MAX, 10)),
            None
        );
        assert_eq!(
            clip_to((100, 50), Viewport::new(i32::MIN, i32::MIN, i32::MAX, i32::MAX)),
            None
        );
        assert_eq!(
            clip_to((100, 50), Viewport::new(-1, -1, i32::MAX, i32::MAX)),
            Some((0, 0, 100, 50))
        );
    }

    #[test]
    fn clear_region_picks_load_ops_only_for_the_whole_target() {
        assert_eq!(clear_region((8, 8), Viewport::new(0, 0, 8, 8)), ClearRegion::Whole);
        assert_eq!(clear_region((8, 8), Viewport::new(-4, -4, 20, 20)), ClearRegion::Whole);
        assert_eq!(
            clear_region((8, 8), Viewport::new(0, 0, 8, 1)),
            ClearRegion::Scissored((0, 7, 8, 1))
        );
        assert_eq!(clear_region((8, 8), Viewport::new(8, 0, 4, 4)), ClearRegion::Nothing);
    }

    #[test]
    fn scissored_clear_leaves_the_rest_alone() {
        let Some(mut device) = headless(4, 4) else {
            return;
        };
        device.set_clear_color([1.0, 1.0, 1.0, 1.0]);
        device.clear(ClearMask::COLOR);
        device.set_scissor(Viewport::new(0, 0, 4, 1));
        device.set_clear_color([1.0, 0.0, 0.0, 1.0]);
        device.clear(ClearMask::COLOR);
        device.present();

        let pixels = device.read_front_buffer(Rect::new(0, 0, 3, 3)).unwrap();
        // rows come back top first, the scissor held the bottom row
        assert_eq!(pixels[12], [255, 0, 0, 255]);
        assert_eq!(pixels[15], [255, 0, 0, 255]);
        assert_eq!(pixels[0], [255, 255, 255, 255]);
        assert_eq!(pixels[11], [255, 255, 255, 255]);
    }

    #[test]
    fn invalid_commands_are_reported_and_dropped() {
        let Some(device) = headless(4, 4) else {
            return;
        };
        let buffer = |label| {
            device.device().create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: 16,
                usage: wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        };
        let (src, dst) = (buffer("src"), buffer("dst"));
        // copy sizes must be a multiple of COPY_BUFFER_ALIGNMENT
        let result = device.submit_checked("misaligned-copy", |encoder| {
            encoder.copy_buffer_to_buffer(&src, 0, &dst, 0, 3);
        });
        assert!(result.is_err());

        let result = device.submit_checked("aligned-copy", |encoder| {
            encoder.copy_buffer_to_buffer(&src, 0, &dst, 0, 4);
        });
        assert!(result.is_ok());
    }

    #[test]
    fn viewport_flips_to_top_left_origin() {
        assert_eq!(clip_to((100, 50), Viewport::new(10, 0, 20, 10)), Some((10, 40, 20, 10)));
        assert_eq!(clip_to((100, 50), Viewport::new(-5, -5, 10, 10)), Some((0, 45, 5, 5)));
        assert_eq!(clip_to((100, 50), Viewport::new(200, 0, 10, 10)), None);
    }
}
