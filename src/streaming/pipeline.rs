//! Double-buffered asynchronous export of presented frames to a stream sink.
//!
//! Each presented frame queues a GPU copy into the ring's write slot and, in
//! the same call, reads back the slot filled one frame earlier. Frame `k`
//! therefore reaches the sink during the call for frame `k + 1`, and the
//! first call after enabling pushes nothing.

use std::path::{Path, PathBuf};

use crate::gpu::GraphicsDevice;
use crate::render_target::RenderTarget;
use crate::streaming::ring::{PixelTransferRing, MIN_RING_SIZE};
use crate::streaming::sink::{NullSink, PixelFormat, SinkConnection, StreamFormat, StreamSink};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamState {
    Disabled,
    /// Enabled, no sink connection negotiated yet
    Configuring,
    /// Connected and negotiated
    Streaming,
}

/// Counters for one pipeline since construction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// Frames a copy was requested for
    pub frames_captured: u64,
    /// Frames handed to the sink
    pub frames_pushed: u64,
    /// Frames lost to copy, map, connection or push failures
    pub frames_dropped: u64,
    /// Sink reconnects triggered by a format change
    pub reconnects: u64,
}

struct Connection {
    inner: Box<dyn SinkConnection>,
    format: StreamFormat,
}

pub struct StreamingPipeline {
    state: StreamState,
    path: Option<PathBuf>,
    pixel_format: PixelFormat,
    ring_size: usize,
    ring: Option<PixelTransferRing>,
    sink: Box<dyn StreamSink>,
    connection: Option<Connection>,
    /// Format a connection attempt failed for; not retried until it changes
    failed_format: Option<StreamFormat>,
    sequence: u64,
    stats: StreamStats,
    scratch: Vec<u8>,
}

impl std::fmt::Debug for StreamingPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingPipeline")
            .field("state", &self.state)
            .field("path", &self.path)
            .field("pixel_format", &self.pixel_format)
            .field("ring", &self.ring)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl Default for StreamingPipeline {
    fn default() -> Self {
        Self::new(Box::new(NullSink), PixelFormat::default(), MIN_RING_SIZE)
    }
}

impl StreamingPipeline {
    pub fn new(sink: Box<dyn StreamSink>, pixel_format: PixelFormat, ring_size: usize) -> Self {
        Self {
            state: StreamState::Disabled,
            path: None,
            pixel_format,
            ring_size: ring_size.max(MIN_RING_SIZE),
            ring: None,
            sink,
            connection: None,
            failed_format: None,
            sequence: 0,
            stats: StreamStats::default(),
            scratch: Vec::new(),
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn is_enabled(&self) -> bool {
        self.state != StreamState::Disabled
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    pub fn stats(&self) -> StreamStats {
        self.stats
    }

    /// Format of the live sink connection, if any.
    pub fn negotiated_format(&self) -> Option<StreamFormat> {
        self.connection.as_ref().map(|c| c.format)
    }

    /// Swaps the sink implementation. Any open connection is closed; the next
    /// pushed frame connects through the new sink.
    pub fn set_sink(&mut self, sink: Box<dyn StreamSink>) {
        self.disconnect();
        self.sink = sink;
        self.failed_format = None;
    }

    /// Changes the pushed pixel layout. Takes effect with the next push,
    /// which renegotiates the sink.
    pub fn set_pixel_format(&mut self, pixel_format: PixelFormat) {
        self.pixel_format = pixel_format;
    }

    /// Starts streaming to `path`. Re-enabling clears a previous connection
    /// failure; the ring and its in-flight frames are kept.
    pub fn enable(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        if self.path.as_deref() != Some(path.as_path()) {
            self.disconnect();
        }
        log::info!("streaming frames to {}", path.display());
        self.path = Some(path);
        self.failed_format = None;
        if self.connection.is_none() {
            self.state = StreamState::Configuring;
        }
    }

    /// Stops streaming: closes the sink and frees the ring, abandoning any
    /// in-flight copy. Safe to call at any point of the frame cycle.
    pub fn disable<D: GraphicsDevice + ?Sized>(&mut self, device: &mut D) {
        if self.state != StreamState::Disabled {
            log::info!("streaming stopped");
        }
        self.release_ring(device);
        self.disconnect();
        self.state = StreamState::Disabled;
    }

    /// Frees the ring after the render target changed size. The next frame
    /// allocates a new one; frames still in flight are dropped.
    pub fn invalidate<D: GraphicsDevice + ?Sized>(&mut self, device: &mut D) {
        self.release_ring(device);
    }

    /// One streaming step, run after the offscreen target was blitted to the
    /// default target and before presentation.
    pub fn on_frame_presented<D: GraphicsDevice + ?Sized>(
        &mut self,
        device: &mut D,
        target: &RenderTarget,
    ) {
        if self.state == StreamState::Disabled {
            return;
        }
        let (Some(framebuffer), Some(region)) = (target.framebuffer(), target.rect()) else {
            return;
        };
        let Some((width, height)) = region.extent() else {
            return;
        };
        if !self.ensure_ring(device, width, height) {
            return;
        }
        let Some(ring) = self.ring.as_mut() else {
            return;
        };

        self.sequence += 1;
        let sequence = self.sequence;

        let write = ring.write_slot().buffer();
        match device.request_copy(framebuffer, region, write) {
            Ok(()) => {
                ring.mark_written(Some(sequence));
                self.stats.frames_captured += 1;
            }
            Err(err) => {
                log::debug!("frame {sequence} not captured: {err}");
                ring.mark_written(None);
                self.stats.frames_dropped += 1;
            }
        }

        let readable = ring.take_readable();
        ring.advance();

        let Some((buffer, captured)) = readable else {
            return;
        };

        let pixel_format = self.pixel_format;
        let scratch = &mut self.scratch;
        let read = device.read_transfer_buffer(buffer, &mut |rgba| {
            pixel_format.repack_rgba(rgba, scratch);
        });
        if let Err(err) = read {
            log::debug!("frame {captured} not read back: {err}");
            self.stats.frames_dropped += 1;
            return;
        }

        let format = StreamFormat::new(width, height, pixel_format);
        self.push(format, captured);
    }

    fn ensure_ring<D: GraphicsDevice + ?Sized>(
        &mut self,
        device: &mut D,
        width: u32,
        height: u32,
    ) -> bool {
        if let Some(ring) = &self.ring {
            if ring.dimensions() == (width, height) {
                return true;
            }
        }
        self.release_ring(device);
        match PixelTransferRing::allocate(device, self.ring_size, width, height) {
            Ok(ring) => {
                self.ring = Some(ring);
                true
            }
            Err(err) => {
                log::warn!("no transfer buffers for {width}x{height}: {err}");
                false
            }
        }
    }

    fn release_ring<D: GraphicsDevice + ?Sized>(&mut self, device: &mut D) {
        if let Some(ring) = self.ring.take() {
            ring.release(device);
        }
    }

    fn push(&mut self, format: StreamFormat, sequence: u64) {
        if self.connection.as_ref().is_some_and(|c| c.format != format) {
            log::info!(
                "stream format changed to {}x{} {:?}, reconnecting",
                format.width,
                format.height,
                format.pixel_format
            );
            self.disconnect();
            self.state = StreamState::Configuring;
            self.stats.reconnects += 1;
        }

        if self.connection.is_none() && !self.connect(format) {
            self.stats.frames_dropped += 1;
            return;
        }

        let Some(connection) = self.connection.as_mut() else {
            return;
        };
        match connection.inner.push(&self.scratch) {
            Ok(()) => self.stats.frames_pushed += 1,
            Err(err) => {
                log::debug!("frame {sequence} rejected by sink: {err}");
                self.stats.frames_dropped += 1;
            }
        }
    }

    fn connect(&mut self, format: StreamFormat) -> bool {
        if self.failed_format == Some(format) {
            return false;
        }
        let Some(path) = self.path.as_deref() else {
            return false;
        };

        let mut inner = match self.sink.open(path) {
            Ok(inner) => inner,
            Err(err) => {
                log::warn!("{err}");
                self.failed_format = Some(format);
                return false;
            }
        };
        if let Err(err) = inner.negotiate(&format) {
            log::warn!("{err}");
            inner.close();
            self.failed_format = Some(format);
            return false;
        }

        log::debug!("stream negotiated: {}", format.caps());
        self.connection = Some(Connection { inner, format });
        self.failed_format = None;
        self.state = StreamState::Streaming;
        true
    }

    fn disconnect(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.inner.close();
        }
        if self.state == StreamState::Streaming {
            self.state = StreamState::Configuring;
        }
    }
}
