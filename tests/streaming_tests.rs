use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use render_canvas::backends::software::{DeviceOp, SoftwareDevice};
use render_canvas::error::SinkError;
use render_canvas::streaming::{PixelFormat, SinkConnection, StreamFormat, StreamSink, StreamState};
use render_canvas::{Canvas, ClearMask, HeadlessWindow, HostKind, Rect};

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Open(PathBuf),
    Negotiate(StreamFormat),
    Push(Vec<u8>),
    Close,
}

#[derive(Default)]
struct Recorder {
    events: Vec<Event>,
    fail_open: bool,
}

#[derive(Clone, Default)]
struct RecordingSink(Rc<RefCell<Recorder>>);

struct RecordingConnection(Rc<RefCell<Recorder>>);

impl RecordingSink {
    fn events(&self) -> Vec<Event> {
        self.0.borrow().events.clone()
    }

    fn pushes(&self) -> Vec<Vec<u8>> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Push(bytes) => Some(bytes),
                _ => None,
            })
            .collect()
    }

    fn opens(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, Event::Open(_)))
            .count()
    }

    fn fail_open(&self, fail: bool) {
        self.0.borrow_mut().fail_open = fail;
    }
}

impl StreamSink for RecordingSink {
    fn open(&mut self, path: &Path) -> Result<Box<dyn SinkConnection>, SinkError> {
        let mut rec = self.0.borrow_mut();
        rec.events.push(Event::Open(path.to_path_buf()));
        if rec.fail_open {
            return Err(SinkError::Open {
                path: path.to_path_buf(),
                reason: "refused".to_string(),
            });
        }
        Ok(Box::new(RecordingConnection(self.0.clone())))
    }
}

impl SinkConnection for RecordingConnection {
    fn negotiate(&mut self, format: &StreamFormat) -> Result<(), SinkError> {
        self.0.borrow_mut().events.push(Event::Negotiate(*format));
        Ok(())
    }

    fn push(&mut self, frame: &[u8]) -> Result<(), SinkError> {
        self.0.borrow_mut().events.push(Event::Push(frame.to_vec()));
        Ok(())
    }

    fn close(self: Box<Self>) {
        self.0.borrow_mut().events.push(Event::Close);
    }
}

type TestCanvas = Canvas<SoftwareDevice, HeadlessWindow>;

fn streaming_canvas(sink: &RecordingSink) -> TestCanvas {
    let device = SoftwareDevice::new(64, 48);
    let window = HeadlessWindow::new(64, 48);
    let mut canvas = Canvas::new(device, window, HostKind::Standalone, Rect::new(0, 0, 63, 47));
    canvas.set_rendering_resolution(32, 24);
    canvas.set_stream_sink(Box::new(sink.clone()));
    canvas.enable_streaming("/tmp/canvas-test");
    canvas
}

/// Draws one frame cleared to red `10 * k`.
fn frame(canvas: &mut TestCanvas, k: u8) {
    canvas.begin_draw();
    canvas.clear_color(f32::from(k * 10) / 255.0, 0.0, 0.0, 1.0);
    canvas.clear_buffer(ClearMask::ALL);
    canvas.end_draw();
    canvas.swap_buffers();
}

fn red(frame: &[u8]) -> u8 {
    frame[0]
}

#[test]
fn frames_reach_the_sink_one_call_late() {
    let sink = RecordingSink::default();
    let mut canvas = streaming_canvas(&sink);

    frame(&mut canvas, 1);
    assert!(sink.pushes().is_empty());

    for k in 2..=5 {
        frame(&mut canvas, k);
        let pushes = sink.pushes();
        assert_eq!(pushes.len(), (k - 1) as usize);
        assert_eq!(red(pushes.last().unwrap()), (k - 1) * 10);
    }

    assert_eq!(canvas.stream_state(), StreamState::Streaming);
    assert_eq!(sink.opens(), 1);
}

#[test]
fn pushed_frames_carry_negotiated_dimensions() {
    let sink = RecordingSink::default();
    let mut canvas = streaming_canvas(&sink);
    frame(&mut canvas, 1);
    frame(&mut canvas, 2);

    let events = sink.events();
    assert_eq!(events[0], Event::Open(PathBuf::from("/tmp/canvas-test")));
    assert_eq!(
        events[1],
        Event::Negotiate(StreamFormat::new(32, 24, PixelFormat::Rgba8))
    );
    assert_eq!(sink.pushes()[0].len(), 32 * 24 * 4);
    assert_eq!(
        canvas.streaming().negotiated_format(),
        Some(StreamFormat::new(32, 24, PixelFormat::Rgba8))
    );
}

#[test]
fn resize_renegotiates_before_next_push() {
    let sink = RecordingSink::default();
    let mut canvas = streaming_canvas(&sink);
    for k in 1..=3 {
        frame(&mut canvas, k);
    }
    canvas.set_rendering_resolution(16, 12);
    for k in 4..=6 {
        frame(&mut canvas, k);
    }

    let events = sink.events();
    let last_old = events
        .iter()
        .rposition(|e| matches!(e, Event::Push(bytes) if bytes.len() == 32 * 24 * 4))
        .unwrap();
    assert_eq!(events[last_old + 1], Event::Close);
    assert!(matches!(events[last_old + 2], Event::Open(_)));
    assert_eq!(
        events[last_old + 3],
        Event::Negotiate(StreamFormat::new(16, 12, PixelFormat::Rgba8))
    );
    match &events[last_old + 4] {
        Event::Push(bytes) => assert_eq!(bytes.len(), 16 * 12 * 4),
        other => panic!("expected a push, got {other:?}"),
    }
    assert_eq!(canvas.stream_stats().reconnects, 1);
}

#[test]
fn resize_drops_frames_in_flight() {
    let sink = RecordingSink::default();
    let mut canvas = streaming_canvas(&sink);
    frame(&mut canvas, 1);
    frame(&mut canvas, 2);
    canvas.set_rendering_resolution(16, 12);
    frame(&mut canvas, 3);
    frame(&mut canvas, 4);

    let reds: Vec<u8> = sink.pushes().iter().map(|f| red(f)).collect();
    assert_eq!(reds, vec![10, 30]);
}

#[test]
fn rgb_stream_repacks_on_host() {
    let sink = RecordingSink::default();
    let mut canvas = streaming_canvas(&sink);
    canvas.set_stream_format(PixelFormat::Rgb8);
    frame(&mut canvas, 1);
    frame(&mut canvas, 2);

    let pushes = sink.pushes();
    assert_eq!(pushes[0].len(), 32 * 24 * 3);
    assert_eq!(&pushes[0][..6], &[10, 0, 0, 10, 0, 0]);
}

#[test]
fn disable_mid_pipeline_stops_pushes_and_frees_ring() {
    let sink = RecordingSink::default();
    let mut canvas = streaming_canvas(&sink);
    frame(&mut canvas, 1);
    frame(&mut canvas, 2);
    assert_eq!(sink.pushes().len(), 1);
    assert_eq!(canvas.device().live_transfer_buffers(), 2);
    assert!(canvas.streaming().is_enabled());

    canvas.disable_streaming();
    assert!(!canvas.streaming().is_enabled());
    assert_eq!(canvas.streaming().negotiated_format(), None);
    assert_eq!(canvas.device().live_transfer_buffers(), 0);
    assert_eq!(sink.events().last(), Some(&Event::Close));

    for k in 3..=5 {
        frame(&mut canvas, k);
    }
    assert_eq!(sink.pushes().len(), 1);
    assert_eq!(canvas.stream_state(), StreamState::Disabled);
}

#[test]
fn failed_copy_skips_that_frame() {
    let sink = RecordingSink::default();
    let mut canvas = streaming_canvas(&sink);
    frame(&mut canvas, 1);
    canvas.device_mut().fail_next_copies(1);
    frame(&mut canvas, 2);
    frame(&mut canvas, 3);
    frame(&mut canvas, 4);

    let reds: Vec<u8> = sink.pushes().iter().map(|f| red(f)).collect();
    assert_eq!(reds, vec![10, 30]);
    assert_eq!(canvas.stream_stats().frames_dropped, 1);
}

#[test]
fn failed_map_skips_that_frame() {
    let sink = RecordingSink::default();
    let mut canvas = streaming_canvas(&sink);
    frame(&mut canvas, 1);
    canvas.device_mut().fail_next_maps(1);
    frame(&mut canvas, 2);
    frame(&mut canvas, 3);

    let reds: Vec<u8> = sink.pushes().iter().map(|f| red(f)).collect();
    assert_eq!(reds, vec![20]);
}

#[test]
fn failed_open_is_not_retried_until_reenabled() {
    let sink = RecordingSink::default();
    sink.fail_open(true);
    let mut canvas = streaming_canvas(&sink);
    for k in 1..=4 {
        frame(&mut canvas, k);
    }
    assert_eq!(sink.opens(), 1);
    assert!(sink.pushes().is_empty());
    assert_eq!(canvas.stream_state(), StreamState::Configuring);

    sink.fail_open(false);
    canvas.enable_streaming("/tmp/canvas-test");
    frame(&mut canvas, 5);
    assert_eq!(sink.opens(), 2);
    assert_eq!(red(sink.pushes().last().unwrap()), 40);
}

#[test]
fn streaming_without_offscreen_target_is_a_no_op() {
    let sink = RecordingSink::default();
    let device = SoftwareDevice::new(64, 48);
    let window = HeadlessWindow::new(64, 48);
    let mut canvas = Canvas::new(device, window, HostKind::Standalone, Rect::new(0, 0, 63, 47));
    canvas.set_stream_sink(Box::new(sink.clone()));
    canvas.enable_streaming("/tmp/canvas-test");
    frame(&mut canvas, 1);
    frame(&mut canvas, 2);
    assert!(sink.events().is_empty());
    assert_eq!(canvas.device().live_transfer_buffers(), 0);
}

#[test]
fn read_and_write_slots_never_alias() {
    let sink = RecordingSink::default();
    let mut canvas = streaming_canvas(&sink);
    for k in 1..=6 {
        frame(&mut canvas, k);
    }
    let ops = canvas.device().ops();
    for pair in ops.windows(2) {
        if let [DeviceOp::RequestCopy(written), DeviceOp::ReadTransferBuffer(read)] = pair {
            assert_ne!(written, read);
        }
    }
}
