use std::path::Path;

use render_canvas::backends::software::SoftwareDevice;
use render_canvas::streaming::{FileSink, PixelFormat, StreamState};
use render_canvas::window::CursorShape;
use render_canvas::{
    Canvas, CanvasConfig, ClearMask, DrawTarget, HeadlessWindow, HostKind, MouseState, Rect,
    Viewport,
};

fn embedded_canvas() -> Canvas<SoftwareDevice, HeadlessWindow> {
    Canvas::new(
        SoftwareDevice::new(800, 600),
        HeadlessWindow::new(800, 600),
        HostKind::Embedded {
            region_left: 100,
            region_top: 529,
        },
        Rect::new(100, 50, 739, 529),
    )
}

fn standalone_canvas() -> Canvas<SoftwareDevice, HeadlessWindow> {
    Canvas::new(
        SoftwareDevice::new(640, 480),
        HeadlessWindow::new(640, 480),
        HostKind::Standalone,
        Rect::new(0, 0, 639, 479),
    )
}

#[test]
fn embedded_warp_flips_vertically() {
    let mut canvas = embedded_canvas();
    canvas.set_mouse_position(10, 20);
    assert_eq!(canvas.window().cursor_position(), Some((110, 50 + (480 - 20))));
}

#[test]
fn standalone_warp_passes_through() {
    let mut canvas = standalone_canvas();
    canvas.set_mouse_position(10, 20);
    assert_eq!(canvas.window().cursor_position(), Some((10, 20)));
}

#[test]
fn embedded_pointer_follows_the_area() {
    let mut canvas = embedded_canvas();
    canvas.set_viewport(20, 0, 639, 459);
    // area.left = 120, area.top = 509
    assert_eq!(canvas.mouse_x(130), 130 - 20);
    assert_eq!(canvas.mouse_y(40), 40 - 20);
}

#[test]
fn pointer_normalizes_against_render_resolution() {
    let mut canvas = standalone_canvas();
    assert_eq!(canvas.mouse_normalized(320, 240), (0.5, 0.5));
    canvas.set_rendering_resolution(1280, 960);
    assert_eq!(canvas.mouse_normalized(320, 240), (0.25, 0.25));
    assert_eq!((canvas.width(), canvas.height()), (1280, 960));
}

#[test]
fn mouse_states_drive_the_cursor() {
    let mut canvas = standalone_canvas();

    canvas.set_mouse_state(MouseState::Invisible);
    assert!(!canvas.window().cursor_visible());

    canvas.set_mouse_state(MouseState::Wait);
    assert!(canvas.window().cursor_visible());
    assert_eq!(canvas.window().cursor_shape(), CursorShape::Wait);

    canvas.set_mouse_state(MouseState::Normal);
    assert!(canvas.window().cursor_visible());
    assert_eq!(canvas.window().cursor_shape(), CursorShape::Default);
    assert_eq!(canvas.mouse_state(), MouseState::Normal);
}

#[test]
fn swap_interval_goes_through_the_window() {
    let mut canvas = standalone_canvas();
    assert_eq!(canvas.swap_interval(), None);
    assert!(canvas.set_swap_interval(1));
    assert_eq!(canvas.swap_interval(), Some(1));
}

#[test]
fn swap_buffers_presents_and_swaps() {
    let mut canvas = standalone_canvas();
    canvas.begin_draw();
    canvas.clear_color(0.0, 1.0, 0.0, 1.0);
    canvas.clear_buffer(ClearMask::COLOR);
    assert_eq!(canvas.device().front_pixel(0, 0), Some([0, 0, 0, 0]));
    canvas.swap_buffers();
    assert_eq!(canvas.device().front_pixel(0, 0), Some([0, 255, 0, 255]));
    assert_eq!(canvas.window().swaps(), 1);
    assert_eq!(canvas.window().activations(), 1);
}

#[test]
fn resize_moves_the_frame_and_area() {
    let mut canvas = standalone_canvas();
    canvas.set_viewport(10, 10, 19, 19);
    canvas.resize(320, 200);
    assert_eq!(canvas.frame_rect(), Rect::new(0, 0, 319, 199));
    assert_eq!(canvas.area_rect(), canvas.frame_rect());
    assert_eq!(canvas.viewport(), Viewport::new(0, 0, 320, 200));
    assert_eq!((canvas.width(), canvas.height()), (320, 200));
}

#[test]
fn resize_to_window_follows_the_client_area() {
    let mut canvas = standalone_canvas();
    canvas.window_mut().resize(1024, 768);
    canvas.resize_to_window();
    assert_eq!(canvas.frame_rect(), Rect::new(0, 0, 1023, 767));
    assert_eq!(canvas.viewport(), Viewport::new(0, 0, 1024, 768));
}

#[test]
fn moving_the_frame_resets_viewport_and_mapping() {
    let mut canvas = embedded_canvas();
    assert_eq!(
        canvas.host(),
        HostKind::Embedded {
            region_left: 100,
            region_top: 529,
        }
    );
    canvas.set_viewport(20, 0, 639, 459);
    canvas.set_frame_rect(Rect::new(200, 50, 839, 529));
    assert_eq!(canvas.area_rect(), Rect::new(200, 50, 839, 529));
    assert_eq!(canvas.viewport(), Viewport::new(200, 50, 640, 480));

    canvas.set_mouse_position(0, 0);
    assert_eq!(canvas.window().cursor_position(), Some((200, 50 + 480)));
}

#[test]
fn empty_shared_memory_path_uses_default() {
    let mut canvas = standalone_canvas();
    canvas.set_shared_memory_path("");
    assert_eq!(canvas.streaming().path(), Some(Path::new("/tmp/bge")));
    assert_eq!(canvas.stream_state(), StreamState::Configuring);

    canvas.set_shared_memory_path("/tmp/other");
    assert_eq!(canvas.streaming().path(), Some(Path::new("/tmp/other")));
}

#[test]
fn config_builds_an_offscreen_streaming_canvas() {
    let config = CanvasConfig::from_json_str(
        r#"{
            "rendering_resolution": [32, 24],
            "stream_path": "/tmp/configured",
            "stream_format": "rgb8",
            "swap_interval": 0,
            "clear_color": [0.0, 0.0, 1.0, 1.0]
        }"#,
    )
    .unwrap();
    let mut canvas = Canvas::from_config(
        SoftwareDevice::new(64, 48),
        HeadlessWindow::new(64, 48),
        Rect::new(0, 0, 63, 47),
        &config,
    );

    assert_eq!(canvas.swap_interval(), Some(0));
    assert_eq!(canvas.stream_state(), StreamState::Configuring);
    assert_eq!(canvas.streaming().pixel_format(), PixelFormat::Rgb8);
    assert!(matches!(canvas.begin_draw(), DrawTarget::Offscreen(_)));

    canvas.clear_buffer(ClearMask::COLOR);
    let fb = canvas.render_target().framebuffer().unwrap();
    assert_eq!(canvas.device().framebuffer_pixel(fb, 0, 0), Some([0, 0, 255, 255]));
}

#[test]
fn file_sink_writes_caps_then_frames() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stream.raw");

    let mut canvas = standalone_canvas();
    canvas.set_rendering_resolution(8, 6);
    canvas.set_stream_sink(Box::new(FileSink));
    canvas.set_stream_format(PixelFormat::Rgb8);
    canvas.enable_streaming(&path);
    for _ in 0..4 {
        canvas.begin_draw();
        canvas.clear_buffer(ClearMask::ALL);
        canvas.swap_buffers();
    }
    canvas.disable_streaming();

    let bytes = std::fs::read(&path).unwrap();
    let newline = bytes.iter().position(|b| *b == b'\n').unwrap();
    let caps = std::str::from_utf8(&bytes[..newline]).unwrap();
    assert_eq!(
        caps,
        "video/x-raw-rgb,bpp=24,endianness=4321,depth=24,red_mask=16711680,green_mask=65280,blue_mask=255,width=8,height=6,framerate=60/1"
    );
    assert_eq!(bytes.len() - newline - 1, 3 * 8 * 6 * 3);
}
