use render_canvas::backends::software::{DeviceOp, SoftwareDevice};
use render_canvas::viewport::TrustCachedViewport;
use render_canvas::{Canvas, HeadlessWindow, HostKind, Rect, Viewport};

fn canvas(frame: Rect) -> Canvas<SoftwareDevice, HeadlessWindow> {
    Canvas::new(
        SoftwareDevice::new(800, 600),
        HeadlessWindow::new(800, 600),
        HostKind::Standalone,
        frame,
    )
}

#[test]
fn full_frame_viewport_is_inclusive() {
    let mut canvas = canvas(Rect::new(0, 0, 639, 479));
    let vp = canvas.set_viewport(0, 0, 639, 479);
    assert_eq!(vp, Viewport::new(0, 0, 640, 480));
    assert_eq!(canvas.viewport(), Viewport::new(0, 0, 640, 480));
    assert_eq!(canvas.area_rect(), Rect::new(0, 0, 639, 479));
}

#[test]
fn viewport_is_offset_by_frame_origin() {
    let mut canvas = canvas(Rect::new(100, 50, 739, 529));
    let vp = canvas.set_viewport(10, 20, 109, 69);
    assert_eq!(vp, Viewport::new(110, 70, 100, 50));
    assert_eq!(canvas.area_rect(), Rect::new(110, 70, 209, 119));
}

#[test]
fn viewport_and_scissor_are_issued_together() {
    let mut canvas = canvas(Rect::new(0, 0, 639, 479));
    canvas.device_mut().take_ops();
    canvas.set_viewport(0, 0, 319, 239);
    let expected = Viewport::new(0, 0, 320, 240);
    assert_eq!(
        canvas.device().ops(),
        &[DeviceOp::SetViewport(expected), DeviceOp::SetScissor(expected)]
    );
    assert_eq!(canvas.area_rect(), Rect::new(0, 0, 319, 239));
}

#[test]
fn single_pixel_viewport() {
    let mut canvas = canvas(Rect::new(0, 0, 639, 479));
    assert_eq!(canvas.set_viewport(5, 5, 5, 5), Viewport::new(5, 5, 1, 1));
}

#[test]
fn inverted_extreme_bounds_degrade_without_panicking() {
    let mut canvas = canvas(Rect::new(0, 0, 639, 479));
    let vp = canvas.set_viewport(i32::MAX, 0, i32::MIN, 0);
    assert!(vp.is_degenerate());
    assert_eq!(canvas.viewport(), vp);

    canvas.begin_draw();
    canvas.clear_buffer(render_canvas::ClearMask::COLOR);
    canvas.swap_buffers();
}

#[test]
fn huge_valid_bounds_saturate_at_the_frame_offset() {
    let mut canvas = canvas(Rect::new(100, 50, 163, 97));
    let vp = canvas.set_viewport(0, 0, i32::MAX - 50, 0);
    assert_eq!(vp.x, 100);
    assert_eq!((vp.width, vp.height), (i32::MAX - 49, 1));
    assert_eq!(canvas.area_rect().right(), i32::MAX);

    canvas.begin_draw();
    canvas.clear_color(1.0, 1.0, 1.0, 1.0);
    canvas.clear_buffer(render_canvas::ClearMask::COLOR);
    assert_eq!(canvas.device().back_pixel(100, 50), Some([255, 255, 255, 255]));
    assert_eq!(canvas.device().back_pixel(799, 50), Some([255, 255, 255, 255]));
    assert_eq!(canvas.device().back_pixel(100, 51), Some([0, 0, 0, 0]));
}

#[test]
fn init_covers_the_whole_frame() {
    let mut canvas = canvas(Rect::new(0, 0, 399, 299));
    canvas.init();
    assert_eq!(canvas.viewport(), Viewport::new(0, 0, 400, 300));
}

#[test]
fn update_viewport_only_touches_the_cache() {
    let mut canvas = canvas(Rect::new(0, 0, 639, 479));
    canvas.set_viewport_probe(Box::new(TrustCachedViewport));
    canvas.device_mut().take_ops();
    canvas.update_viewport(1, 2, 3, 4);
    assert!(canvas.device().ops().is_empty());
    assert_eq!(canvas.viewport(), Viewport::new(1, 2, 3, 4));
}

#[test]
#[cfg(debug_assertions)]
#[should_panic(expected = "cached viewport drifted")]
fn drifted_viewport_asserts_in_debug_builds() {
    let mut canvas = canvas(Rect::new(0, 0, 639, 479));
    canvas.set_viewport(0, 0, 639, 479);
    canvas.update_viewport(0, 0, 10, 10);
    let _ = canvas.viewport();
}
