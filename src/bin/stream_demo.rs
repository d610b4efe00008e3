//! Renders a handful of frames offscreen with the headless wgpu device,
//! streams them to a file and writes a screenshot of the last one.

use std::fs;
use std::path::Path;

use render_canvas::backends::wgpu::WgpuDevice;
use render_canvas::streaming::{FileSink, PixelFormat};
use render_canvas::{Canvas, CanvasConfig, ClearMask, HeadlessWindow, HostKind, PngCodec, Rect};

const WINDOW_WIDTH: u32 = 320;
const WINDOW_HEIGHT: u32 = 240;
const FRAMES: usize = 8;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let out_dir = Path::new("stream_out");
    fs::create_dir_all(out_dir)?;

    let config = match std::env::args().nth(1) {
        Some(path) => CanvasConfig::from_json_file(path)?,
        None => CanvasConfig {
            rendering_resolution: Some((160, 120)),
            stream_format: PixelFormat::Rgb8,
            host: HostKind::Standalone,
            ..CanvasConfig::default()
        },
    };

    let device = WgpuDevice::headless(WINDOW_WIDTH, WINDOW_HEIGHT)?;
    let window = HeadlessWindow::new(WINDOW_WIDTH, WINDOW_HEIGHT);
    let frame = Rect::from_origin_size(0, 0, WINDOW_WIDTH as i32, WINDOW_HEIGHT as i32);
    let mut canvas = Canvas::from_config(device, window, frame, &config);

    canvas.set_stream_sink(Box::new(FileSink));
    let stream_path = config
        .stream_path
        .clone()
        .unwrap_or_else(|| out_dir.join("frames.raw"));
    canvas.enable_streaming(stream_path.clone());
    canvas.init();

    for i in 0..FRAMES {
        canvas.begin_draw();
        let t = i as f32 / (FRAMES - 1) as f32;
        canvas.clear_color(t, 0.2, 1.0 - t, 1.0);
        canvas.clear_buffer(ClearMask::ALL);
        canvas.end_draw();
        canvas.swap_buffers();
    }

    let shot = canvas.make_screenshot(out_dir.join("last_frame"), &PngCodec)?;
    let stats = canvas.stream_stats();
    canvas.disable_streaming();

    println!(
        "{} frames rendered, {} streamed to {}, {} dropped",
        FRAMES,
        stats.frames_pushed,
        stream_path.display(),
        stats.frames_dropped
    );
    println!("screenshot written to {}", shot.display());
    Ok(())
}
