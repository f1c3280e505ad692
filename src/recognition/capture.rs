use chrono::{DateTime, Local};
use device_query::{DeviceQuery, DeviceState};
use image::{DynamicImage, GenericImageView};
use log::{info, warn};
use std::time::Instant;

use super::RecognitionError;

/// 一次截屏得到的帧。每次识别现截现用，不做缓存。
#[derive(Debug)]
pub struct CaptureFrame {
    pub image: DynamicImage,
    pub width: u32,
    pub height: u32,
    /// 捕获区域左上角在屏幕坐标系中的位置
    pub origin: (i32, i32),
    pub taken_at: DateTime<Local>,
}

impl CaptureFrame {
    pub fn new(image: DynamicImage, origin: (i32, i32)) -> Self {
        let width = image.width();
        let height = image.height();
        Self {
            image,
            width,
            height,
            origin,
            taken_at: Local::now(),
        }
    }
}

const GAME_TITLES: [&str; 2] = ["the bazaar", "thebazaar"];
// 标题里带游戏名的干扰窗口（编辑器、推流、本工具自己）
const EXCLUDED_TITLES: [&str; 4] = ["visual studio code", "obs", "mediaplayer", "bazaarlens"];

fn find_game_window() -> Option<xcap::Window> {
    let windows = xcap::Window::all().ok()?;
    windows.into_iter().find(|w| {
        let title = w.title().to_lowercase();
        let app_name = w.app_name().to_lowercase();

        let is_excluded = EXCLUDED_TITLES
            .iter()
            .any(|ex| title.contains(ex) || app_name.contains(ex));
        let is_game = GAME_TITLES
            .iter()
            .any(|t| title.contains(t) || app_name.contains(t));

        is_game && !is_excluded
    })
}

pub fn cursor_position() -> (i32, i32) {
    let device_state = DeviceState::new();
    let mouse = device_state.get_mouse();
    mouse.coords
}

fn monitor_under_cursor() -> Result<xcap::Monitor, RecognitionError> {
    let mut monitors =
        xcap::Monitor::all().map_err(|e| RecognitionError::Capture(e.to_string()))?;
    if monitors.is_empty() {
        return Err(RecognitionError::Capture("no monitor found".into()));
    }

    let (mx, my) = cursor_position();
    let idx = monitors
        .iter()
        .position(|m| {
            let (x, y) = (m.x(), m.y());
            mx >= x && mx < x + m.width() as i32 && my >= y && my < y + m.height() as i32
        })
        .unwrap_or(0);
    Ok(monitors.swap_remove(idx))
}

/// 截取游戏窗口。找不到窗口时回落到光标所在显示器。
/// 整个调用走同步路径，目标耗时 50ms 以内，不重试。
pub fn capture_screen() -> Result<CaptureFrame, RecognitionError> {
    let start = Instant::now();

    let frame = if let Some(window) = find_game_window() {
        info!(
            "[Capture] Found game window: '{}' (App: '{}'), Pos: {:?}, Size: {:?}",
            window.title(),
            window.app_name(),
            (window.x(), window.y()),
            (window.width(), window.height())
        );
        let img = window.capture_image().map_err(|e| {
            warn!("[Capture] Error capturing window: {}. Ensure screen recording permission is granted.", e);
            RecognitionError::Capture(e.to_string())
        })?;
        CaptureFrame::new(
            DynamicImage::ImageRgba8(img),
            (window.x(), window.y()),
        )
    } else {
        warn!("[Capture] Game window not found, falling back to monitor under cursor");
        let monitor = monitor_under_cursor()?;
        let img = monitor
            .capture_image()
            .map_err(|e| RecognitionError::Capture(e.to_string()))?;
        CaptureFrame::new(DynamicImage::ImageRgba8(img), (monitor.x(), monitor.y()))
    };

    info!("[Timer] 截图耗时: {:?}", start.elapsed());
    Ok(frame)
}

/// 以屏幕坐标 (cx, cy) 为中心截取 size x size 的区域，越界部分收缩到显示器内。
pub fn capture_around(cx: i32, cy: i32, size: u32) -> Result<CaptureFrame, RecognitionError> {
    if size == 0 {
        return Err(RecognitionError::Capture("zero-size capture region".into()));
    }

    let start = Instant::now();
    let monitor = monitor_under_cursor()?;
    let img = monitor
        .capture_image()
        .map_err(|e| RecognitionError::Capture(e.to_string()))?;
    let full = DynamicImage::ImageRgba8(img);

    // 光标换算到显示器本地坐标，再裁出以其为中心的窗口
    let local_x = cx - monitor.x();
    let local_y = cy - monitor.y();
    let half = (size / 2) as i32;
    let x0 = (local_x - half).clamp(0, full.width().saturating_sub(size) as i32) as u32;
    let y0 = (local_y - half).clamp(0, full.height().saturating_sub(size) as i32) as u32;
    let w = size.min(full.width());
    let h = size.min(full.height());
    if w == 0 || h == 0 {
        return Err(RecognitionError::Capture("zero-size capture region".into()));
    }

    let crop = full.crop_imm(x0, y0, w, h);
    let frame = CaptureFrame::new(
        crop,
        (monitor.x() + x0 as i32, monitor.y() + y0 as i32),
    );
    info!("[Timer] 截图耗时: {:?}", start.elapsed());
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_size_region_is_rejected() {
        let err = capture_around(100, 100, 0).unwrap_err();
        assert!(matches!(err, RecognitionError::Capture(_)));
        assert_eq!(err.to_string(), "capture failed: zero-size capture region");
    }

    #[test]
    fn frame_records_dimensions_and_origin() {
        let img = DynamicImage::new_rgba8(320, 200);
        let frame = CaptureFrame::new(img, (-1920, 40));
        assert_eq!(frame.width, 320);
        assert_eq!(frame.height, 200);
        assert_eq!(frame.origin, (-1920, 40));
    }
}
