//! Trigger-line calibration image
//!
//! Draws the configured line (red) and a 10% grid (white) over a frame and
//! burns in the line coordinates with a timestamp. Operators use the result
//! to check camera aim against the configured line.

use crate::domain::error::VisionError;
use crate::domain::types::TriggerLine;
use crate::io::file_sink::FileSink;
use ab_glyph::{FontVec, PxScale};
use chrono::NaiveDateTime;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_line_segment_mut, draw_text_mut};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

pub const DEFAULT_FILE_NAME: &str = "trigger_line.jpg";

const LINE_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const GRID_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const LINE_THICKNESS: i32 = 5;
const TEXT_ORIGIN: (i32, i32) = (50, 50);
const TEXT_SCALE: f32 = 28.0;

const SYSTEM_FONTS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/Library/Fonts/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

/// Load the overlay font, trying the configured path before system fonts
pub fn load_font(configured: Option<&Path>) -> Option<FontVec> {
    let candidates = configured.into_iter().chain(SYSTEM_FONTS.iter().map(Path::new));
    for path in candidates {
        let Ok(data) = std::fs::read(path) else {
            continue;
        };
        match FontVec::try_from_vec(data) {
            Ok(font) => {
                info!(path = %path.display(), "overlay_font_loaded");
                return Some(font);
            }
            Err(e) => warn!(path = %path.display(), error = %e, "overlay_font_invalid"),
        }
    }
    warn!("overlay_font_missing");
    None
}

pub fn trigger_line_label(line: &TriggerLine, now: NaiveDateTime) -> String {
    format!("Crossing line coordinates: {} - Time: {}", line, now.format("%Y%m%d %H:%M:%S"))
}

/// Draw grid, line and label onto `canvas`
///
/// Without a font the label is left out.
pub fn draw_trigger_line(canvas: &mut RgbImage, line: &TriggerLine, font: Option<&FontVec>, label: &str) {
    let (w, h) = canvas.dimensions();
    let (wf, hf) = (w as f32, h as f32);

    for step in 1..10 {
        let frac = step as f32 / 10.0;
        draw_line_segment_mut(canvas, (frac * wf, 0.0), (frac * wf, hf), GRID_COLOR);
        draw_line_segment_mut(canvas, (0.0, frac * hf), (wf, frac * hf), GRID_COLOR);
    }

    let start = (line.x1 as f32 * wf, line.y1 as f32 * hf);
    let end = (line.x2 as f32 * wf, line.y2 as f32 * hf);
    let half = LINE_THICKNESS / 2;
    for offset in -half..=half {
        let dy = offset as f32;
        draw_line_segment_mut(canvas, (start.0, start.1 + dy), (end.0, end.1 + dy), LINE_COLOR);
    }

    if let Some(font) = font {
        let (x, y) = TEXT_ORIGIN;
        draw_text_mut(canvas, LINE_COLOR, x, y, PxScale::from(TEXT_SCALE), font, label);
    }
}

pub struct TriggerLineRenderer {
    sink: Arc<dyn FileSink>,
    photos_dir: PathBuf,
    font: Option<FontVec>,
}

impl TriggerLineRenderer {
    pub fn new(sink: Arc<dyn FileSink>, photos_dir: impl Into<PathBuf>, font: Option<FontVec>) -> Self {
        Self { sink, photos_dir: photos_dir.into(), font }
    }

    /// Render the calibration image to `{photos_dir}/{file_name}`
    ///
    /// An empty frame is logged and skipped (`Ok(None)`).
    pub fn render(
        &self,
        frame: &RgbImage,
        line: &TriggerLine,
        file_name: &str,
        now: NaiveDateTime,
    ) -> Result<Option<PathBuf>, VisionError> {
        if frame.width() == 0 || frame.height() == 0 {
            warn!(line = %line, "trigger_line_frame_empty");
            return Ok(None);
        }

        let mut canvas = frame.clone();
        let label = trigger_line_label(line, now);
        draw_trigger_line(&mut canvas, line, self.font.as_ref(), &label);

        let path = self.photos_dir.join(file_name);
        self.sink.write_jpeg(&path, &canvas, None)?;
        info!(file = %path.display(), line = %line, "trigger_line_drawn");
        Ok(Some(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct CaptureSink {
        images: Mutex<Vec<(PathBuf, RgbImage)>>,
    }

    impl FileSink for CaptureSink {
        fn write_jpeg(&self, path: &Path, image: &RgbImage, _description: Option<&str>) -> Result<(), VisionError> {
            self.images.lock().push((path.to_path_buf(), image.clone()));
            Ok(())
        }
    }

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 1, 3).unwrap().and_hms_opt(8, 0, 1).unwrap()
    }

    #[test]
    fn test_label_format() {
        let line = TriggerLine::new(0.2, 0.9, 0.8, 1.0).unwrap();
        assert_eq!(
            trigger_line_label(&line, now()),
            "Crossing line coordinates: [0.2, 0.9, 0.8, 1.0] - Time: 20260103 08:00:01"
        );
    }

    #[test]
    fn test_draws_line_and_grid() {
        let line = TriggerLine::new(0.1, 0.5, 0.9, 0.5).unwrap();
        let mut canvas = RgbImage::new(100, 100);
        draw_trigger_line(&mut canvas, &line, None, "ignored");

        assert_eq!(canvas.get_pixel(50, 50), &LINE_COLOR);
        assert_eq!(canvas.get_pixel(50, 52), &LINE_COLOR);
        assert_eq!(canvas.get_pixel(10, 33), &GRID_COLOR);
        assert_eq!(canvas.get_pixel(33, 20), &GRID_COLOR);
        assert_eq!(canvas.get_pixel(5, 5), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_render_writes_named_file() {
        let sink = Arc::new(CaptureSink::default());
        let renderer = TriggerLineRenderer::new(sink.clone(), "/photos", None);
        let line = TriggerLine::new(0.3, 0.95, 0.7, 0.95).unwrap();

        let path = renderer.render(&RgbImage::new(64, 48), &line, DEFAULT_FILE_NAME, now()).unwrap();

        assert_eq!(path, Some(PathBuf::from("/photos/trigger_line.jpg")));
        let images = sink.images.lock();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].1.dimensions(), (64, 48));
    }

    #[test]
    fn test_render_skips_empty_frame() {
        let sink = Arc::new(CaptureSink::default());
        let renderer = TriggerLineRenderer::new(sink.clone(), "/photos", None);
        let line = TriggerLine::new(0.3, 0.95, 0.7, 0.95).unwrap();

        assert_eq!(renderer.render(&RgbImage::new(0, 0), &line, DEFAULT_FILE_NAME, now()).unwrap(), None);
        assert!(sink.images.lock().is_empty());
    }

    #[test]
    fn test_load_font_missing_path_falls_back() {
        // Must not panic whether or not a system font exists
        let _ = load_font(Some(Path::new("/nonexistent/font.ttf")));
    }
}
