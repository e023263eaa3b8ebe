//! Evidence capture for a completed crossing
//!
//! Produces two files per crossing:
//! - `{location}_{YYYYmmdd_HHMMSS}_{id}.jpg`: the full frame, EXIF-tagged
//!   with location and crossing time
//! - `{location}_{YYYYmmdd_HHMMSS}_{id}_crop.jpg`: approach crops (80%, 90%)
//!   and the crossing crop side by side on a white background

use crate::domain::error::VisionError;
use crate::domain::types::{TrackId, Xyxy};
use crate::io::file_sink::FileSink;
use chrono::NaiveDateTime;
use image::{imageops, Rgb, RgbImage};
use std::fmt::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

const PAD_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

/// Output of one completed crossing
#[derive(Debug, Clone)]
pub struct CrossingEvent {
    pub track_id: TrackId,
    pub camera_location: String,
    pub timestamp: NaiveDateTime,
    pub full_frame_path: PathBuf,
    pub composite_crop_path: PathBuf,
    pub composite_size: (u32, u32),
    /// ImageDescription embedded in the full frame
    pub exif_description: String,
}

/// Crop the normalized box out of a frame
///
/// Coordinates are scaled to the frame, truncated to whole pixels and clamped.
/// A non-empty frame always yields at least a 1x1 crop.
pub fn crop_region(frame: &RgbImage, xyxyn: &Xyxy) -> RgbImage {
    let (w, h) = frame.dimensions();
    if w == 0 || h == 0 {
        return RgbImage::new(0, 0);
    }

    let scale = |v: f64, max: u32| ((v.max(0.0) * max as f64) as u32).min(max);
    let x1 = scale(xyxyn.x1, w).min(w - 1);
    let y1 = scale(xyxyn.y1, h).min(h - 1);
    let x2 = scale(xyxyn.x2, w).max(x1 + 1);
    let y2 = scale(xyxyn.y2, h).max(y1 + 1);

    imageops::crop_imm(frame, x1, y1, x2 - x1, y2 - y1).to_image()
}

/// Concatenate crops left to right, vertically centered on white
///
/// Height is the tallest crop; when the padding is odd the extra row goes
/// to the bottom.
pub fn compose_crops(crops: &[RgbImage]) -> RgbImage {
    let width: u32 = crops.iter().map(|c| c.width()).sum();
    let height = crops.iter().map(|c| c.height()).max().unwrap_or(0);

    let mut canvas = RgbImage::from_pixel(width, height, PAD_COLOR);
    let mut x = 0i64;
    for crop in crops {
        let top = (height - crop.height()) / 2;
        imageops::replace(&mut canvas, crop, x, i64::from(top));
        x += i64::from(crop.width());
    }
    canvas
}

/// JSON description stored in the full frame's EXIF
///
/// Formatted as `{"passeringspunkt": .., "passeringstid": ..}` with non-ASCII
/// characters escaped so the value fits the ASCII EXIF tag.
pub fn exif_description(camera_location: &str, time_text: &str) -> String {
    let mut out = String::with_capacity(64 + camera_location.len());
    out.push_str("{\"passeringspunkt\": ");
    push_json_ascii(&mut out, camera_location);
    out.push_str(", \"passeringstid\": ");
    push_json_ascii(&mut out, time_text);
    out.push('}');
    out
}

fn push_json_ascii(out: &mut String, value: &str) {
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_ascii() && !c.is_ascii_control() => out.push(c),
            c => {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    let _ = write!(out, "\\u{unit:04x}");
                }
            }
        }
    }
    out.push('"');
}

/// Builds and writes crossing evidence
#[derive(Clone)]
pub struct EvidenceCapture {
    sink: Arc<dyn FileSink>,
    photos_dir: PathBuf,
    camera_location: String,
}

impl EvidenceCapture {
    pub fn new(sink: Arc<dyn FileSink>, photos_dir: impl Into<PathBuf>, camera_location: &str) -> Self {
        Self { sink, photos_dir: photos_dir.into(), camera_location: camera_location.to_string() }
    }

    /// Write both evidence files for a crossing
    ///
    /// `crops` holds the stored approach crops in band order; the crossing
    /// crop is cut from `frame` and appended. Write failures are logged and
    /// returned alongside the event; the crossing itself stands.
    pub fn capture(
        &self,
        track_id: TrackId,
        frame: &RgbImage,
        xyxyn: &Xyxy,
        mut crops: Vec<RgbImage>,
        timestamp: NaiveDateTime,
    ) -> (CrossingEvent, Vec<VisionError>) {
        let stamp = timestamp.format("%Y%m%d_%H%M%S");
        let base = format!("{}_{}_{}", self.camera_location, stamp, track_id);
        let full_frame_path = self.photos_dir.join(format!("{base}.jpg"));
        let composite_crop_path = self.photos_dir.join(format!("{base}_crop.jpg"));

        let time_text = timestamp.format("%Y%m%d %H:%M:%S").to_string();
        let description = exif_description(&self.camera_location, &time_text);

        crops.push(crop_region(frame, xyxyn));
        let composite = compose_crops(&crops);

        let mut errors = Vec::new();
        for (path, image, tag) in [
            (&full_frame_path, frame, Some(description.as_str())),
            (&composite_crop_path, &composite, None),
        ] {
            if let Err(e) = self.sink.write_jpeg(path, image, tag) {
                error!(track_id = %track_id, error = %e, "evidence_write_failed");
                errors.push(e);
            }
        }

        info!(
            track_id = %track_id,
            file = %full_frame_path.display(),
            crops = %crops.len(),
            composite_w = %composite.width(),
            composite_h = %composite.height(),
            "evidence_captured"
        );

        let event = CrossingEvent {
            track_id,
            camera_location: self.camera_location.clone(),
            timestamp,
            full_frame_path,
            composite_crop_path,
            composite_size: composite.dimensions(),
            exif_description: description,
        };
        (event, errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use parking_lot::Mutex;
    use std::path::Path;

    #[derive(Default)]
    struct RecordingSink {
        writes: Mutex<Vec<(PathBuf, (u32, u32), Option<String>)>>,
        fail: bool,
    }

    impl FileSink for RecordingSink {
        fn write_jpeg(&self, path: &Path, image: &RgbImage, description: Option<&str>) -> Result<(), VisionError> {
            if self.fail {
                return Err(VisionError::evidence_write(path, "disk full"));
            }
            self.writes.lock().push((path.to_path_buf(), image.dimensions(), description.map(String::from)));
            Ok(())
        }
    }

    fn solid(w: u32, h: u32, v: u8) -> RgbImage {
        RgbImage::from_pixel(w, h, Rgb([v, v, v]))
    }

    fn at() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 2, 14).unwrap().and_hms_opt(10, 5, 9).unwrap()
    }

    #[test]
    fn test_composite_dimensions_and_order() {
        let crops = vec![solid(10, 20, 80), solid(12, 30, 90), solid(14, 40, 100)];
        let composite = compose_crops(&crops);

        assert_eq!(composite.dimensions(), (36, 40));
        // 80 crop: 20 high in 40, padded 10 top / 10 bottom
        assert_eq!(composite.get_pixel(0, 9), &PAD_COLOR);
        assert_eq!(composite.get_pixel(0, 10), &Rgb([80, 80, 80]));
        assert_eq!(composite.get_pixel(0, 30), &PAD_COLOR);
        assert_eq!(composite.get_pixel(10, 20), &Rgb([90, 90, 90]));
        assert_eq!(composite.get_pixel(22, 0), &Rgb([100, 100, 100]));
        assert_eq!(composite.get_pixel(35, 39), &Rgb([100, 100, 100]));
    }

    #[test]
    fn test_odd_padding_extra_row_at_bottom() {
        let composite = compose_crops(&[solid(2, 4, 0), solid(2, 7, 50)]);
        // 3 rows of padding: 1 top, 2 bottom
        assert_eq!(composite.get_pixel(0, 0), &PAD_COLOR);
        assert_eq!(composite.get_pixel(0, 1), &Rgb([0, 0, 0]));
        assert_eq!(composite.get_pixel(0, 4), &Rgb([0, 0, 0]));
        assert_eq!(composite.get_pixel(0, 5), &PAD_COLOR);
        assert_eq!(composite.get_pixel(0, 6), &PAD_COLOR);
    }

    #[test]
    fn test_compose_empty_list() {
        assert_eq!(compose_crops(&[]).dimensions(), (0, 0));
    }

    #[test]
    fn test_crop_region_scales_to_frame() {
        let frame = solid(200, 100, 7);
        let crop = crop_region(&frame, &Xyxy::new(0.25, 0.5, 0.75, 1.0));
        assert_eq!(crop.dimensions(), (100, 50));
    }

    #[test]
    fn test_crop_region_clamps_out_of_range() {
        let frame = solid(100, 100, 7);
        let crop = crop_region(&frame, &Xyxy::new(-0.1, 0.9, 1.3, 1.2));
        assert_eq!(crop.dimensions(), (100, 10));

        let degenerate = crop_region(&frame, &Xyxy::new(1.0, 1.0, 1.0, 1.0));
        assert_eq!(degenerate.dimensions(), (1, 1));

        assert_eq!(crop_region(&RgbImage::new(0, 0), &Xyxy::new(0.1, 0.1, 0.2, 0.2)).dimensions(), (0, 0));
    }

    #[test]
    fn test_exif_description_format() {
        assert_eq!(
            exif_description("finish", "20260214 10:05:09"),
            r#"{"passeringspunkt": "finish", "passeringstid": "20260214 10:05:09"}"#
        );
        assert_eq!(
            exif_description("Mål \"A\"", "t"),
            r#"{"passeringspunkt": "M\u00e5l \"A\"", "passeringstid": "t"}"#
        );
    }

    #[test]
    fn test_capture_writes_frame_and_composite() {
        let sink = Arc::new(RecordingSink::default());
        let capture = EvidenceCapture::new(sink.clone(), "/photos", "finish");
        let frame = solid(100, 100, 1);

        let (event, errors) = capture.capture(
            TrackId(9),
            &frame,
            &Xyxy::new(0.4, 0.2, 0.6, 0.97),
            vec![solid(10, 20, 80), solid(12, 25, 90)],
            at(),
        );

        assert!(errors.is_empty());
        assert_eq!(event.full_frame_path, PathBuf::from("/photos/finish_20260214_100509_9.jpg"));
        assert_eq!(event.composite_crop_path, PathBuf::from("/photos/finish_20260214_100509_9_crop.jpg"));
        // 10 + 12 + 20 wide, tallest is the 77px crossing crop
        assert_eq!(event.composite_size, (42, 77));

        let writes = sink.writes.lock();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0].1, (100, 100));
        assert!(writes[0].2.as_deref().unwrap().contains("\"passeringstid\": \"20260214 10:05:09\""));
        assert_eq!(writes[1].2, None);
    }

    #[test]
    fn test_capture_reports_write_failures() {
        let sink = Arc::new(RecordingSink { fail: true, ..Default::default() });
        let capture = EvidenceCapture::new(sink, "/photos", "finish");

        let (event, errors) =
            capture.capture(TrackId(3), &solid(10, 10, 0), &Xyxy::new(0.0, 0.0, 0.5, 0.5), Vec::new(), at());

        assert_eq!(errors.len(), 2);
        assert!(errors.iter().all(|e| matches!(e, VisionError::EvidenceWrite { .. })));
        assert_eq!(event.track_id, TrackId(3));
        assert_eq!(event.composite_size, (5, 5));
    }
}
