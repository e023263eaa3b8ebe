//! High-resolution frame source
//!
//! Frames are read independently of the tracker so evidence is captured at
//! full quality. The image-sequence backend serves a directory of decoded
//! frames (jpg/jpeg/png/bmp) in file-name order.

use crate::domain::error::VisionError;
use image::RgbImage;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const FRAME_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

/// Sequential reader of full-resolution frames
pub trait FrameSource: Send {
    /// Next frame, or None when the source is exhausted
    ///
    /// An undecodable frame is returned as an empty (0x0) image so the
    /// source stays aligned with the detection stream.
    fn next_frame(&mut self) -> Result<Option<RgbImage>, VisionError>;

    /// Advance past one frame without keeping it; false when exhausted
    fn skip_frame(&mut self) -> Result<bool, VisionError> {
        Ok(self.next_frame()?.is_some())
    }
}

/// Directory of still frames, read in sorted order
pub struct ImageSequenceSource {
    files: Vec<PathBuf>,
    next: usize,
}

impl ImageSequenceSource {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, VisionError> {
        let dir = dir.as_ref();
        let uri = dir.display().to_string();

        let entries = std::fs::read_dir(dir).map_err(|e| VisionError::stream_unavailable(&uri, e))?;
        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && is_frame_file(path))
            .collect();
        files.sort();

        if files.is_empty() {
            return Err(VisionError::stream_unavailable(uri, "no frames found"));
        }

        info!(dir = %uri, frames = %files.len(), "frame_source_opened");
        Ok(Self { files, next: 0 })
    }
}

fn is_frame_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| FRAME_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)))
        .unwrap_or(false)
}

impl FrameSource for ImageSequenceSource {
    fn next_frame(&mut self) -> Result<Option<RgbImage>, VisionError> {
        let Some(path) = self.files.get(self.next) else {
            return Ok(None);
        };
        self.next += 1;

        match image::open(path) {
            Ok(img) => {
                debug!(file = %path.display(), "frame_read");
                Ok(Some(img.to_rgb8()))
            }
            Err(e) => {
                warn!(file = %path.display(), error = %e, "frame_decode_failed");
                Ok(Some(RgbImage::new(0, 0)))
            }
        }
    }

    fn skip_frame(&mut self) -> Result<bool, VisionError> {
        if self.next >= self.files.len() {
            return Ok(false);
        }
        self.next += 1;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use tempfile::tempdir;

    #[test]
    fn test_reads_frames_in_name_order() {
        let dir = tempdir().unwrap();
        RgbImage::from_pixel(4, 2, Rgb([0, 0, 0])).save(dir.path().join("0002.png")).unwrap();
        RgbImage::from_pixel(8, 6, Rgb([0, 0, 0])).save(dir.path().join("0001.png")).unwrap();
        std::fs::write(dir.path().join("detections.jsonl"), "{}\n").unwrap();

        let mut source = ImageSequenceSource::open(dir.path()).unwrap();

        assert_eq!(source.next_frame().unwrap().unwrap().dimensions(), (8, 6));
        assert_eq!(source.next_frame().unwrap().unwrap().dimensions(), (4, 2));
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_skip_frame_does_not_decode() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("0001.jpg"), b"not a jpeg").unwrap();
        RgbImage::from_pixel(8, 6, Rgb([0, 0, 0])).save(dir.path().join("0002.png")).unwrap();

        let mut source = ImageSequenceSource::open(dir.path()).unwrap();
        assert!(source.skip_frame().unwrap());
        assert_eq!(source.next_frame().unwrap().unwrap().dimensions(), (8, 6));
        assert!(!source.skip_frame().unwrap());
    }

    #[test]
    fn test_undecodable_frame_is_empty() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("0001.jpg"), b"not a jpeg").unwrap();

        let mut source = ImageSequenceSource::open(dir.path()).unwrap();
        let frame = source.next_frame().unwrap().unwrap();
        assert_eq!(frame.dimensions(), (0, 0));
    }

    #[test]
    fn test_missing_dir_is_stream_unavailable() {
        let dir = tempdir().unwrap();
        let err = ImageSequenceSource::open(dir.path().join("nope")).err().unwrap();
        assert!(err.is_stream_unavailable());
    }

    #[test]
    fn test_empty_dir_is_stream_unavailable() {
        let dir = tempdir().unwrap();
        let err = ImageSequenceSource::open(dir.path()).err().unwrap();
        assert!(err.is_stream_unavailable());
    }
}
