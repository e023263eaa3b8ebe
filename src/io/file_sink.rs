//! Evidence file sink - writes JPEG images with optional EXIF description
//!
//! Parent directories are created on demand. An EXIF insertion failure is
//! logged and the image is written without metadata.

use crate::domain::error::VisionError;
use crate::io::exif;
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use std::path::Path;
use tracing::{debug, error};

const JPEG_QUALITY: u8 = 90;

/// Destination for encoded evidence images
pub trait FileSink: Send + Sync {
    fn write_jpeg(
        &self,
        path: &Path,
        image: &RgbImage,
        description: Option<&str>,
    ) -> Result<(), VisionError>;
}

/// Writes JPEG files to the local filesystem
#[derive(Debug, Clone, Copy)]
pub struct JpegFileSink;

impl JpegFileSink {
    pub fn new() -> Self {
        Self
    }

    fn encode(&self, image: &RgbImage, description: Option<&str>) -> Result<Vec<u8>, String> {
        if image.width() == 0 || image.height() == 0 {
            return Err("empty image".to_string());
        }

        let mut buf = Vec::new();
        JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY)
            .encode_image(image)
            .map_err(|e| e.to_string())?;

        let Some(description) = description else {
            return Ok(buf);
        };
        let with_exif = exif::image_description_segment(description)
            .and_then(|segment| exif::insert_segment(&buf, &segment));
        match with_exif {
            Ok(bytes) => Ok(bytes),
            Err(e) => {
                error!(error = %format!("{e:#}"), "exif_insert_failed");
                Ok(buf)
            }
        }
    }
}

impl Default for JpegFileSink {
    fn default() -> Self {
        Self::new()
    }
}

impl FileSink for JpegFileSink {
    fn write_jpeg(
        &self,
        path: &Path,
        image: &RgbImage,
        description: Option<&str>,
    ) -> Result<(), VisionError> {
        let bytes = self.encode(image, description).map_err(|e| VisionError::evidence_write(path, e))?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| VisionError::evidence_write(path, e.to_string()))?;
            }
        }

        std::fs::write(path, &bytes).map_err(|e| VisionError::evidence_write(path, e.to_string()))?;
        debug!(file = %path.display(), bytes = %bytes.len(), "evidence_written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use tempfile::tempdir;

    fn sample() -> RgbImage {
        RgbImage::from_pixel(16, 8, Rgb([200, 10, 10]))
    }

    #[test]
    fn test_write_jpeg_readable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("frame.jpg");

        JpegFileSink::new().write_jpeg(&path, &sample(), None).unwrap();

        let decoded = image::open(&path).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (16, 8));
    }

    #[test]
    fn test_write_jpeg_with_description() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tagged.jpg");

        JpegFileSink::new().write_jpeg(&path, &sample(), Some("{\"k\": \"v\"}")).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(exif::read_image_description(&bytes).as_deref(), Some("{\"k\": \"v\"}"));
        assert!(image::load_from_memory(&bytes).is_ok());
    }

    #[test]
    fn test_creates_parent_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("dir").join("frame.jpg");

        JpegFileSink::new().write_jpeg(&path, &sample(), None).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_empty_image_is_write_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.jpg");

        let err = JpegFileSink::new().write_jpeg(&path, &RgbImage::new(0, 0), None).unwrap_err();
        assert!(matches!(err, VisionError::EvidenceWrite { .. }));
        assert!(!path.exists());
    }

    #[test]
    fn test_non_ascii_description_still_writes_image() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plain.jpg");

        JpegFileSink::new().write_jpeg(&path, &sample(), Some("Målgang")).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert!(exif::read_image_description(&bytes).is_none());
    }
}
