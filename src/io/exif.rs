//! Minimal EXIF writer for JPEG evidence images
//!
//! Only the 0th-IFD ImageDescription tag is written. The APP1 segment is
//! big-endian TIFF with a single IFD entry:
//!
//! ```text
//! FF E1 <len> "Exif\0\0" | "MM" 002A 00000008 | 0001 | 010E 0002 <count> <offset> | 00000000 | value
//! ```

use anyhow::{bail, ensure};

const EXIF_HEADER: &[u8; 6] = b"Exif\0\0";
const TAG_IMAGE_DESCRIPTION: u16 = 0x010E;
const TYPE_ASCII: u16 = 2;
/// TIFF header (8) + entry count (2) + one entry (12) + next-IFD offset (4)
const VALUE_OFFSET: u32 = 26;

const MARKER_SOI: [u8; 2] = [0xFF, 0xD8];
const MARKER_APP0: u8 = 0xE0;
const MARKER_APP1: u8 = 0xE1;

/// Build an APP1 segment (marker included) carrying an ImageDescription
pub fn image_description_segment(description: &str) -> anyhow::Result<Vec<u8>> {
    ensure!(description.is_ascii(), "EXIF ImageDescription must be ASCII");

    let mut value = description.as_bytes().to_vec();
    value.push(0);
    let count = u32::try_from(value.len())?;

    let mut tiff = Vec::with_capacity(VALUE_OFFSET as usize + value.len());
    tiff.extend_from_slice(b"MM");
    tiff.extend_from_slice(&0x002Au16.to_be_bytes());
    tiff.extend_from_slice(&8u32.to_be_bytes());
    tiff.extend_from_slice(&1u16.to_be_bytes());
    tiff.extend_from_slice(&TAG_IMAGE_DESCRIPTION.to_be_bytes());
    tiff.extend_from_slice(&TYPE_ASCII.to_be_bytes());
    tiff.extend_from_slice(&count.to_be_bytes());
    if value.len() <= 4 {
        // Short values are stored inline, left-justified
        let mut inline = [0u8; 4];
        inline[..value.len()].copy_from_slice(&value);
        tiff.extend_from_slice(&inline);
        tiff.extend_from_slice(&0u32.to_be_bytes());
    } else {
        tiff.extend_from_slice(&VALUE_OFFSET.to_be_bytes());
        tiff.extend_from_slice(&0u32.to_be_bytes());
        tiff.extend_from_slice(&value);
    }

    // Segment length counts itself but not the marker
    let length = 2 + EXIF_HEADER.len() + tiff.len();
    let Ok(length) = u16::try_from(length) else {
        bail!("EXIF segment too large ({length} bytes)");
    };

    let mut segment = Vec::with_capacity(2 + length as usize);
    segment.extend_from_slice(&[0xFF, MARKER_APP1]);
    segment.extend_from_slice(&length.to_be_bytes());
    segment.extend_from_slice(EXIF_HEADER);
    segment.extend_from_slice(&tiff);
    Ok(segment)
}

/// Insert an APP1 segment into an encoded JPEG
///
/// Placed after SOI, or after a leading JFIF APP0 segment. An existing EXIF
/// APP1 at that position is replaced.
pub fn insert_segment(jpeg: &[u8], segment: &[u8]) -> anyhow::Result<Vec<u8>> {
    ensure!(jpeg.len() >= 4 && jpeg[..2] == MARKER_SOI, "not a JPEG stream");

    let mut pos = 2;
    if jpeg[pos] == 0xFF && jpeg[pos + 1] == MARKER_APP0 {
        pos = next_segment(jpeg, pos)?;
    }

    let mut rest = pos;
    if jpeg.len() >= pos + 10
        && jpeg[pos] == 0xFF
        && jpeg[pos + 1] == MARKER_APP1
        && &jpeg[pos + 4..pos + 10] == EXIF_HEADER
    {
        rest = next_segment(jpeg, pos)?;
    }

    let mut out = Vec::with_capacity(jpeg.len() + segment.len());
    out.extend_from_slice(&jpeg[..pos]);
    out.extend_from_slice(segment);
    out.extend_from_slice(&jpeg[rest..]);
    Ok(out)
}

fn next_segment(jpeg: &[u8], pos: usize) -> anyhow::Result<usize> {
    ensure!(jpeg.len() >= pos + 4, "truncated JPEG segment at {pos}");
    let length = u16::from_be_bytes([jpeg[pos + 2], jpeg[pos + 3]]) as usize;
    let end = pos + 2 + length;
    ensure!(end <= jpeg.len(), "JPEG segment at {pos} overruns stream");
    Ok(end)
}

/// Read back the ImageDescription written by `image_description_segment`
pub fn read_image_description(jpeg: &[u8]) -> Option<String> {
    let start = jpeg.windows(EXIF_HEADER.len()).position(|w| w == EXIF_HEADER)? + EXIF_HEADER.len();
    let tiff = jpeg.get(start..)?;
    if tiff.get(..2)? != b"MM" {
        return None;
    }

    let be16 = |at: usize| tiff.get(at..at + 2).map(|b| u16::from_be_bytes([b[0], b[1]]));
    let be32 = |at: usize| tiff.get(at..at + 4).map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]));

    let ifd = be32(4)? as usize;
    let entries = be16(ifd)? as usize;
    for i in 0..entries {
        let entry = ifd + 2 + i * 12;
        if be16(entry)? != TAG_IMAGE_DESCRIPTION {
            continue;
        }
        let count = be32(entry + 4)? as usize;
        let value = if count <= 4 {
            tiff.get(entry + 8..entry + 8 + count)?
        } else {
            let offset = be32(entry + 8)? as usize;
            tiff.get(offset..offset + count)?
        };
        let text = value.strip_suffix(&[0]).unwrap_or(value);
        return String::from_utf8(text.to_vec()).ok();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_jpeg(with_app0: bool) -> Vec<u8> {
        let mut jpeg = vec![0xFF, 0xD8];
        if with_app0 {
            // APP0 with 5 payload bytes
            jpeg.extend_from_slice(&[0xFF, 0xE0, 0x00, 0x07, b'J', b'F', b'I', b'F', 0]);
        }
        jpeg.extend_from_slice(&[0xFF, 0xDB, 0x00, 0x02, 0xFF, 0xD9]);
        jpeg
    }

    #[test]
    fn test_segment_layout() {
        let segment = image_description_segment("hello").unwrap();
        assert_eq!(&segment[..2], &[0xFF, 0xE1]);
        let length = u16::from_be_bytes([segment[2], segment[3]]) as usize;
        assert_eq!(length, segment.len() - 2);
        assert_eq!(&segment[4..10], EXIF_HEADER);
        assert_eq!(&segment[10..12], b"MM");
        assert_eq!(segment.last(), Some(&0));
    }

    #[test]
    fn test_insert_after_app0() {
        let jpeg = minimal_jpeg(true);
        let segment = image_description_segment("{\"a\": 1}").unwrap();
        let out = insert_segment(&jpeg, &segment).unwrap();

        assert_eq!(&out[..2], &MARKER_SOI);
        assert_eq!(&out[2..4], &[0xFF, MARKER_APP0]);
        assert_eq!(&out[11..13], &[0xFF, MARKER_APP1]);
        assert_eq!(read_image_description(&out).as_deref(), Some("{\"a\": 1}"));
        assert!(out.ends_with(&[0xFF, 0xD9]));
    }

    #[test]
    fn test_insert_replaces_existing_exif() {
        let jpeg = minimal_jpeg(false);
        let first = insert_segment(&jpeg, &image_description_segment("first").unwrap()).unwrap();
        let second = insert_segment(&first, &image_description_segment("second").unwrap()).unwrap();

        assert_eq!(read_image_description(&second).as_deref(), Some("second"));
        assert_eq!(second.windows(6).filter(|w| *w == EXIF_HEADER).count(), 1);
    }

    #[test]
    fn test_short_value_inline() {
        let jpeg = minimal_jpeg(false);
        let out = insert_segment(&jpeg, &image_description_segment("ab").unwrap()).unwrap();
        assert_eq!(read_image_description(&out).as_deref(), Some("ab"));
    }

    #[test]
    fn test_rejects_non_jpeg() {
        let segment = image_description_segment("x").unwrap();
        assert!(insert_segment(b"PNG....", &segment).is_err());
    }

    #[test]
    fn test_rejects_non_ascii() {
        assert!(image_description_segment("Målgang").is_err());
    }
}
