//! Intrinsic pixel size from PNG/JPEG headers, without decoding the image.

const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";

/// Width and height in pixels, or `None` for unknown formats and truncated headers.
pub fn image_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    if data.starts_with(PNG_SIGNATURE) {
        return png_dimensions(data);
    }
    if data.starts_with(&[0xFF, 0xD8]) {
        return jpeg_dimensions(data);
    }
    None
}

fn be_u32(b: &[u8]) -> Option<u32> {
    Some(u32::from_be_bytes(b.get(..4)?.try_into().ok()?))
}

fn be_u16(b: &[u8]) -> Option<u16> {
    Some(u16::from_be_bytes(b.get(..2)?.try_into().ok()?))
}

fn png_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    // IHDR is always the first chunk: width and height follow the chunk length and type.
    let w = be_u32(data.get(16..)?)?;
    let h = be_u32(data.get(20..)?)?;
    Some((w, h))
}

fn jpeg_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    let mut i = 2usize;
    while i + 9 < data.len() {
        if data[i] != 0xFF {
            i += 1;
            continue;
        }
        match data[i + 1] {
            // Baseline and progressive start-of-frame: precision, height, width.
            0xC0 | 0xC2 => {
                let h = be_u16(&data[i + 5..])?;
                let w = be_u16(&data[i + 7..])?;
                return Some((u32::from(w), u32::from(h)));
            }
            0xD9 => return None,
            0xD0..=0xD7 | 0x01 | 0x00 => i += 2,
            _ => {
                let len = be_u16(&data[i + 2..])?;
                i += 2 + usize::from(len);
            }
        }
    }
    None
}

#[cfg(test)]
pub(crate) fn png_header(width: u32, height: u32) -> Vec<u8> {
    let mut v = PNG_SIGNATURE.to_vec();
    v.extend_from_slice(&13u32.to_be_bytes());
    v.extend_from_slice(b"IHDR");
    v.extend_from_slice(&width.to_be_bytes());
    v.extend_from_slice(&height.to_be_bytes());
    v.extend_from_slice(&[8, 6, 0, 0, 0]);
    v.extend_from_slice(&[0, 0, 0, 0]);
    v
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_png_ihdr() {
        assert_eq!(image_dimensions(&png_header(640, 480)), Some((640, 480)));
    }

    #[test]
    fn reads_jpeg_sof_after_app_segment() {
        let mut v = vec![0xFF, 0xD8];
        // APP0 with a 16-byte payload (length field counts itself).
        v.extend_from_slice(&[0xFF, 0xE0, 0x00, 0x10]);
        v.extend_from_slice(&[0u8; 14]);
        // SOF0: length, precision, height=200, width=300, components.
        v.extend_from_slice(&[0xFF, 0xC0, 0x00, 0x11, 0x08, 0x00, 0xC8, 0x01, 0x2C, 0x03]);
        v.extend_from_slice(&[0u8; 12]);
        assert_eq!(image_dimensions(&v), Some((300, 200)));
    }

    #[test]
    fn unknown_or_truncated_is_none() {
        assert_eq!(image_dimensions(b"GIF89a"), None);
        assert_eq!(image_dimensions(&PNG_SIGNATURE[..]), None);
        assert_eq!(image_dimensions(&[0xFF, 0xD8, 0xFF, 0xE0, 0xFF]), None);
        assert_eq!(image_dimensions(&[0xFF, 0xD8, 0xFF, 0xD9, 0, 0, 0, 0, 0, 0, 0, 0]), None);
    }
}
