//! EXIF orientation lookup.
//!
//! Accepts a whole JPEG stream, a bare APP1 segment, an `Exif\0\0` block or
//! a raw TIFF header. Anything unreadable yields orientation 1.

const ORIENTATION_TAG: u16 = 0x0112;
const TYPE_SHORT: u16 = 3;
const EXIF_HEADER: &[u8] = b"Exif\0\0";

/// Orientation (1..=8) stored in the metadata, 1 when absent or malformed.
pub fn orientation(meta: &[u8]) -> i32 {
    find_tiff(meta)
        .and_then(read_orientation)
        .filter(|o| (1..=8).contains(o))
        .unwrap_or(1)
}

fn find_tiff(meta: &[u8]) -> Option<&[u8]> {
    match meta {
        [0xFF, 0xD8, ..] => find_in_jpeg(&meta[2..]),
        [0xFF, 0xE1, ..] => app1_payload(&meta[2..]),
        _ if meta.starts_with(EXIF_HEADER) => Some(&meta[EXIF_HEADER.len()..]),
        [b'I', b'I', 0x2A, 0x00, ..] | [b'M', b'M', 0x00, 0x2A, ..] => Some(meta),
        _ => None,
    }
}

/// Walk JPEG marker segments until the APP1 EXIF block or start of scan.
fn find_in_jpeg(mut data: &[u8]) -> Option<&[u8]> {
    loop {
        // fill bytes may precede a marker
        while data.first() == Some(&0xFF) && data.get(1) == Some(&0xFF) {
            data = &data[1..];
        }
        let (marker, rest) = match data {
            [0xFF, marker, rest @ ..] => (*marker, rest),
            _ => return None,
        };

        match marker {
            0xD9 | 0xDA => return None,
            0x01 | 0xD0..=0xD7 => {
                data = rest;
                continue;
            }
            _ => {}
        }

        let len = u16::from_be_bytes([*rest.first()?, *rest.get(1)?]) as usize;
        if len < 2 || rest.len() < len {
            return None;
        }
        if marker == 0xE1 {
            if let Some(tiff) = app1_payload(rest) {
                return Some(tiff);
            }
        }
        data = &rest[len..];
    }
}

/// `segment` starts at the APP1 length field.
fn app1_payload(segment: &[u8]) -> Option<&[u8]> {
    let len = u16::from_be_bytes([*segment.first()?, *segment.get(1)?]) as usize;
    let body = segment.get(2..len.min(segment.len()))?;
    body.strip_prefix(EXIF_HEADER)
}

#[derive(Clone, Copy)]
enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    fn u16(self, data: &[u8], at: usize) -> Option<u16> {
        let bytes = [*data.get(at)?, *data.get(at + 1)?];
        Some(match self {
            ByteOrder::Little => u16::from_le_bytes(bytes),
            ByteOrder::Big => u16::from_be_bytes(bytes),
        })
    }

    fn u32(self, data: &[u8], at: usize) -> Option<u32> {
        let bytes: [u8; 4] = data.get(at..at + 4)?.try_into().ok()?;
        Some(match self {
            ByteOrder::Little => u32::from_le_bytes(bytes),
            ByteOrder::Big => u32::from_be_bytes(bytes),
        })
    }
}

fn read_orientation(tiff: &[u8]) -> Option<i32> {
    let order = match tiff.get(..2)? {
        b"II" => ByteOrder::Little,
        b"MM" => ByteOrder::Big,
        _ => return None,
    };
    if order.u16(tiff, 2)? != 42 {
        return None;
    }

    let ifd = order.u32(tiff, 4)? as usize;
    let entries = order.u16(tiff, ifd)? as usize;
    for i in 0..entries {
        let entry = ifd + 2 + i * 12;
        if order.u16(tiff, entry)? != ORIENTATION_TAG {
            continue;
        }
        if order.u16(tiff, entry + 2)? != TYPE_SHORT {
            return None;
        }
        return Some(order.u16(tiff, entry + 8)? as i32);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiff(big_endian: bool, orientation: u16) -> Vec<u8> {
        let mut t = Vec::new();
        if big_endian {
            t.extend_from_slice(b"MM");
            t.extend_from_slice(&42u16.to_be_bytes());
            t.extend_from_slice(&8u32.to_be_bytes());
            t.extend_from_slice(&2u16.to_be_bytes());
            // ImageWidth first, orientation second
            t.extend_from_slice(&0x0100u16.to_be_bytes());
            t.extend_from_slice(&4u16.to_be_bytes());
            t.extend_from_slice(&1u32.to_be_bytes());
            t.extend_from_slice(&640u32.to_be_bytes());
            t.extend_from_slice(&ORIENTATION_TAG.to_be_bytes());
            t.extend_from_slice(&TYPE_SHORT.to_be_bytes());
            t.extend_from_slice(&1u32.to_be_bytes());
            t.extend_from_slice(&orientation.to_be_bytes());
            t.extend_from_slice(&[0, 0]);
        } else {
            t.extend_from_slice(b"II");
            t.extend_from_slice(&42u16.to_le_bytes());
            t.extend_from_slice(&8u32.to_le_bytes());
            t.extend_from_slice(&1u16.to_le_bytes());
            t.extend_from_slice(&ORIENTATION_TAG.to_le_bytes());
            t.extend_from_slice(&TYPE_SHORT.to_le_bytes());
            t.extend_from_slice(&1u32.to_le_bytes());
            t.extend_from_slice(&orientation.to_le_bytes());
            t.extend_from_slice(&[0, 0]);
        }
        t.extend_from_slice(&0u32.to_le_bytes());
        t
    }

    fn app1(tiff: &[u8]) -> Vec<u8> {
        let mut seg = vec![0xFF, 0xE1];
        let len = (2 + EXIF_HEADER.len() + tiff.len()) as u16;
        seg.extend_from_slice(&len.to_be_bytes());
        seg.extend_from_slice(EXIF_HEADER);
        seg.extend_from_slice(tiff);
        seg
    }

    fn jpeg(segments: &[Vec<u8>]) -> Vec<u8> {
        let mut data = vec![0xFF, 0xD8];
        for s in segments {
            data.extend_from_slice(s);
        }
        data.extend_from_slice(&[0xFF, 0xDA, 0x00, 0x02, 0x12, 0x34, 0xFF, 0xD9]);
        data
    }

    #[test]
    fn test_raw_tiff_both_byte_orders() {
        assert_eq!(orientation(&tiff(false, 6)), 6);
        assert_eq!(orientation(&tiff(true, 8)), 8);
    }

    #[test]
    fn test_exif_block_and_app1() {
        let mut block = EXIF_HEADER.to_vec();
        block.extend_from_slice(&tiff(false, 3));
        assert_eq!(orientation(&block), 3);
        assert_eq!(orientation(&app1(&tiff(true, 5))), 5);
    }

    #[test]
    fn test_full_jpeg_skips_other_segments() {
        // APP0 JFIF segment before APP1
        let app0 = vec![0xFF, 0xE0, 0x00, 0x07, b'J', b'F', b'I', b'F', 0x00];
        let data = jpeg(&[app0, app1(&tiff(false, 7))]);
        assert_eq!(orientation(&data), 7);
    }

    #[test]
    fn test_missing_or_malformed_yields_one() {
        assert_eq!(orientation(&[]), 1);
        assert_eq!(orientation(b"not an image"), 1);
        assert_eq!(orientation(&jpeg(&[])), 1);
        assert_eq!(orientation(&tiff(false, 0)), 1);
        assert_eq!(orientation(&tiff(false, 9)), 1);

        let truncated = tiff(true, 6);
        assert_eq!(orientation(&truncated[..12]), 1);

        let mut bad_len = app1(&tiff(false, 6));
        bad_len[2] = 0xFF;
        assert_eq!(orientation(&jpeg(&[bad_len])), 1);
    }
}
