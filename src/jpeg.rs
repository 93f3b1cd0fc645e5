use bytes::Bytes;

use crate::{
    bmff::{BoxReader, FourCC},
    file::ImageType,
    parser::{decode_exif_segment, Metadata},
    source::ByteSource,
    Result, ScanOptions,
};

const EXIF_ID: &[u8] = b"Exif\0\0";
const XMP_NS: &[u8] = b"http://ns.adobe.com/xap/1.0/\0";
/// Marks the bounded view over one segment payload in logs.
const SEGMENT: FourCC = FourCC::new(b"JSEG");

/// A marker code is a byte following 0xFF that indicates the kind of marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MarkerCode {
    // Start of Image
    Soi = 0xD8,
    // APP1 marker
    App1 = 0xE1,
    // Start of Scan
    Sos = 0xDA,
    // End of Image
    Eoi = 0xD9,
    // Temporary, no payload
    Tem = 0x01,
}

impl MarkerCode {
    fn code(self) -> u8 {
        self as u8
    }
}

fn has_payload(code: u8) -> bool {
    // RST0..RST7 stand alone as well
    !(code == MarkerCode::Soi.code() || code == MarkerCode::Tem.code() || (0xD0..=0xD7).contains(&code))
}

/// Reads the next marker code, skipping fill bytes.
fn next_marker(src: &mut dyn ByteSource) -> Result<u8> {
    let b = src.peek(1)?[0];
    if b != 0xFF {
        return Err(format!("invalid JPEG marker prefix 0x{b:02x}").into());
    }
    loop {
        src.discard(1)?;
        let code = src.peek(1)?[0];
        if code != 0xFF {
            src.discard(1)?;
            return Ok(code);
        }
    }
}

/// Walks JPEG segments up to the first scan, decoding the `Exif` APP1
/// segment and keeping the XMP APP1 packet.
#[tracing::instrument(skip_all)]
pub(crate) fn read_jpeg(
    src: &mut dyn ByteSource,
    options: &ScanOptions,
    meta: &mut Metadata,
) -> Result<()> {
    if src.peek(2)? != [0xFF, MarkerCode::Soi.code()] {
        return Err("invalid JPEG file; SOI marker not found".into());
    }
    src.discard(2)?;

    loop {
        let code = next_marker(src)?;
        tracing::debug!("Got segment: 0x{:02x}", code);
        if code == MarkerCode::Sos.code() || code == MarkerCode::Eoi.code() {
            return Ok(());
        }
        if !has_payload(code) {
            continue;
        }

        let mut size = [0u8; 2];
        src.read_exact_bytes(&mut size)?;
        // size contains the two bytes of `size` itself
        let size = u16::from_be_bytes(size);
        if size < 2 {
            return Err(format!("invalid JPEG segment size {size}").into());
        }

        let mut segment = BoxReader::window(src, SEGMENT, (size - 2) as u64)?;
        if code != MarkerCode::App1.code() {
            continue;
        }

        let head = segment.peek_max(XMP_NS.len())?;
        if head.starts_with(EXIF_ID) && meta.exif.is_none() {
            segment.discard(EXIF_ID.len() as u64)?;
            match decode_exif_segment(&mut segment, ImageType::Jpeg, options) {
                Ok(exif) => meta.exif = Some(exif),
                Err(e) if e.is_eof() => return Err(e),
                Err(e) => tracing::warn!(?e, "skip exif segment"),
            }
        } else if head == XMP_NS && meta.xmp.is_none() {
            segment.discard(XMP_NS.len() as u64)?;
            meta.xmp = Some(Bytes::from(segment.read_to_vec(u16::MAX as usize)?));
        }
    }
}
