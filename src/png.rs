use bytes::Bytes;

use crate::{
    bmff::{BoxReader, FourCC},
    file::ImageType,
    parser::{decode_exif_segment, Metadata, MAX_XMP_LEN},
    source::ByteSource,
    Result, ScanOptions,
};

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];
const XMP_KEYWORD: &str = "XML:com.adobe.xmp";
const CRC_LEN: u64 = 4;

/// Walks PNG chunks, decoding `eXIf` and keeping the XMP `iTXt` packet.
#[tracing::instrument(skip_all)]
pub(crate) fn read_png(
    src: &mut dyn ByteSource,
    options: &ScanOptions,
    meta: &mut Metadata,
) -> Result<()> {
    if src.peek(PNG_SIGNATURE.len())? != PNG_SIGNATURE {
        return Err("invalid PNG signature".into());
    }
    src.discard(PNG_SIGNATURE.len() as u64)?;

    loop {
        let mut head = [0u8; 8];
        src.read_exact_bytes(&mut head)?;
        let len = u32::from_be_bytes([head[0], head[1], head[2], head[3]]);
        let chunk_type = FourCC([head[4], head[5], head[6], head[7]]);
        tracing::debug!(%chunk_type, len, "chunk");

        let mut chunk = BoxReader::window(src, chunk_type, len as u64)?;
        match &chunk_type.0 {
            b"IEND" => return Ok(()),
            b"eXIf" if meta.exif.is_none() => {
                match decode_exif_segment(&mut chunk, ImageType::Png, options) {
                    Ok(exif) => meta.exif = Some(exif),
                    Err(e) if e.is_eof() => return Err(e),
                    Err(e) => tracing::warn!(?e, "skip eXIf chunk"),
                }
            }
            b"iTXt" if meta.xmp.is_none() => {
                if let Some(xmp) = read_xmp_itxt(&mut chunk)? {
                    meta.xmp = Some(xmp);
                }
            }
            _ => {}
        }
        chunk.close()?;
        drop(chunk);
        src.discard(CRC_LEN)?;
    }
}

/// Returns the text of an uncompressed `XML:com.adobe.xmp` iTXt chunk.
fn read_xmp_itxt(chunk: &mut BoxReader<'_>) -> Result<Option<Bytes>> {
    let keyword = chunk.read_cstring(79)?;
    if keyword != XMP_KEYWORD {
        return Ok(None);
    }
    let compressed = chunk.read_u8()?;
    let _method = chunk.read_u8()?;
    if compressed != 0 {
        tracing::debug!("compressed XMP is not supported");
        return Ok(None);
    }
    chunk.discard_cstring(256)?; // language tag
    chunk.discard_cstring(1024)?; // translated keyword
    Ok(Some(Bytes::from(chunk.read_to_vec(MAX_XMP_LEN)?)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        exif::{ByteOrder, ExifTag},
        file::FileFormat,
        source::SliceSource,
        testkit::{init_tracing, png_chunk, Entry, TiffBuilder},
    };

    fn png(chunks: &[Vec<u8>]) -> Vec<u8> {
        let mut buf = PNG_SIGNATURE.to_vec();
        buf.extend(png_chunk(b"IHDR", &[0; 13]));
        for c in chunks {
            buf.extend(c);
        }
        buf.extend(png_chunk(b"IEND", &[]));
        buf
    }

    fn read(buf: &[u8]) -> (Metadata, Result<()>) {
        init_tracing();
        let mut meta = Metadata::new(FileFormat::Png);
        let mut src = SliceSource::new(buf);
        let res = read_png(&mut src, &ScanOptions::default(), &mut meta);
        (meta, res)
    }

    #[test]
    fn exif_chunk() {
        let mut b = TiffBuilder::new(ByteOrder::Little);
        let root = b.ifd(vec![Entry::ascii(ExifTag::Model.code(), "Pixel 8")]);
        let buf = png(&[png_chunk(b"eXIf", &b.build(root)), png_chunk(b"IDAT", &[1, 2, 3])]);

        let (meta, res) = read(&buf);
        res.unwrap();
        let exif = meta.exif.unwrap();
        assert_eq!(exif.model, "Pixel 8");
        assert_eq!(exif.image_type, ImageType::Png);
        assert!(meta.xmp.is_none());
    }

    #[test]
    fn xmp_itxt() {
        let mut data = b"XML:com.adobe.xmp\0\0\0\0\0".to_vec();
        data.extend(b"<x:xmpmeta/>");
        let buf = png(&[png_chunk(b"tEXt", b"Comment\0hi"), png_chunk(b"iTXt", &data)]);
        let (meta, res) = read(&buf);
        res.unwrap();
        assert_eq!(meta.xmp.unwrap().as_ref(), b"<x:xmpmeta/>");
        assert!(meta.exif.is_none());
    }

    #[test]
    fn other_itxt_is_ignored() {
        let buf = png(&[png_chunk(b"iTXt", b"Title\0\0\0\0\0hello")]);
        let (meta, res) = read(&buf);
        res.unwrap();
        assert!(meta.xmp.is_none());
    }

    #[test]
    fn truncated() {
        let buf = png(&[]);
        let (_, res) = read(&buf[..14]);
        assert!(res.unwrap_err().is_eof());
    }
}
