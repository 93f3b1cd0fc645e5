use std::{
    fs::File,
    io::{Read, Seek},
    path::Path,
};

use bytes::Bytes;

use crate::{
    bmff::{BmffReader, BoxReader},
    exif::{scan_tiff, Exif, IfdReader},
    file::{FileFormat, ImageType, SNIFF_LEN},
    jpeg::read_jpeg,
    png::read_png,
    preview::PreviewHeader,
    skip::{Seekable, Skip, Unseekable},
    source::{ByteSource, Source},
    Error, Result, ScanOptions,
};

/// Largest XMP packet kept in memory.
pub(crate) const MAX_XMP_LEN: usize = 16 * 1024 * 1024;
/// Largest preview image kept in memory.
const MAX_PREVIEW_LEN: usize = 64 * 1024 * 1024;

/// An embedded preview image and its bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preview {
    pub header: PreviewHeader,
    pub data: Bytes,
}

/// Everything a [`MetadataReader`] found in one file.
#[derive(Debug, Clone, PartialEq)]
pub struct Metadata {
    pub format: FileFormat,
    pub image_type: ImageType,
    pub exif: Option<Exif>,
    /// Raw XMP packet.
    pub xmp: Option<Bytes>,
    pub preview: Option<Preview>,
}

impl Metadata {
    pub fn new(format: FileFormat) -> Self {
        Self {
            format,
            image_type: format.image_type(),
            exif: None,
            xmp: None,
            preview: None,
        }
    }

    fn is_empty(&self) -> bool {
        self.exif.is_none() && self.xmp.is_none() && self.preview.is_none()
    }
}

/// Detects the container format of a file and extracts its metadata.
///
/// ```rust
/// use exifscan::MetadataReader;
/// use std::io::Cursor;
///
/// let tiff = [
///     0x49, 0x49, 0x2A, 0x00, 0x08, 0x00, 0x00, 0x00, 0x01, 0x00, 0x0F, 0x01, 0x02, 0x00,
///     0x06, 0x00, 0x00, 0x00, 0x1A, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x43, 0x61,
///     0x6E, 0x6F, 0x6E, 0x00,
/// ];
/// let meta = MetadataReader::new().read(Cursor::new(tiff))?;
/// assert_eq!(meta.exif.unwrap().make, "Canon");
/// # Ok::<(), exifscan::Error>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct MetadataReader {
    options: ScanOptions,
    previews: bool,
}

impl MetadataReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ScanOptions) -> Self {
        Self {
            options,
            previews: false,
        }
    }

    /// Also collect the embedded preview image of CR3 files.
    pub fn with_previews(mut self, previews: bool) -> Self {
        self.previews = previews;
        self
    }

    pub fn read<R: Read + Seek>(&self, reader: R) -> Result<Metadata> {
        self.read_source(Source::<R, Seekable>::new(reader))
    }

    /// Like [`read`](Self::read), for readers that cannot seek. Skipped
    /// bytes are read and dropped.
    pub fn read_unseekable<R: Read>(&self, reader: R) -> Result<Metadata> {
        self.read_source(Source::<R, Unseekable>::new(reader))
    }

    pub fn read_file<P: AsRef<Path>>(&self, path: P) -> Result<Metadata> {
        self.read(File::open(path)?)
    }

    #[tracing::instrument(skip_all)]
    fn read_source<R: Read, S: Skip<R>>(&self, mut src: Source<R, S>) -> Result<Metadata> {
        let format = FileFormat::try_from(src.peek_max(SNIFF_LEN)?)?;
        tracing::debug!(?format);

        let mut meta = Metadata::new(format);
        let res = match format {
            FileFormat::Jpeg => read_jpeg(&mut src, &self.options, &mut meta),
            FileFormat::Png => read_png(&mut src, &self.options, &mut meta),
            FileFormat::Tiff(image_type) => self.read_tiff(&mut src, image_type, &mut meta),
            FileFormat::Bmff(_) => self.read_bmff(&mut src, &mut meta),
        };

        match res {
            Ok(()) => {}
            // truncated files keep what was found before the end
            Err(Error::Eof) => tracing::debug!("end of input"),
            Err(e) if meta.is_empty() => return Err(e),
            Err(e) => tracing::warn!(?e, "scan stopped early"),
        }
        Ok(meta)
    }

    fn read_tiff(
        &self,
        src: &mut dyn ByteSource,
        image_type: ImageType,
        meta: &mut Metadata,
    ) -> Result<()> {
        let header = scan_tiff(src, image_type)?;
        let mut reader = IfdReader::with_options(&self.options);
        let res = reader.decode_tiff(src, &header);

        let exif = reader.into_exif();
        meta.image_type = image_type.refine_tiff(&exif.make);
        if exif != Exif::default() {
            meta.exif = Some(exif);
        }
        res
    }

    fn read_bmff(&self, src: &mut dyn ByteSource, meta: &mut Metadata) -> Result<()> {
        let options = &self.options;
        let mut exif: Option<Exif> = None;
        let mut xmp: Option<Bytes> = None;
        let mut preview: Option<Preview> = None;

        let mut reader = BmffReader::with_options(src, options)
            .on_exif(|r, h| {
                // CR3 spreads its IFDs over several boxes
                let mut ifd_reader = IfdReader::with_options(options);
                if let Some(prev) = exif.take() {
                    ifd_reader = ifd_reader.with_exif(prev);
                }
                let res = ifd_reader.decode_tiff(r, h);
                exif = Some(ifd_reader.into_exif());
                res.map_err(|e| match e {
                    Error::Eof => Error::callback("exif payload is truncated"),
                    e => e,
                })
            })
            .on_xmp(|r, _| {
                xmp = Some(Bytes::from(r.read_to_vec(MAX_XMP_LEN)?));
                Ok(())
            });
        if self.previews {
            reader = reader.on_preview(|r, h| {
                let data = Bytes::from(r.read_to_vec(MAX_PREVIEW_LEN)?);
                preview = Some(Preview { header: *h, data });
                Ok(())
            });
        }

        let res = reader.scan();
        let image_type = reader.ftyp().map(|f| f.image_type());
        drop(reader);

        if let Some(t) = image_type.filter(|t| *t != ImageType::Unknown) {
            meta.image_type = t;
        }
        meta.exif = exif;
        meta.xmp = xmp;
        meta.preview = preview;
        res
    }
}

/// Decodes the TIFF structure that fills `segment`, e.g. a JPEG APP1 or a
/// PNG `eXIf` chunk. Values read before a decoding failure are kept.
pub(crate) fn decode_exif_segment(
    segment: &mut BoxReader<'_>,
    image_type: ImageType,
    options: &ScanOptions,
) -> Result<Exif> {
    let header = scan_tiff(segment, image_type)?;
    let header = header.with_exif_length(u32::try_from(segment.remain()).unwrap_or(u32::MAX));

    let mut reader = IfdReader::with_options(options);
    if let Err(e) = reader.decode_jpeg_ifd(segment, &header) {
        tracing::warn!(?e, "exif decoding stopped early");
    }
    Ok(reader.into_exif())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::{
        bmff::CANON_PREVIEW_UUID,
        exif::{ByteOrder, ExifTag},
        preview::PreviewSource,
        testkit::{bmff_box, ftyp, init_tracing, jpeg_segment, uuid_box, Entry, TiffBuilder},
    };

    fn tiff(bo: ByteOrder, make: &str) -> Vec<u8> {
        let mut b = TiffBuilder::new(bo);
        let root = b.ifd(vec![Entry::ascii(ExifTag::Make.code(), make)]);
        b.build(root)
    }

    #[test]
    fn tiff_file() {
        init_tracing();
        let buf = tiff(ByteOrder::Big, "NIKON CORPORATION");
        let meta = MetadataReader::new().read(Cursor::new(&buf)).unwrap();
        assert_eq!(meta.format, FileFormat::Tiff(ImageType::Tiff));
        assert_eq!(meta.image_type, ImageType::Nef);
        assert_eq!(meta.exif.unwrap().make, "NIKON CORPORATION");
    }

    #[test]
    fn jpeg_file() {
        let mut buf = vec![0xFF, 0xD8];
        buf.extend(jpeg_segment(0xE1, &[b"Exif\0\0".as_slice(), &tiff(ByteOrder::Little, "vivo")].concat()));
        buf.extend([0xFF, 0xD9]);
        let meta = MetadataReader::new().read_unseekable(buf.as_slice()).unwrap();
        assert_eq!(meta.image_type, ImageType::Jpeg);
        assert_eq!(meta.exif.unwrap().make, "vivo");
    }

    #[test]
    fn truncated_jpeg_keeps_exif() {
        let mut buf = vec![0xFF, 0xD8];
        buf.extend(jpeg_segment(0xE1, &[b"Exif\0\0".as_slice(), &tiff(ByteOrder::Little, "vivo")].concat()));
        buf.extend([0xFF, 0xDB, 0x00]);
        let meta = MetadataReader::new().read(Cursor::new(&buf)).unwrap();
        assert_eq!(meta.exif.unwrap().make, "vivo");
    }

    #[test]
    fn cr3_file_with_preview() {
        init_tracing();
        let canon = [
            bmff_box(b"CMT1", &tiff(ByteOrder::Little, "Canon")),
            bmff_box(b"CMT2", &{
                let mut b = TiffBuilder::new(ByteOrder::Little);
                let root = b.ifd(vec![Entry::short(ExifTag::IsoSpeedRatings.code(), 400)]);
                b.build(root)
            }),
        ]
        .concat();
        let mut prvw = vec![0u8; 6];
        prvw.extend(1620u16.to_be_bytes());
        prvw.extend(1080u16.to_be_bytes());
        prvw.extend([0, 0]);
        prvw.extend(4u32.to_be_bytes());
        prvw.extend([0xFF, 0xD8, 0xFF, 0xD9]);
        let preview = [vec![0u8; 8], bmff_box(b"PRVW", &prvw)].concat();

        let mut buf = ftyp(b"crx ", &[b"crx ", b"isom"]);
        buf.extend(bmff_box(
            b"moov",
            &uuid_box(crate::bmff::CANON_METADATA_UUID, &canon),
        ));
        buf.extend(uuid_box(CANON_PREVIEW_UUID, &preview));
        buf.extend(bmff_box(b"mdat", &[0; 64]));

        let meta = MetadataReader::new()
            .with_previews(true)
            .read(Cursor::new(&buf))
            .unwrap();
        assert_eq!(meta.image_type, ImageType::Cr3);
        let exif = meta.exif.unwrap();
        assert_eq!(exif.make, "Canon");
        assert_eq!(exif.iso, 400);
        let preview = meta.preview.unwrap();
        assert_eq!(preview.header.source, PreviewSource::Prvw);
        assert_eq!((preview.header.width, preview.header.height), (1620, 1080));
        assert_eq!(preview.data.as_ref(), &[0xFF, 0xD8, 0xFF, 0xD9]);

        let meta = MetadataReader::new().read(Cursor::new(&buf)).unwrap();
        assert!(meta.preview.is_none());
    }

    #[test]
    fn unrecognized() {
        let e = MetadataReader::new()
            .read(Cursor::new(b"GIF89a......"))
            .unwrap_err();
        assert!(matches!(e, Error::UnrecognizedFileFormat));
    }
}
