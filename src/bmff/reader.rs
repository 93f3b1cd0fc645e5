use std::fmt::Debug;

use super::{heif::ItemGraph, iloc::Extent, BoxReader, BoxType, Brand};
use crate::{
    error::BmffError,
    exif::{binary_order, scan_tiff, strip_exif_prefix, ByteOrder, ExifHeader, IfdType},
    file::ImageType,
    preview::PreviewHeader,
    source::ByteSource,
    xmp::{evaluate_xpacket_header, XPacketHeader},
    Error, Result, ScanOptions,
};

/// Receives a reader bounded to one Exif payload, positioned at the TIFF
/// base. Returning [`Error::Eof`] stops the scan; other errors are logged.
pub type ExifCallback<'c> = Box<dyn FnMut(&mut dyn ByteSource, &ExifHeader) -> Result<()> + 'c>;

/// Receives a reader bounded to one XMP packet.
pub type XmpCallback<'c> = Box<dyn FnMut(&mut dyn ByteSource, &XPacketHeader) -> Result<()> + 'c>;

/// Receives a reader bounded to one embedded preview image.
pub type PreviewCallback<'c> =
    Box<dyn FnMut(&mut dyn ByteSource, &PreviewHeader) -> Result<()> + 'c>;

const MAX_COMPATIBLE_BRANDS: usize = 7;

/// Decoded `ftyp` box.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTypeBox {
    pub major_brand: Brand,
    pub minor_version: u32,
    pub compatible_brands: Vec<Brand>,
}

impl FileTypeBox {
    /// Image type named by the major brand, or by the first compatible
    /// brand that names one.
    pub fn image_type(&self) -> ImageType {
        std::iter::once(&self.major_brand)
            .chain(&self.compatible_brands)
            .map(|b| b.image_type())
            .find(|t| *t != ImageType::Unknown)
            .unwrap_or_default()
    }
}

/// Metadata goals in the low nibble, satisfied goals in the high nibble.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct MetadataFlags(u8);

impl MetadataFlags {
    pub const EXIF: u8 = 0x01;
    pub const XMP: u8 = 0x02;
    pub const THMB: u8 = 0x04;
    pub const PRVW: u8 = 0x08;

    pub fn goals(self) -> u8 {
        self.0 & 0x0f
    }

    pub fn haves(self) -> u8 {
        self.0 >> 4
    }

    pub fn set_goal(&mut self, goal: u8) {
        self.0 |= goal & 0x0f;
    }

    pub fn set_have(&mut self, goal: u8) {
        self.0 |= (goal & 0x0f) << 4;
    }

    /// Requested and not yet satisfied.
    pub fn is_pending(self, goal: u8) -> bool {
        self.goals() & goal != 0 && self.haves() & goal == 0
    }

    pub fn is_done(self) -> bool {
        self.goals() & !self.haves() == 0
    }
}

impl Debug for MetadataFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "goals={:04b} haves={:04b}", self.goals(), self.haves())
    }
}

/// Walks the top-level boxes of an ISOBMFF container and hands Exif, XMP
/// and preview payloads to the registered callbacks.
///
/// ```rust
/// use exifscan::{bmff::BmffReader, source::SliceSource, Error};
///
/// let ftyp = [0, 0, 0, 0x10, b'f', b't', b'y', b'p', b'a', b'v', b'i', b'f', b'0', b'0', b'0', b'1'];
/// let mut reader = BmffReader::new(SliceSource::new(&ftyp)).on_exif(|_, _| Ok(()));
/// reader.read_ftyp()?;
/// assert!(matches!(reader.read_metadata(), Err(Error::Eof)));
/// # Ok::<(), Error>(())
/// ```
pub struct BmffReader<'c, B> {
    src: B,
    state: ScanState<'c>,
}

/// Everything but the source, so a box borrowed from the source can be
/// handed to the state.
pub(super) struct ScanState<'c> {
    pub(super) ftyp: Option<FileTypeBox>,
    pub(super) graph: ItemGraph,
    pub(super) flags: MetadataFlags,
    goals_derived: bool,
    stop_after_metadata: bool,
    /// CR3 `THMB`, recorded but never emitted.
    pub(super) thumbnail: Option<PreviewHeader>,
    pub(super) on_exif: Option<ExifCallback<'c>>,
    pub(super) on_xmp: Option<XmpCallback<'c>>,
    pub(super) on_preview: Option<PreviewCallback<'c>>,
    span: tracing::Span,
}

impl<'c, B: ByteSource> BmffReader<'c, B> {
    pub fn new(src: B) -> Self {
        Self::with_options(src, &ScanOptions::default())
    }

    pub fn with_options(src: B, options: &ScanOptions) -> Self {
        Self {
            src,
            state: ScanState {
                ftyp: None,
                graph: ItemGraph::new(options.max_items),
                flags: MetadataFlags::default(),
                goals_derived: false,
                stop_after_metadata: false,
                thumbnail: None,
                on_exif: None,
                on_xmp: None,
                on_preview: None,
                span: tracing::debug_span!("bmff_scan"),
            },
        }
    }

    pub fn on_exif<F>(mut self, f: F) -> Self
    where
        F: FnMut(&mut dyn ByteSource, &ExifHeader) -> Result<()> + 'c,
    {
        self.state.on_exif = Some(Box::new(f));
        self
    }

    pub fn on_xmp<F>(mut self, f: F) -> Self
    where
        F: FnMut(&mut dyn ByteSource, &XPacketHeader) -> Result<()> + 'c,
    {
        self.state.on_xmp = Some(Box::new(f));
        self
    }

    /// Previews are only looked for in CR3 files.
    pub fn on_preview<F>(mut self, f: F) -> Self
    where
        F: FnMut(&mut dyn ByteSource, &PreviewHeader) -> Result<()> + 'c,
    {
        self.state.on_preview = Some(Box::new(f));
        self
    }

    pub fn ftyp(&self) -> Option<&FileTypeBox> {
        self.state.ftyp.as_ref()
    }

    pub fn item_graph(&self) -> &ItemGraph {
        &self.state.graph
    }

    pub fn flags(&self) -> MetadataFlags {
        self.state.flags
    }

    /// The CR3 `THMB` thumbnail, once seen.
    pub fn thumbnail(&self) -> Option<&PreviewHeader> {
        self.state.thumbnail.as_ref()
    }

    pub fn into_inner(self) -> B {
        self.src
    }

    /// Reads the `ftyp` box, skipping JPEG XL signature boxes in front of
    /// it.
    pub fn read_ftyp(&mut self) -> Result<&FileTypeBox> {
        let span = self.state.span.clone();
        let _guard = span.enter();

        loop {
            let mut bx = BoxReader::new(&mut self.src)?;
            match bx.box_type() {
                BoxType::Jxl => continue,
                BoxType::Ftyp => {
                    let ftyp = read_ftyp_body(&mut bx)?;
                    bx.close()?;
                    tracing::debug!(?ftyp, "ftyp");
                    return Ok(self.state.ftyp.insert(ftyp));
                }
                _ => return Err(BmffError::UnexpectedBox(bx.header().box_type).into()),
            }
        }
    }

    /// Processes the next top-level box.
    ///
    /// Returns [`Error::Eof`] at the end of the stream, and once every
    /// requested kind of metadata has been delivered.
    pub fn read_metadata(&mut self) -> Result<()> {
        let span = self.state.span.clone();
        let _guard = span.enter();

        if self.state.stop_after_metadata {
            return Err(Error::Eof);
        }
        if !self.state.goals_derived {
            self.state.derive_goals();
        }

        let mut bx = BoxReader::new(&mut self.src)?;
        self.state.read_box(&mut bx)?;
        bx.close()?;

        if self.state.flags.is_done() {
            tracing::debug!(flags = ?self.state.flags, "all metadata delivered");
            self.state.stop_after_metadata = true;
        }
        Ok(())
    }

    /// Reads `ftyp` if needed, then every box until the end of the stream or
    /// until all requested metadata has been delivered.
    #[tracing::instrument(skip_all)]
    pub fn scan(&mut self) -> Result<()> {
        if self.state.ftyp.is_none() {
            self.read_ftyp()?;
        }
        loop {
            match self.read_metadata() {
                Ok(()) => {}
                Err(Error::Eof) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }
}

impl<B> Debug for BmffReader<'_, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BmffReader")
            .field("ftyp", &self.state.ftyp)
            .field("flags", &self.state.flags)
            .field("stop_after_metadata", &self.state.stop_after_metadata)
            .finish_non_exhaustive()
    }
}

fn read_ftyp_body(bx: &mut BoxReader<'_>) -> Result<FileTypeBox> {
    let major_brand = Brand::from(bx.read_fourcc()?);
    let minor_version = bx.read_u32()?;
    let mut compatible_brands = Vec::new();
    while bx.remain() >= 4 && compatible_brands.len() < MAX_COMPATIBLE_BRANDS {
        compatible_brands.push(Brand::from(bx.read_fourcc()?));
    }
    Ok(FileTypeBox {
        major_brand,
        minor_version,
        compatible_brands,
    })
}

enum Candidate {
    Exif,
    Xmp,
    Preview(PreviewHeader),
}

impl<'c> ScanState<'c> {
    pub(super) fn is_cr3(&self) -> bool {
        self.ftyp
            .as_ref()
            .is_some_and(|f| f.major_brand == Brand::Crx)
    }

    fn image_type(&self) -> ImageType {
        self.ftyp
            .as_ref()
            .map(FileTypeBox::image_type)
            .unwrap_or_default()
    }

    fn derive_goals(&mut self) {
        if self.on_exif.is_some() {
            self.flags.set_goal(MetadataFlags::EXIF);
        }
        if self.on_xmp.is_some() {
            self.flags.set_goal(MetadataFlags::XMP);
        }
        // HEIF and AVIF previews are not extracted
        if self.on_preview.is_some() && self.is_cr3() {
            self.flags.set_goal(MetadataFlags::PRVW);
        }
        self.goals_derived = true;
        tracing::debug!(flags = ?self.flags, "goals");
    }

    fn read_box(&mut self, bx: &mut BoxReader<'_>) -> Result<()> {
        match bx.box_type() {
            BoxType::Mdat => self.read_mdat(bx),
            BoxType::Exif => {
                if !self.flags.is_pending(MetadataFlags::EXIF) {
                    return Ok(());
                }
                let res = self.emit_exif(bx, IfdType::Root);
                self.finish(MetadataFlags::EXIF, res)
            }
            BoxType::Meta => {
                let cr3 = self.is_cr3();
                self.graph.read_meta(bx, cr3)
            }
            BoxType::Moov => self.read_moov(bx),
            BoxType::Uuid => self.read_uuid_box(bx),
            BoxType::Jxl | BoxType::Jumb | BoxType::Jxlc | BoxType::Jxll | BoxType::Jxlp => {
                tracing::debug!(box_type = %bx.box_type(), "skip jpeg xl box");
                Ok(())
            }
            other => {
                tracing::debug!(box_type = %other, size = bx.header().size, "skip box");
                Ok(())
            }
        }
    }

    /// Serves the recorded Exif, XMP and preview items from `mdat`, in file
    /// order.
    fn read_mdat(&mut self, bx: &mut BoxReader<'_>) -> Result<()> {
        // (extent, file offset, what)
        let mut candidates: Vec<(Extent, bool, Candidate)> = Vec::with_capacity(3);
        if self.flags.is_pending(MetadataFlags::EXIF) {
            if let Some(extent) = self.graph.exif.ready() {
                let in_file = self.graph.in_file(self.graph.exif.id);
                candidates.push((extent, in_file, Candidate::Exif));
            }
        }
        if self.flags.is_pending(MetadataFlags::XMP) {
            if let Some(extent) = self.graph.xml.ready() {
                let in_file = self.graph.in_file(self.graph.xml.id);
                candidates.push((extent, in_file, Candidate::Xmp));
            }
        }
        if self.flags.is_pending(MetadataFlags::PRVW) {
            if let Some((loc, header)) = self.graph.select_preview() {
                candidates.push((loc.extent(), !loc.in_idat, Candidate::Preview(header)));
            }
        }
        if candidates.is_empty() {
            return Ok(());
        }
        candidates.sort_by_key(|(extent, _, _)| extent.offset);

        let start = bx.payload_offset();
        let end = start + bx.header().body_size();
        for (extent, in_file, candidate) in candidates {
            // some writers store file offsets relative to the mdat payload;
            // idat offsets are always absolute
            let target = if extent.offset >= start || !in_file {
                Some(extent.offset)
            } else {
                start.checked_add(extent.offset)
            };
            let Some(target) = target.filter(|t| {
                *t >= start
                    && t
                        .checked_add(extent.length)
                        .is_some_and(|item_end| item_end <= end)
            }) else {
                tracing::warn!(?extent, start, end, "item lies outside of mdat");
                continue;
            };

            let pos = bx.position();
            if target < pos {
                tracing::warn!(?extent, pos, "item overlaps a previous one");
                continue;
            }
            bx.discard(target - pos)?;

            let mut window = bx.window_of(extent.length)?;
            match candidate {
                Candidate::Exif => {
                    let res = self.emit_exif(&mut window, IfdType::Root);
                    self.finish(MetadataFlags::EXIF, res)?;
                }
                Candidate::Xmp => {
                    let res = self.emit_xmp(&mut window);
                    self.finish(MetadataFlags::XMP, res)?;
                }
                Candidate::Preview(header) => {
                    let res = self.emit_preview(&mut window, &header);
                    self.finish(MetadataFlags::PRVW, res)?;
                }
            }
        }
        Ok(())
    }

    /// Records the outcome of a callback: success satisfies `goal`, EOF
    /// stops the scan and anything else is only logged.
    pub(super) fn finish(&mut self, goal: u8, res: Result<()>) -> Result<()> {
        match res {
            Ok(()) => {
                self.flags.set_have(goal);
                Ok(())
            }
            Err(Error::Eof) => Err(Error::Eof),
            Err(e) => {
                tracing::warn!(goal, error = %e, "metadata callback failed");
                Ok(())
            }
        }
    }

    /// Positions `bx` at the TIFF header of an Exif payload and calls the
    /// Exif callback.
    pub(super) fn emit_exif(&mut self, bx: &mut BoxReader<'_>, first_ifd: IfdType) -> Result<()> {
        let image_type = self.image_type();
        let Some(cb) = self.on_exif.as_mut() else {
            return Ok(());
        };

        skip_exif_prefix(bx)?;
        let header = scan_tiff(bx, image_type)?
            .with_first_ifd(first_ifd)
            .with_exif_length(u32::try_from(bx.remain()).unwrap_or(u32::MAX));
        tracing::debug!(?header, "exif");
        cb(bx, &header)
    }

    pub(super) fn emit_xmp(&mut self, bx: &mut BoxReader<'_>) -> Result<()> {
        let Some(cb) = self.on_xmp.as_mut() else {
            return Ok(());
        };
        let header = evaluate_xpacket_header(bx)?;
        tracing::debug!(?header, "xmp");
        cb(bx, &header)
    }

    pub(super) fn emit_preview(
        &mut self,
        r: &mut dyn ByteSource,
        header: &PreviewHeader,
    ) -> Result<()> {
        let Some(cb) = self.on_preview.as_mut() else {
            return Ok(());
        };
        tracing::debug!(?header, "preview");
        cb(r, header)
    }
}

/// Skips the wrappers found in front of a TIFF header in Exif boxes and
/// items: `Exif\0\0`, an embedded `<size>Exif` box header, or a 32-bit
/// offset to the TIFF header.
fn skip_exif_prefix(bx: &mut BoxReader<'_>) -> Result<()> {
    let remain = bx.remain();
    let head = bx.peek_max(10)?;
    let n = match strip_exif_prefix(head) {
        Ok((rest, ())) => (head.len() - rest.len()) as u64,
        Err(_) if binary_order(head) != ByteOrder::Unknown => 0,
        Err(_) if head.len() >= 4 => {
            let offset = u32::from_be_bytes([head[0], head[1], head[2], head[3]]) as u64;
            if 4 + offset <= remain {
                4 + offset
            } else {
                4
            }
        }
        Err(_) => 0,
    };
    bx.discard(n)
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, io::Cursor};

    use super::*;
    use crate::{
        exif::decode,
        preview::PreviewSource,
        source::{SliceSource, Source},
        testkit::{bmff_box, ftyp, full_box, infe, init_tracing, iloc_v0, uuid_box, Entry, TiffBuilder},
        bmff::{CANON_PREVIEW_UUID, CANON_XPACKET_UUID},
        exif::ExifTag,
    };

    fn ifd0_make_le() -> Vec<u8> {
        let mut b = TiffBuilder::new(ByteOrder::Little);
        let root = b.ifd(vec![Entry::ascii(ExifTag::Make.code(), "Canon")]);
        b.build(root)
    }

    #[test]
    fn ftyp_only() {
        init_tracing();
        let buf = [
            0x00, 0x00, 0x00, 0x10, 0x66, 0x74, 0x79, 0x70, 0x61, 0x76, 0x69, 0x66, 0x30, 0x30,
            0x30, 0x31,
        ];
        let mut reader = BmffReader::new(SliceSource::new(&buf));
        let ftyp = reader.read_ftyp().unwrap();
        assert_eq!(ftyp.major_brand, Brand::Avif);
        assert_eq!(ftyp.minor_version.to_be_bytes(), *b"0001");
        assert!(ftyp.compatible_brands.is_empty());
        assert!(reader.read_metadata().unwrap_err().is_eof());
    }

    #[test]
    fn ftyp_after_jxl_signature() {
        let mut buf = bmff_box(b"JXL ", &[0x0d, 0x0a, 0x87, 0x0a]);
        buf.extend(ftyp(b"jxl ", &[b"jxl "]));
        let mut reader = BmffReader::new(SliceSource::new(&buf));
        let ftyp = reader.read_ftyp().unwrap();
        assert_eq!(ftyp.major_brand, Brand::Jxl);
        assert_eq!(ftyp.compatible_brands, [Brand::Jxl]);
        assert_eq!(ftyp.image_type(), ImageType::Jxl);
    }

    #[test]
    fn ftyp_must_come_first() {
        let buf = bmff_box(b"free", &[0; 4]);
        let mut reader = BmffReader::new(SliceSource::new(&buf));
        let e = reader.read_ftyp().unwrap_err();
        assert!(matches!(e, Error::Bmff(BmffError::UnexpectedBox(_))));
    }

    #[test]
    fn top_level_exif_box() {
        init_tracing();
        let mut buf = ftyp(b"avif", &[]);
        buf.extend([
            0x00, 0x00, 0x00, 0x18, 0x45, 0x78, 0x69, 0x66, 0x49, 0x49, 0x2A, 0x00, 0x08, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ]);

        let headers = RefCell::new(Vec::new());
        let mut reader = BmffReader::new(SliceSource::new(&buf)).on_exif(|_, h| {
            headers.borrow_mut().push(*h);
            Ok(())
        });
        reader.read_ftyp().unwrap();
        reader.read_metadata().unwrap();
        assert!(reader.read_metadata().unwrap_err().is_eof());
        drop(reader);

        let headers = headers.into_inner();
        assert_eq!(headers.len(), 1);
        let h = headers[0];
        assert_eq!(h.byte_order, ByteOrder::Little);
        assert_eq!(h.first_ifd_offset, 8);
        assert_eq!(h.image_type, ImageType::Avif);
        assert_eq!(h.exif_length, 16);
        assert_eq!(h.tiff_header_offset, 24);
    }

    #[test]
    fn exif_box_with_offset_prefix() {
        let tiff = ifd0_make_le();
        let mut payload = 6u32.to_be_bytes().to_vec();
        payload.extend(b"Exif\0\0");
        payload.extend(&tiff);
        let mut buf = ftyp(b"jxl ", &[]);
        buf.extend(bmff_box(b"Exif", &payload));

        let mut make = String::new();
        let mut reader = BmffReader::new(SliceSource::new(&buf)).on_exif(|r, h| {
            make = decode(r, h)?.make;
            Ok(())
        });
        reader.scan().unwrap();
        assert!(reader.flags().haves() & MetadataFlags::EXIF != 0);
        drop(reader);
        assert_eq!(make, "Canon");
    }

    #[test]
    fn cr3_xpacket() {
        let payload = "<?xpacket begin='\u{feff}' id='W5M0MpCehiHzreSzNTczkc9d'?>\n<x:xmpmeta></x:xmpmeta>";
        let mut buf = ftyp(b"crx ", &[b"crx "]);
        buf.extend(uuid_box(CANON_XPACKET_UUID, payload.as_bytes()));

        let mut seen = Vec::new();
        let mut reader = BmffReader::new(SliceSource::new(&buf)).on_xmp(|r, h| {
            let mut data = Vec::new();
            std::io::Read::read_to_end(r, &mut data)?;
            seen.push((*h, data));
            Ok(())
        });
        reader.read_ftyp().unwrap();
        reader.read_metadata().unwrap();
        assert!(reader.read_metadata().unwrap_err().is_eof());
        drop(reader);

        assert_eq!(seen.len(), 1);
        let (h, data) = &seen[0];
        assert!(h.has_xpacket_pi);
        assert!(h.has_xmp_meta);
        assert_eq!(h.length, payload.len() as u64);
        assert_eq!(h.offset, (buf.len() - payload.len()) as u64);
        assert_eq!(data, payload.as_bytes());
    }

    fn heif_xmp_file(xmp: &[u8], mdat_prefix: usize) -> Vec<u8> {
        let meta = full_box(
            b"meta",
            0,
            0,
            &[
                full_box(
                    b"iinf",
                    0,
                    0,
                    &[1u16.to_be_bytes().to_vec(), infe(1, b"mime", Some("application/rdf+xml"))]
                        .concat(),
                ),
                iloc_v0(&[(1, mdat_prefix as u32, xmp.len() as u32)]),
            ]
            .concat(),
        );
        let mut buf = ftyp(b"avif", &[b"mif1"]);
        buf.extend(meta);
        let mut mdat = vec![0xee; mdat_prefix];
        mdat.extend(xmp);
        buf.extend(bmff_box(b"mdat", &mdat));
        buf
    }

    #[test_case::test_case(0 ; "at payload start")]
    #[test_case::test_case(5 ; "after other data")]
    fn heif_xmp_via_mdat(prefix: usize) {
        init_tracing();
        let xmp = b"<x:xmpmeta xmlns:x='adobe:ns:meta/'><rdf:RDF/></x:xmpmeta>";
        let buf = heif_xmp_file(xmp, prefix);

        let mut seen = Vec::new();
        let mut reader = BmffReader::new(Source::unseekable(Cursor::new(&buf))).on_xmp(|r, h| {
            let mut data = Vec::new();
            std::io::Read::read_to_end(r, &mut data)?;
            seen.push((*h, data));
            Ok(())
        });
        reader.scan().unwrap();
        drop(reader);

        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].1, xmp);
        assert!(seen[0].0.has_xmp_meta);
        assert!(!seen[0].0.has_xpacket_pi);
    }

    fn heif_exif_file(payload: &[u8], relative: bool) -> Vec<u8> {
        let meta = |offset: u32| {
            full_box(
                b"meta",
                0,
                0,
                &[
                    full_box(
                        b"iinf",
                        0,
                        0,
                        &[1u16.to_be_bytes().to_vec(), infe(1, b"Exif", None)].concat(),
                    ),
                    iloc_v0(&[(1, offset, payload.len() as u32)]),
                ]
                .concat(),
            )
        };
        let head = ftyp(b"heic", &[b"mif1", b"heic"]);
        let offset = if relative {
            3
        } else {
            (head.len() + meta(0).len() + 8 + 3) as u32
        };

        let mut buf = head;
        buf.extend(meta(offset));
        let mut mdat = vec![0xee; 3];
        mdat.extend(payload);
        buf.extend(bmff_box(b"mdat", &mdat));
        buf
    }

    #[test_case::test_case(false ; "file offset")]
    #[test_case::test_case(true ; "mdat relative offset")]
    fn heif_exif_item_via_mdat(relative: bool) {
        init_tracing();
        let mut b = TiffBuilder::new(ByteOrder::Big);
        let exif_ifd = b.ifd(vec![Entry::short(ExifTag::IsoSpeedRatings.code(), 200)]);
        let root = b.ifd(vec![
            Entry::ascii(ExifTag::Make.code(), "Apple"),
            Entry::pointer(ExifTag::ExifIfdPointer.code(), exif_ifd),
        ]);
        let tiff = b.build(root);
        // the item starts with the offset of the TIFF header
        let mut payload = 4u32.to_be_bytes().to_vec();
        payload.extend([0xff; 4]);
        payload.extend(&tiff);
        let buf = heif_exif_file(&payload, relative);

        let mut found = Vec::new();
        let mut reader = BmffReader::new(Source::unseekable(Cursor::new(&buf))).on_exif(|r, h| {
            found.push((*h, decode(r, h)?));
            Ok(())
        });
        reader.scan().unwrap();
        assert!(reader.flags().haves() & MetadataFlags::EXIF != 0);
        drop(reader);

        assert_eq!(found.len(), 1);
        let (header, exif) = &found[0];
        assert_eq!(header.image_type, ImageType::Heic);
        assert_eq!(header.byte_order, ByteOrder::Big);
        assert_eq!(header.exif_length, tiff.len() as u32);
        assert_eq!(exif.make, "Apple");
        assert_eq!(exif.iso, 200);
    }

    #[test]
    fn idat_item_is_not_read_from_mdat() {
        init_tracing();
        let xmp = b"<x:xmpmeta/>";
        let mut iloc_body = vec![0x44, 0x00, 0x00, 0x01];
        iloc_body.extend([0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01]);
        iloc_body.extend(0u32.to_be_bytes());
        iloc_body.extend((xmp.len() as u32).to_be_bytes());
        let meta = full_box(
            b"meta",
            0,
            0,
            &[
                full_box(
                    b"iinf",
                    0,
                    0,
                    &[1u16.to_be_bytes().to_vec(), infe(1, b"mime", Some("application/rdf+xml"))]
                        .concat(),
                ),
                full_box(b"iloc", 1, 0, &iloc_body),
                bmff_box(b"idat", xmp),
            ]
            .concat(),
        );
        let mut buf = ftyp(b"avif", &[b"mif1"]);
        buf.extend(meta);
        // large enough to hold the idat offset once more past its start
        buf.extend(bmff_box(b"mdat", &[b'<'; 512]));

        let mut calls = 0;
        let mut reader = BmffReader::new(SliceSource::new(&buf)).on_xmp(|_, _| {
            calls += 1;
            Ok(())
        });
        reader.scan().unwrap();
        assert!(reader.flags().is_pending(MetadataFlags::XMP));
        drop(reader);
        assert_eq!(calls, 0);
    }

    #[test]
    fn callback_error_is_not_fatal() {
        let xmp = b"<x:xmpmeta/>";
        let buf = heif_xmp_file(xmp, 0);
        let mut calls = 0;
        let mut reader = BmffReader::new(SliceSource::new(&buf)).on_xmp(|_, _| {
            calls += 1;
            Err(Error::callback("rejected"))
        });
        reader.scan().unwrap();
        assert_eq!(reader.flags().haves(), 0);
        drop(reader);
        assert_eq!(calls, 1);
    }

    #[test]
    fn callback_eof_stops_the_scan() {
        let xmp = b"<x:xmpmeta/>";
        let buf = heif_xmp_file(xmp, 0);
        let mut reader = BmffReader::new(SliceSource::new(&buf)).on_xmp(|_, _| Err(Error::Eof));
        reader.read_ftyp().unwrap();
        reader.read_metadata().unwrap(); // meta
        assert!(reader.read_metadata().unwrap_err().is_eof()); // mdat
    }

    fn prvw_file(jpeg: &[u8]) -> Vec<u8> {
        let mut prvw = vec![0u8; 6];
        prvw.extend(320u16.to_be_bytes());
        prvw.extend(240u16.to_be_bytes());
        prvw.extend([0, 0]);
        prvw.extend((jpeg.len() as u32).to_be_bytes());
        prvw.extend(jpeg);
        let mut payload = vec![0u8; 8];
        payload.extend(bmff_box(b"PRVW", &prvw));

        let mut buf = ftyp(b"crx ", &[b"crx "]);
        buf.extend(uuid_box(CANON_PREVIEW_UUID, &payload));
        buf
    }

    #[test]
    fn cr3_prvw_preview() {
        init_tracing();
        let buf = prvw_file(&[0xff, 0xd8, 0xff, 0xd9]);

        let mut seen = Vec::new();
        let mut reader = BmffReader::new(SliceSource::new(&buf)).on_preview(|r, h| {
            let mut data = Vec::new();
            std::io::Read::read_to_end(r, &mut data)?;
            seen.push((*h, data));
            Ok(())
        });
        reader.read_ftyp().unwrap();
        reader.read_metadata().unwrap();
        assert!(reader.read_metadata().unwrap_err().is_eof());
        drop(reader);

        assert_eq!(seen.len(), 1);
        let (h, data) = &seen[0];
        assert_eq!(h.source, PreviewSource::Prvw);
        assert_eq!(h.image_type, ImageType::Jpeg);
        assert_eq!((h.width, h.height), (320, 240));
        assert_eq!(h.size, 4);
        assert_eq!(data, &[0xff, 0xd8, 0xff, 0xd9]);
    }

    #[test]
    fn preview_goal_needs_cr3() {
        let mut buf = prvw_file(&[0xff, 0xd8, 0xff, 0xd9]);
        // rewrite the major brand
        buf[8..12].copy_from_slice(b"heic");
        let mut calls = 0;
        let mut reader = BmffReader::new(SliceSource::new(&buf)).on_preview(|_, _| {
            calls += 1;
            Ok(())
        });
        reader.scan().unwrap();
        assert_eq!(reader.flags().goals(), 0);
        drop(reader);
        assert_eq!(calls, 0);
    }

    #[test]
    fn metadata_flags() {
        let mut flags = MetadataFlags::default();
        assert!(flags.is_done());
        flags.set_goal(MetadataFlags::EXIF | MetadataFlags::XMP);
        assert!(flags.is_pending(MetadataFlags::EXIF));
        flags.set_have(MetadataFlags::EXIF);
        assert!(!flags.is_pending(MetadataFlags::EXIF));
        assert!(!flags.is_done());
        flags.set_have(MetadataFlags::XMP);
        assert!(flags.is_done());
        assert_eq!(format!("{flags:?}"), "goals=0011 haves=0011");
    }
}
