use bytes::Bytes;

use super::{
    header::ExifHeader,
    parse::parse_tag,
    record::Exif,
    tag::{Ifd, IfdType, Tag, TagType, ENTRY_SIZE, MAX_SUB_IFDS},
    tags::ExifTag,
};
use crate::{
    buffer::{IfdBuffer, Pooled, IFD_BUFFERS, SCRATCH_SIZE},
    error::TiffError,
    file::ImageType,
    source::ByteSource,
    Error, Result, ScanOptions,
};

/// Maximum nesting of IFD pointers followed from the first IFD.
const MAX_IFD_DEPTH: u8 = 8;

/// Largest `ApplicationNotes` packet read into memory.
const MAX_XMP_LEN: u64 = 16 * 1024 * 1024;

/// Custom MakerNote decoder. Called with the reader positioned at the
/// MakerNote value.
pub type MakerNoteHandler<'h> =
    Box<dyn FnMut(&mut dyn ByteSource, &Tag, &mut Exif) -> Result<()> + 'h>;

/// Forward-only reader for TIFF image file directories.
///
/// Tags whose values live outside the IFD entry are queued and read in
/// file order, so the underlying source never seeks backwards. Values are
/// accumulated into an [`Exif`].
pub struct IfdReader<'h> {
    /// Absolute position of the TIFF base.
    base: u64,
    /// Readable bytes from the TIFF base, 0 when unbounded.
    exif_length: u32,
    buf: Pooled<IfdBuffer>,
    exif: Exif,
    max_tags: u16,
    makernote: Option<MakerNoteHandler<'h>>,
    span: tracing::Span,
}

impl<'h> IfdReader<'h> {
    pub fn new() -> Self {
        Self::with_options(&ScanOptions::default())
    }

    pub fn with_options(options: &ScanOptions) -> Self {
        Self {
            base: 0,
            exif_length: 0,
            buf: IFD_BUFFERS.acquire(),
            exif: Exif::default(),
            max_tags: options.max_ifd_tags,
            makernote: None,
            span: tracing::debug_span!("exif_scan"),
        }
    }

    /// Installs a decoder for MakerNotes; it replaces the built-in handling.
    pub fn with_makernote_handler<F>(mut self, handler: F) -> Self
    where
        F: FnMut(&mut dyn ByteSource, &Tag, &mut Exif) -> Result<()> + 'h,
    {
        self.makernote = Some(Box::new(handler));
        self
    }

    /// Continues accumulating into `exif`, e.g. across the Exif boxes of a
    /// CR3 file.
    pub fn with_exif(mut self, exif: Exif) -> Self {
        self.exif = exif;
        self
    }

    pub fn exif(&self) -> &Exif {
        &self.exif
    }

    pub fn into_exif(self) -> Exif {
        self.exif
    }

    /// Decodes a TIFF structure. `reader` must be positioned at the TIFF
    /// base, as [`scan_tiff`](super::scan_tiff) leaves it.
    ///
    /// Values decoded before a failure stay in the accumulator.
    pub fn decode_tiff(&mut self, reader: &mut dyn ByteSource, header: &ExifHeader) -> Result<()> {
        let span = self.span.clone();
        let _guard = span.enter();

        self.base = reader.position();
        self.exif_length = header.exif_length;
        self.buf.queue.clear();
        if self.exif.image_type == ImageType::Unknown {
            self.exif.image_type = header.image_type;
        }

        let kind = match header.first_ifd {
            IfdType::MakerNote => self.maker_note_kind().unwrap_or(IfdType::MakerNote),
            other => other,
        };
        let ifd = Ifd::new(kind, 0, header.first_ifd_offset, header.byte_order);
        tracing::debug!(?ifd, exif_length = self.exif_length, "decode tiff");
        self.read_ifd(reader, ifd)
    }

    /// Decodes a length-bounded TIFF structure (JPEG APP1, BMFF Exif item),
    /// then consumes what is left of the declared length.
    pub fn decode_jpeg_ifd(
        &mut self,
        reader: &mut dyn ByteSource,
        header: &ExifHeader,
    ) -> Result<()> {
        let res = self.decode_tiff(reader, header);

        let po = self.po(reader);
        if self.exif_length > po {
            let rest = (self.exif_length - po) as u64;
            match reader.discard(rest) {
                Ok(()) => {}
                Err(e) if e.is_eof() => tracing::debug!(rest, "exif segment is truncated"),
                Err(e) => return res.and(Err(e)),
            }
        }
        res
    }

    /// Reads one IFD header, then drains the tag queue in offset order,
    /// descending into child IFDs as their pointers come up.
    ///
    /// The queue is shared with the parents, so pointers queued by a parent
    /// may be followed from here; each child is read at the nesting level
    /// recorded in its pointer tag.
    pub fn read_ifd(&mut self, reader: &mut dyn ByteSource, ifd: Ifd) -> Result<()> {
        if ifd.depth >= MAX_IFD_DEPTH {
            return Err(TiffError::TooDeep.into());
        }
        self.read_ifd_header(reader, ifd)?;

        while let Some(tag) = self.buf.queue.current().copied() {
            self.buf.queue.advance();

            if tag.tag_type.is_pointer() {
                self.buf.queue.reset_position();
                self.follow_pointer(reader, &tag);
                continue;
            }

            if let Err(e) = self.read_tag_value(reader, &tag) {
                if e.is_eof() {
                    return Err(e);
                }
                tracing::warn!(tag = format!("0x{:04x}", tag.id), ifd = %tag.ifd, ?e, "skip tag");
            }
        }
        Ok(())
    }

    /// Reads the tag count, every 12-byte entry and the next-IFD offset.
    /// Embedded values are parsed on the spot; the rest is queued.
    pub fn read_ifd_header(&mut self, reader: &mut dyn ByteSource, ifd: Ifd) -> Result<()> {
        self.discard_to(reader, ifd.offset)?;

        let mut raw = [0u8; ENTRY_SIZE];
        self.read_bytes(reader, &mut raw[..2])?;
        let count = ifd.byte_order.u16(&raw);
        if count > self.max_tags {
            tracing::warn!(%ifd.kind, count, "too many tags; ifd rejected");
            return Err(TiffError::TooManyTags(count).into());
        }
        tracing::debug!(%ifd.kind, ifd.index, ifd.offset, count, "ifd");

        for _ in 0..count {
            self.read_bytes(reader, &mut raw)?;
            let tag = match Tag::parse_entry(&raw, ifd) {
                Ok((_, Ok(tag))) => coerce_pointer(tag),
                Ok((_, Err(e))) => {
                    tracing::debug!(?e, "skip entry");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            if tag.is_embedded() {
                let bytes = tag.embedded_bytes();
                if let Err(e) = parse_tag(&mut self.exif, &tag, &bytes[..tag.size() as usize]) {
                    tracing::warn!(tag = format!("0x{:04x}", tag.id), ?e, "invalid value");
                }
            } else {
                let po = self.po(reader);
                self.buf.queue.add(tag, po);
            }
        }

        self.read_bytes(reader, &mut raw[..4])?;
        let next = ifd.byte_order.u32(&raw);
        let chained = matches!(ifd.kind, IfdType::Root | IfdType::Thumbnail);
        if chained && next != 0 && ifd.index + 1 < MAX_SUB_IFDS {
            let po = self.po(reader);
            self.buf.queue.add(
                Tag {
                    id: 0,
                    tag_type: TagType::NextIfd,
                    ifd: ifd.kind,
                    ifd_index: ifd.index,
                    byte_order: ifd.byte_order,
                    depth: ifd.depth,
                    unit_count: 1,
                    value_offset: next,
                },
                po,
            );
        }
        Ok(())
    }

    /// Moves forward to the value of `tag`.
    pub fn seek_to_tag(&mut self, reader: &mut dyn ByteSource, tag: &Tag) -> Result<()> {
        self.discard_to(reader, tag.value_offset)
    }

    fn follow_pointer(&mut self, reader: &mut dyn ByteSource, tag: &Tag) {
        if tag.tag_type == TagType::NextIfd {
            // a sibling of IFD0, not a child
            let next = Ifd::new(
                IfdType::Thumbnail,
                tag.ifd_index + 1,
                tag.value_offset,
                tag.byte_order,
            )
            .at_depth(tag.depth);
            if let Err(e) = self.read_ifd(reader, next) {
                tracing::warn!(index = next.index, ?e, "chained ifd failed");
            }
            return;
        }

        let kind = match (tag.ifd, ExifTag::try_from(tag.id)) {
            (IfdType::Root, Ok(ExifTag::SubIfds)) => Some(IfdType::SubIfd),
            (IfdType::Root, Ok(ExifTag::ExifIfdPointer)) => Some(IfdType::Exif),
            (IfdType::Root, Ok(ExifTag::GpsIfdPointer)) => Some(IfdType::Gps),
            (IfdType::Exif, Ok(ExifTag::MakerNote)) => return self.maker_note(reader, tag),
            _ => None,
        };
        let Some(kind) = kind else {
            return;
        };

        let child = Ifd::new(kind, tag.ifd_index, tag.value_offset, tag.byte_order)
            .at_depth(tag.depth + 1);
        if let Err(e) = self.read_ifd(reader, child) {
            tracing::warn!(ifd = %kind, index = child.index, ?e, "child ifd failed");
        }
    }

    fn maker_note(&mut self, reader: &mut dyn ByteSource, tag: &Tag) {
        if let Some(mut handler) = self.makernote.take() {
            let res = match self.seek_to_tag(reader, tag) {
                Ok(()) => handler(reader, tag, &mut self.exif),
                Err(e) => Err(e),
            };
            self.makernote = Some(handler);
            if let Err(e) = res {
                tracing::warn!(?e, "makernote handler failed");
            }
            return;
        }

        let Some(kind) = self.maker_note_kind() else {
            tracing::debug!(make = self.exif.make, "unsupported makernote");
            return;
        };
        let child = Ifd::new(kind, 0, tag.value_offset, tag.byte_order).at_depth(tag.depth + 1);
        if let Err(e) = self.read_ifd(reader, child) {
            tracing::warn!(?e, "makernote ifd failed");
        }
    }

    /// Vendors whose MakerNote is a plain IFD addressed from the TIFF base.
    fn maker_note_kind(&self) -> Option<IfdType> {
        let canon = self.exif.make.starts_with("Canon")
            || matches!(self.exif.image_type, ImageType::Cr2 | ImageType::Cr3);
        canon.then_some(IfdType::CanonMakerNote)
    }

    fn read_tag_value(&mut self, reader: &mut dyn ByteSource, tag: &Tag) -> Result<()> {
        self.seek_to_tag(reader, tag)?;

        // SubIFDs given as an array of offsets
        if tag.ifd == IfdType::Root && tag.id == ExifTag::SubIfds.code() {
            return self.queue_sub_ifds(reader, tag);
        }

        if tag.ifd == IfdType::Root && tag.id == ExifTag::ApplicationNotes.code() {
            let len = tag.size().min(MAX_XMP_LEN) as usize;
            self.check_length(reader, len)?;
            let mut xmp = vec![0u8; len];
            reader.read_exact_bytes(&mut xmp)?;
            self.exif.xmp = Some(Bytes::from(xmp));
            return Ok(());
        }

        let n = (tag.size() as usize).min(SCRATCH_SIZE);
        self.check_length(reader, n)?;
        let IfdReader { buf, exif, .. } = self;
        reader.read_exact_bytes(&mut buf.scratch[..n])?;
        parse_tag(exif, tag, &buf.scratch[..n])
    }

    fn queue_sub_ifds(&mut self, reader: &mut dyn ByteSource, tag: &Tag) -> Result<()> {
        let count = tag.unit_count.min(MAX_SUB_IFDS as u32) as usize;
        let mut offsets = [0u8; 4 * MAX_SUB_IFDS as usize];
        self.read_bytes(reader, &mut offsets[..count * 4])?;

        let po = self.po(reader);
        for (i, off) in offsets[..count * 4].chunks_exact(4).enumerate() {
            let value_offset = match tag.tag_type {
                TagType::Short => tag.byte_order.u16(off) as u32,
                _ => tag.byte_order.u32(off),
            };
            let child = Tag {
                tag_type: TagType::IfdPointer,
                ifd_index: i as u8,
                unit_count: 1,
                value_offset,
                ..*tag
            };
            self.buf.queue.add(child, po);
        }
        Ok(())
    }

    /// Offset of the reader from the TIFF base.
    fn po(&self, reader: &dyn ByteSource) -> u32 {
        u32::try_from(reader.position().saturating_sub(self.base)).unwrap_or(u32::MAX)
    }

    fn check_length(&self, reader: &dyn ByteSource, n: usize) -> Result<()> {
        if self.exif_length == 0 {
            return Ok(());
        }
        let need = self.po(reader) as u64 + n as u64;
        if need > self.exif_length as u64 {
            return Err(TiffError::ExifLengthExceeded {
                need: u32::try_from(need).unwrap_or(u32::MAX),
                limit: self.exif_length,
            }
            .into());
        }
        Ok(())
    }

    fn read_bytes(&mut self, reader: &mut dyn ByteSource, buf: &mut [u8]) -> Result<()> {
        self.check_length(reader, buf.len())?;
        reader.read_exact_bytes(buf)
    }

    fn discard_to(&mut self, reader: &mut dyn ByteSource, offset: u32) -> Result<()> {
        let po = self.po(reader);
        if offset < po {
            return Err(TiffError::BackwardSeek { pos: po, offset }.into());
        }
        if self.exif_length != 0 && offset > self.exif_length {
            return Err(TiffError::ExifLengthExceeded {
                need: offset,
                limit: self.exif_length,
            }
            .into());
        }
        reader.discard((offset - po) as u64)
    }
}

impl Default for IfdReader<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for IfdReader<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IfdReader")
            .field("base", &self.base)
            .field("exif_length", &self.exif_length)
            .field("queue", &self.buf.queue)
            .finish_non_exhaustive()
    }
}

/// Tags whose value is the offset of another IFD.
fn coerce_pointer(mut tag: Tag) -> Tag {
    let is_pointer = match (tag.ifd, ExifTag::try_from(tag.id)) {
        (IfdType::Root, Ok(ExifTag::ExifIfdPointer | ExifTag::GpsIfdPointer)) => true,
        (IfdType::Root, Ok(ExifTag::SubIfds)) => tag.unit_count <= 1,
        (IfdType::Exif, Ok(ExifTag::MakerNote)) => true,
        _ => false,
    };
    if is_pointer {
        tag.tag_type = TagType::IfdPointer;
        tag.unit_count = 1;
    }
    tag
}

/// Decodes a TIFF structure from the current position of `reader`.
pub(crate) fn decode(reader: &mut dyn ByteSource, header: &ExifHeader) -> Result<Exif> {
    let mut ifd_reader = IfdReader::new();
    match ifd_reader.decode_tiff(reader, header) {
        Ok(()) => Ok(ifd_reader.into_exif()),
        Err(Error::Eof) if ifd_reader.exif() != &Exif::default() => Ok(ifd_reader.into_exif()),
        Err(e) => Err(e),
    }
}
