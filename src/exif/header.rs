use nom::{
    bytes::complete::tag, branch::alt, combinator::map, number::complete, sequence::tuple,
    IResult,
};

use super::{
    endian::{ByteOrder, TIFF_BE, TIFF_LE},
    tag::IfdType,
};
use crate::{file::ImageType, source::ByteSource, Error, Result};

/// Where a TIFF structure starts and how to read it.
#[cfg_attr(feature = "json_dump", derive(serde::Serialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExifHeader {
    pub byte_order: ByteOrder,
    /// Offset of the first IFD from the TIFF base.
    pub first_ifd_offset: u32,
    /// Absolute position of the TIFF base in the scanned stream.
    pub tiff_header_offset: u32,
    /// Number of bytes available from the TIFF base, 0 when unbounded.
    pub exif_length: u32,
    /// Kind of the first IFD; CR3 `CMT*` boxes start below IFD0.
    pub first_ifd: IfdType,
    pub image_type: ImageType,
}

impl ExifHeader {
    pub fn new(byte_order: ByteOrder, first_ifd_offset: u32, image_type: ImageType) -> Self {
        Self {
            byte_order,
            first_ifd_offset,
            image_type,
            ..Default::default()
        }
    }

    pub fn with_first_ifd(mut self, first_ifd: IfdType) -> Self {
        self.first_ifd = first_ifd;
        self
    }

    pub fn with_exif_length(mut self, exif_length: u32) -> Self {
        self.exif_length = exif_length;
        self
    }

    pub fn is_valid(&self) -> bool {
        self.byte_order != ByteOrder::Unknown
    }
}

/// Parses the 8-byte TIFF header: signature plus first-IFD offset.
pub(crate) fn parse_tiff_header(input: &[u8]) -> IResult<&[u8], (ByteOrder, u32)> {
    let (remain, byte_order) = alt((
        map(tag(TIFF_LE), |_| ByteOrder::Little),
        map(tag(TIFF_BE), |_| ByteOrder::Big),
    ))(input)?;
    let (remain, offset) = complete::u32(byte_order.nom_endian())(remain)?;
    Ok((remain, (byte_order, offset)))
}

const SCAN_WINDOW: usize = 16;

/// Skips forward to the next TIFF signature and decodes the header there.
///
/// The reader is left positioned at the signature, which becomes the TIFF
/// base. Fails with [`Error::NoExif`] when the stream ends first.
#[tracing::instrument(skip(reader))]
pub fn scan_tiff(reader: &mut dyn ByteSource, image_type: ImageType) -> Result<ExifHeader> {
    loop {
        let window = match reader.peek_max(SCAN_WINDOW) {
            Ok(w) => w,
            Err(e) if e.is_eof() => return Err(Error::NoExif),
            Err(e) => return Err(e),
        };
        if window.len() < 8 {
            return Err(Error::NoExif);
        }

        if let Ok((_, (byte_order, first_ifd_offset))) = parse_tiff_header(window) {
            let tiff_header_offset = u32::try_from(reader.position()).unwrap_or(u32::MAX);
            tracing::debug!(%byte_order, first_ifd_offset, tiff_header_offset, "tiff header");
            return Ok(ExifHeader {
                tiff_header_offset,
                ..ExifHeader::new(byte_order, first_ifd_offset, image_type)
            });
        }

        // a signature may straddle the window end; keep its possible prefix
        let skip = window[1..]
            .windows(4)
            .position(|w| w == TIFF_LE || w == TIFF_BE)
            .map_or(window.len() - 3, |i| i + 1);
        match reader.discard(skip as u64) {
            Ok(()) => {}
            Err(e) if e.is_eof() => return Err(Error::NoExif),
            Err(e) => return Err(e),
        }
    }
}

/// Exif payload prefixes seen in the wild before the TIFF header.
pub(crate) fn strip_exif_prefix(input: &[u8]) -> IResult<&[u8], ()> {
    alt((
        map(tag(*b"Exif\0\0"), |_| ()),
        map(tuple((complete::be_u32, tag(*b"Exif"))), |_| ()),
    ))(input)
}
