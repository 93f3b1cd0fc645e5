//! ISO base media file format scanning (HEIF/HEIC, AVIF, CR3, JPEG XL).

use std::fmt::{Debug, Display};

use nom::{
    bytes::streaming::take,
    combinator::{cond, map},
    number::streaming::{be_u32, be_u64},
    IResult,
};
use uuid::Uuid;

use crate::{error::BmffError, file::ImageType, source::ByteSource, Error, Result};

pub use cr3::{CANON_METADATA_UUID, CANON_PREVIEW_UUID, CANON_XPACKET_UUID};
pub use heif::{
    ItemGraph, ItemId, ItemInfo, ItemLocation, ItemProperty, ItemReference, ItemType,
    PropertyLink,
};
pub use iloc::Extent;
pub use reader::{BmffReader, ExifCallback, FileTypeBox, MetadataFlags, PreviewCallback, XmpCallback};

mod cr3;
mod heif;
mod iloc;
mod reader;

/// Four ASCII bytes naming a box type, brand, handler or item type.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    pub const fn new(v: &[u8; 4]) -> Self {
        Self(*v)
    }

    pub fn as_u32(self) -> u32 {
        u32::from_be_bytes(self.0)
    }
}

impl From<u32> for FourCC {
    fn from(v: u32) -> Self {
        Self(v.to_be_bytes())
    }
}

impl Display for FourCC {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // "©xyz" and friends are not valid UTF-8
        for b in self.0 {
            let c = if b.is_ascii_graphic() || b == b' ' {
                b as char
            } else {
                '*'
            };
            write!(f, "{c}")?;
        }
        Ok(())
    }
}

impl Debug for FourCC {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "'{self}'")
    }
}

macro_rules! fourcc_enum {
    (
        $( #[$docs:meta] )*
        $name:ident {
            $( $variant:ident = $code:literal, )*
        }
    ) => {
        $( #[$docs] )*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $( $variant, )*
            Unknown(FourCC),
        }

        impl $name {
            pub fn fourcc(self) -> FourCC {
                match self {
                    $( $name::$variant => FourCC(*$code), )*
                    $name::Unknown(v) => v,
                }
            }
        }

        impl From<FourCC> for $name {
            fn from(v: FourCC) -> Self {
                match &v.0 {
                    $( $code => $name::$variant, )*
                    _ => $name::Unknown(v),
                }
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                Display::fmt(&self.fourcc(), f)
            }
        }
    };
}

fourcc_enum! {
    /// Box types the scanner knows about.
    BoxType {
        Ftyp = b"ftyp",
        Meta = b"meta",
        Moov = b"moov",
        Mdat = b"mdat",
        Uuid = b"uuid",
        Exif = b"Exif",
        Xml = b"xml ",
        Free = b"free",
        Skip = b"skip",
        Hdlr = b"hdlr",
        Pitm = b"pitm",
        Iinf = b"iinf",
        Infe = b"infe",
        Iref = b"iref",
        Iprp = b"iprp",
        Ipco = b"ipco",
        Ipma = b"ipma",
        Ispe = b"ispe",
        Idat = b"idat",
        Iloc = b"iloc",
        Jxl = b"JXL ",
        Jumb = b"jumb",
        Jxlc = b"jxlc",
        Jxll = b"jxll",
        Jxlp = b"jxlp",
        Cmt1 = b"CMT1",
        Cmt2 = b"CMT2",
        Cmt3 = b"CMT3",
        Cmt4 = b"CMT4",
        Cncv = b"CNCV",
        Ctbo = b"CTBO",
        Thmb = b"THMB",
        Prvw = b"PRVW",
    }
}

fourcc_enum! {
    /// `ftyp` brands.
    Brand {
        Heic = b"heic",
        Heix = b"heix",
        Heim = b"heim",
        Heis = b"heis",
        Hevc = b"hevc",
        Hevx = b"hevx",
        Avif = b"avif",
        Avis = b"avis",
        Heif = b"heif",
        Mif1 = b"mif1",
        Msf1 = b"msf1",
        Miaf = b"miaf",
        Crx = b"crx ",
        Jxl = b"jxl ",
        Isom = b"isom",
        Iso8 = b"iso8",
        Mp41 = b"mp41",
        Mp42 = b"mp42",
        M4a = b"M4A ",
        Qt = b"qt  ",
    }
}

impl Brand {
    pub fn image_type(self) -> ImageType {
        match self {
            Brand::Heic | Brand::Heix | Brand::Heim | Brand::Heis | Brand::Hevc | Brand::Hevx => {
                ImageType::Heic
            }
            Brand::Avif | Brand::Avis => ImageType::Avif,
            Brand::Heif | Brand::Mif1 | Brand::Msf1 | Brand::Miaf => ImageType::Heif,
            Brand::Crx => ImageType::Cr3,
            Brand::Jxl => ImageType::Jxl,
            _ => ImageType::Unknown,
        }
    }
}

/// Largest header: size, type, largesize, uuid.
const MAX_HEADER_SIZE: usize = 32;

/// A decoded box header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoxHeader {
    pub box_type: FourCC,
    /// Absolute offset of the header.
    pub offset: u64,
    /// Declared size, header included.
    pub size: u64,
    pub header_size: u64,
    pub uuid: Option<Uuid>,
}

impl BoxHeader {
    fn parse_raw(input: &[u8]) -> IResult<&[u8], (u32, FourCC, Option<u64>, Option<Uuid>)> {
        let (remain, size) = be_u32(input)?;
        let (remain, box_type) = map(be_u32, FourCC::from)(remain)?;
        let (remain, large) = cond(size == 1, be_u64)(remain)?;
        let (remain, uuid) = cond(
            box_type.0 == *b"uuid",
            map(take(16usize), |b: &[u8]| {
                let mut bytes = [0u8; 16];
                bytes.copy_from_slice(b);
                Uuid::from_bytes(bytes)
            }),
        )(remain)?;
        Ok((remain, (size, box_type, large, uuid)))
    }

    /// Decodes a header from the start of `input`; `offset` is the absolute
    /// position of `input[0]`.
    pub fn parse(input: &[u8], offset: u64) -> Result<BoxHeader> {
        let (remain, (size, box_type, large, uuid)) = Self::parse_raw(input)?;
        let header_size = (input.len() - remain.len()) as u64;

        let size = match (size, large) {
            (0, _) => return Err(BmffError::SizeToEof.into()),
            (_, Some(large)) if large > i64::MAX as u64 => {
                return Err(BmffError::TooLarge(large).into())
            }
            (_, Some(large)) => large,
            (size, None) => size as u64,
        };
        if size < header_size {
            return Err(BmffError::SizeTooSmall {
                size,
                header: header_size,
            }
            .into());
        }

        Ok(BoxHeader {
            box_type,
            offset,
            size,
            header_size,
            uuid,
        })
    }

    pub fn body_size(&self) -> u64 {
        self.size - self.header_size
    }
}

/// A size-bounded view over the payload of one box.
///
/// All I/O goes through the enclosing scope, so consuming bytes from a box
/// consumes them from every ancestor as well. Unread payload is discarded
/// when the view is dropped.
pub struct BoxReader<'a> {
    inner: &'a mut dyn ByteSource,
    header: BoxHeader,
    box_type: BoxType,
    remain: u64,
    flags: u32,
}

impl<'a> BoxReader<'a> {
    /// Reads the next box header from `parent`.
    pub fn new(parent: &'a mut dyn ByteSource) -> Result<Self> {
        let offset = parent.position();
        let buf = parent.peek_max(MAX_HEADER_SIZE)?;
        let header = BoxHeader::parse(buf, offset)?;

        if let Some(remain) = parent.remaining() {
            if header.size > remain {
                return Err(BmffError::InsufficientLength {
                    need: header.size,
                    remain,
                }
                .into());
            }
        }
        parent.discard(header.header_size)?;

        tracing::trace!(box_type = %header.box_type, offset, size = header.size, "box");
        Ok(Self {
            inner: parent,
            box_type: header.box_type.into(),
            remain: header.body_size(),
            header,
            flags: 0,
        })
    }

    /// A headerless view over the next `length` bytes of `parent`, used for
    /// item extents.
    pub fn window(parent: &'a mut dyn ByteSource, box_type: FourCC, length: u64) -> Result<Self> {
        if let Some(remain) = parent.remaining() {
            if length > remain {
                return Err(BmffError::InsufficientLength {
                    need: length,
                    remain,
                }
                .into());
            }
        }
        let header = BoxHeader {
            box_type,
            offset: parent.position(),
            size: length,
            header_size: 0,
            uuid: None,
        };
        Ok(Self {
            inner: parent,
            box_type: box_type.into(),
            remain: length,
            header,
            flags: 0,
        })
    }

    pub fn box_type(&self) -> BoxType {
        self.box_type
    }

    pub fn header(&self) -> &BoxHeader {
        &self.header
    }

    pub fn uuid(&self) -> Option<Uuid> {
        self.header.uuid
    }

    /// Absolute offset of the first payload byte.
    pub fn payload_offset(&self) -> u64 {
        self.header.offset + self.header.header_size
    }

    /// Payload bytes not consumed yet.
    pub fn remain(&self) -> u64 {
        self.remain
    }

    pub fn version(&self) -> u8 {
        (self.flags >> 24) as u8
    }

    pub fn flags(&self) -> u32 {
        self.flags & 0x00ff_ffff
    }

    /// Returns the next child box, or `None` once fewer than 8 bytes are
    /// left.
    pub fn read_inner_box(&mut self) -> Result<Option<BoxReader<'_>>> {
        if self.remain < 8 {
            return Ok(None);
        }
        BoxReader::new(self).map(Some)
    }

    /// A headerless child view over the next `length` payload bytes.
    pub fn window_of(&mut self, length: u64) -> Result<BoxReader<'_>> {
        let box_type = self.header.box_type;
        BoxReader::window(self, box_type, length)
    }

    /// Consumes the FullBox version and flags.
    pub fn read_flags(&mut self) -> Result<u8> {
        self.flags = self.read_u32()?;
        Ok(self.version())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let mut b = [0u8; 1];
        self.read_exact_bytes(&mut b)?;
        Ok(b[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let mut b = [0u8; 2];
        self.read_exact_bytes(&mut b)?;
        Ok(u16::from_be_bytes(b))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let mut b = [0u8; 4];
        self.read_exact_bytes(&mut b)?;
        Ok(u32::from_be_bytes(b))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let mut b = [0u8; 8];
        self.read_exact_bytes(&mut b)?;
        Ok(u64::from_be_bytes(b))
    }

    /// Reads a big-endian integer of 1, 2, 4 or 8 bytes.
    pub fn read_uint(&mut self, size: u8) -> Result<u64> {
        match size {
            1 => self.read_u8().map(u64::from),
            2 => self.read_u16().map(u64::from),
            4 => self.read_u32().map(u64::from),
            8 => self.read_u64(),
            other => Err(BmffError::UnsupportedIntSize(other).into()),
        }
    }

    pub fn read_fourcc(&mut self) -> Result<FourCC> {
        self.read_u32().map(FourCC::from)
    }

    pub fn read_uuid(&mut self) -> Result<Uuid> {
        let mut b = [0u8; 16];
        self.read_exact_bytes(&mut b)?;
        Ok(Uuid::from_bytes(b))
    }

    /// Length of the NUL-terminated string at the cursor, and whether the
    /// terminator is present.
    fn cstring_len(&mut self, max_len: usize) -> Result<(usize, bool)> {
        let remain = self.remain;
        let window = (max_len as u64 + 1).min(remain) as usize;
        let buf = self.peek_max(window)?;
        match buf.iter().position(|b| *b == 0) {
            Some(n) => Ok((n, true)),
            // a string may run to the end of its box unterminated
            None if buf.len() as u64 == remain && buf.len() <= max_len => {
                Ok((buf.len(), false))
            }
            None => Err(BmffError::CStringTooLong(max_len).into()),
        }
    }

    /// Reads a NUL-terminated UTF-8 string of at most `max_len` bytes.
    pub fn read_cstring(&mut self, max_len: usize) -> Result<String> {
        let (n, terminated) = self.cstring_len(max_len)?;
        let s = String::from_utf8_lossy(&self.peek(n)?[..n]).into_owned();
        self.discard(n as u64 + terminated as u64)?;
        Ok(s)
    }

    pub fn discard_cstring(&mut self, max_len: usize) -> Result<()> {
        let (n, terminated) = self.cstring_len(max_len)?;
        self.discard(n as u64 + terminated as u64)
    }

    /// Discards whatever payload is left.
    pub fn close(&mut self) -> Result<()> {
        let n = self.remain;
        if n > 0 {
            self.discard(n)?;
        }
        Ok(())
    }
}

impl ByteSource for BoxReader<'_> {
    fn peek(&mut self, n: usize) -> Result<&[u8]> {
        if n as u64 > self.remain {
            return Err(BmffError::InsufficientLength {
                need: n as u64,
                remain: self.remain,
            }
            .into());
        }
        self.inner.peek(n)
    }

    fn peek_max(&mut self, n: usize) -> Result<&[u8]> {
        let n = (n as u64).min(self.remain) as usize;
        self.inner.peek_max(n)
    }

    fn discard(&mut self, n: u64) -> Result<()> {
        if n > self.remain {
            return Err(BmffError::InsufficientLength {
                need: n,
                remain: self.remain,
            }
            .into());
        }
        let before = self.inner.position();
        let res = self.inner.discard(n);
        let consumed = self.inner.position().saturating_sub(before);
        self.remain -= consumed.min(self.remain);
        res
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = (buf.len() as u64).min(self.remain) as usize;
        if n == 0 {
            return Ok(0);
        }
        let read = self.inner.read(&mut buf[..n])?;
        self.remain -= read as u64;
        Ok(read)
    }

    fn position(&self) -> u64 {
        self.inner.position()
    }

    fn remaining(&self) -> Option<u64> {
        Some(self.remain)
    }
}

impl Drop for BoxReader<'_> {
    fn drop(&mut self) {
        if self.remain == 0 {
            return;
        }
        match self.close() {
            Ok(()) => {}
            Err(Error::Eof) => tracing::debug!(box_type = %self.header.box_type, "truncated box"),
            Err(e) => tracing::debug!(box_type = %self.header.box_type, ?e, "close box"),
        }
    }
}

impl Debug for BoxReader<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxReader")
            .field("header", &self.header)
            .field("remain", &self.remain)
            .field("flags", &format_args!("{:#010x}", self.flags))
            .finish()
    }
}
