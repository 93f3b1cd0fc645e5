use std::fmt::Display;

use nom::{number::complete, sequence::tuple, IResult};

use super::endian::ByteOrder;
use crate::error::TiffError;

/// Field type of an IFD entry, plus two private pseudo-types used while
/// scanning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum TagType {
    #[default]
    Byte = 1,
    Ascii = 2,
    Short = 3,
    Long = 4,
    Rational = 5,
    SByte = 6,
    Undefined = 7,
    SShort = 8,
    SLong = 9,
    SRational = 10,
    Float = 11,
    Double = 12,
    /// TIFF 6.0 `IFD` type; an offset that is read like a long.
    Ifd = 13,
    /// Offset of the next IFD in a chain, e.g. IFD0 to IFD1.
    NextIfd = 0xfd,
    /// ASCII data that may lack the trailing NUL.
    AsciiNoNul = 0xfe,
    /// The value field is the offset of a child IFD.
    IfdPointer = 0xff,
}

impl TagType {
    pub const fn size(self) -> u32 {
        match self {
            TagType::Byte
            | TagType::Ascii
            | TagType::SByte
            | TagType::Undefined
            | TagType::AsciiNoNul => 1,
            TagType::Short | TagType::SShort => 2,
            TagType::Long
            | TagType::SLong
            | TagType::Float
            | TagType::Ifd
            | TagType::NextIfd
            | TagType::IfdPointer => 4,
            TagType::Rational | TagType::SRational | TagType::Double => 8,
        }
    }

    pub fn is_ascii(self) -> bool {
        matches!(self, TagType::Ascii | TagType::AsciiNoNul)
    }

    pub fn is_pointer(self) -> bool {
        matches!(self, TagType::IfdPointer | TagType::NextIfd)
    }
}

impl TryFrom<u16> for TagType {
    type Error = u16;

    fn try_from(v: u16) -> Result<Self, Self::Error> {
        let t = match v {
            1 => TagType::Byte,
            2 => TagType::Ascii,
            3 => TagType::Short,
            4 => TagType::Long,
            5 => TagType::Rational,
            6 => TagType::SByte,
            7 => TagType::Undefined,
            8 => TagType::SShort,
            9 => TagType::SLong,
            10 => TagType::SRational,
            11 => TagType::Float,
            12 => TagType::Double,
            13 => TagType::Ifd,
            other => return Err(other),
        };
        Ok(t)
    }
}

/// Kind of directory a tag was found in.
#[cfg_attr(feature = "json_dump", derive(serde::Serialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
#[repr(u8)]
pub enum IfdType {
    #[default]
    Root,
    /// IFD1 and further IFDs chained after IFD0.
    Thumbnail,
    Exif,
    Gps,
    Interop,
    SubIfd,
    MakerNote,
    CanonMakerNote,
    NikonMakerNote,
    AppleMakerNote,
    SonyMakerNote,
    DngAdobeData,
}

impl IfdType {
    pub fn is_maker_note(self) -> bool {
        matches!(
            self,
            IfdType::MakerNote
                | IfdType::CanonMakerNote
                | IfdType::NikonMakerNote
                | IfdType::AppleMakerNote
                | IfdType::SonyMakerNote
        )
    }
}

impl Display for IfdType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            IfdType::Root => "ifd0",
            IfdType::Thumbnail => "ifd1",
            IfdType::Exif => "exif",
            IfdType::Gps => "gps",
            IfdType::Interop => "interop",
            IfdType::SubIfd => "subifd",
            IfdType::MakerNote => "makernote",
            IfdType::CanonMakerNote => "canon",
            IfdType::NikonMakerNote => "nikon",
            IfdType::AppleMakerNote => "apple",
            IfdType::SonyMakerNote => "sony",
            IfdType::DngAdobeData => "dng-adobe-data",
        };
        s.fmt(f)
    }
}

/// Maximum number of SubIFDs followed from IFD0.
pub const MAX_SUB_IFDS: u8 = 8;

/// One IFD entry, decoded from its 12-byte form.
///
/// `value_offset` holds the value itself for embedded tags, otherwise the
/// offset of the value from the TIFF base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Tag {
    pub id: u16,
    pub tag_type: TagType,
    pub ifd: IfdType,
    pub ifd_index: u8,
    pub byte_order: ByteOrder,
    /// Nesting level of the IFD holding the tag, 0 for IFD0.
    pub depth: u8,
    pub unit_count: u32,
    pub value_offset: u32,
}

pub(crate) const ENTRY_SIZE: usize = 12;

impl Tag {
    /// Size of the value in bytes.
    pub fn size(&self) -> u64 {
        self.unit_count as u64 * self.tag_type.size() as u64
    }

    pub fn is_embedded(&self) -> bool {
        self.size() <= 4 && !self.tag_type.is_pointer()
    }

    /// The embedded value as it sat in the entry.
    pub fn embedded_bytes(&self) -> [u8; 4] {
        self.byte_order.put_u32(self.value_offset)
    }

    /// Decodes a 12-byte IFD entry: `id(2) type(2) count(4) value(4)`.
    pub(crate) fn parse_entry(
        input: &[u8],
        ifd: Ifd,
    ) -> IResult<&[u8], std::result::Result<Tag, TiffError>> {
        let endian = ifd.byte_order.nom_endian();
        let (remain, (id, raw_type, unit_count, value_offset)) = tuple((
            complete::u16(endian),
            complete::u16(endian),
            complete::u32(endian),
            complete::u32(endian),
        ))(input)?;

        let tag = TagType::try_from(raw_type)
            .map(|tag_type| Tag {
                id,
                tag_type,
                ifd: ifd.kind,
                ifd_index: ifd.index,
                byte_order: ifd.byte_order,
                depth: ifd.depth,
                unit_count,
                value_offset,
            })
            .map_err(|t| TiffError::InvalidTagType(id, t));
        Ok((remain, tag))
    }
}

/// Descriptor of a directory being read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Ifd {
    pub kind: IfdType,
    pub index: u8,
    /// Offset from the TIFF base.
    pub offset: u32,
    pub byte_order: ByteOrder,
    /// Nesting level, 0 for IFD0 and the IFDs chained after it.
    pub depth: u8,
}

impl Ifd {
    pub fn new(kind: IfdType, index: u8, offset: u32, byte_order: ByteOrder) -> Self {
        Self {
            kind,
            index,
            offset,
            byte_order,
            depth: 0,
        }
    }

    pub fn at_depth(mut self, depth: u8) -> Self {
        self.depth = depth;
        self
    }
}
