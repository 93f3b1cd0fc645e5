use std::fmt::Display;

use nom::{
    branch::alt,
    bytes::complete::tag,
    combinator::{map, opt},
    number::complete::be_u32,
    sequence::tuple,
    IResult,
};

use crate::bmff::{Brand, FourCC};

/// Kind of image a scan was run on.
#[cfg_attr(feature = "json_dump", derive(serde::Serialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ImageType {
    #[default]
    Unknown,
    Jpeg,
    Tiff,
    Heic,
    Heif,
    Avif,
    Cr2,
    Cr3,
    Nef,
    Arw,
    Dng,
    Jxl,
    Png,
}

impl ImageType {
    /// Narrows a plain TIFF down to a raw format once the camera make is
    /// known.
    pub(crate) fn refine_tiff(self, make: &str) -> ImageType {
        if self != ImageType::Tiff {
            return self;
        }
        let make = make.trim().to_ascii_uppercase();
        if make.starts_with("NIKON") {
            ImageType::Nef
        } else if make.starts_with("SONY") {
            ImageType::Arw
        } else {
            self
        }
    }
}

impl Display for ImageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ImageType::Unknown => "unknown",
            ImageType::Jpeg => "jpeg",
            ImageType::Tiff => "tiff",
            ImageType::Heic => "heic",
            ImageType::Heif => "heif",
            ImageType::Avif => "avif",
            ImageType::Cr2 => "cr2",
            ImageType::Cr3 => "cr3",
            ImageType::Nef => "nef",
            ImageType::Arw => "arw",
            ImageType::Dng => "dng",
            ImageType::Jxl => "jxl",
            ImageType::Png => "png",
        };
        f.write_str(s)
    }
}

/// Container family, detected from the first bytes of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Jpeg,
    /// TIFF and the raw formats built on it.
    Tiff(ImageType),
    Png,
    /// ISOBMFF, with the major brand of its `ftyp` box.
    Bmff(Brand),
}

/// Bytes needed to tell the supported formats apart.
pub const SNIFF_LEN: usize = 32;

const JPEG_SOI: [u8; 3] = [0xff, 0xd8, 0xff];
const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];
const JXL_SIGNATURE_BOX: [u8; 12] = [
    0x00, 0x00, 0x00, 0x0c, b'J', b'X', b'L', b' ', 0x0d, 0x0a, 0x87, 0x0a,
];

impl FileFormat {
    pub fn image_type(&self) -> ImageType {
        match self {
            FileFormat::Jpeg => ImageType::Jpeg,
            FileFormat::Tiff(t) => *t,
            FileFormat::Png => ImageType::Png,
            FileFormat::Bmff(brand) => brand.image_type(),
        }
    }
}

fn parse_tiff(input: &[u8]) -> IResult<&[u8], FileFormat> {
    let (remain, _) = alt((tag([0x49, 0x49, 0x2a, 0x00]), tag([0x4d, 0x4d, 0x00, 0x2a])))(input)?;
    let (remain, _) = be_u32(remain)?;
    // Canon CR2 carries "CR" and its version right after the TIFF header
    let (remain, cr2) = opt(tag("CR"))(remain)?;
    let image_type = if cr2.is_some() {
        ImageType::Cr2
    } else {
        ImageType::Tiff
    };
    Ok((remain, FileFormat::Tiff(image_type)))
}

fn parse_ftyp(input: &[u8]) -> IResult<&[u8], FileFormat> {
    let (remain, _) = opt(tag(JXL_SIGNATURE_BOX))(input)?;
    let (remain, (_, _, brand)) = tuple((be_u32, tag("ftyp"), be_u32))(remain)?;
    Ok((remain, FileFormat::Bmff(Brand::from(FourCC::from(brand)))))
}

impl TryFrom<&[u8]> for FileFormat {
    type Error = crate::Error;

    fn try_from(input: &[u8]) -> Result<Self, Self::Error> {
        let res: IResult<&[u8], FileFormat> = alt((
            map(tag(JPEG_SOI), |_| FileFormat::Jpeg),
            map(tag(PNG_SIGNATURE), |_| FileFormat::Png),
            parse_tiff,
            parse_ftyp,
        ))(input);
        match res {
            Ok((_, format)) => Ok(format),
            Err(_) => Err(crate::Error::UnrecognizedFileFormat),
        }
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case(&[0xff, 0xd8, 0xff, 0xe1, 0, 0], FileFormat::Jpeg)]
    #[test_case(&[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, 0, 0], FileFormat::Png)]
    #[test_case(b"II*\0\x08\0\0\0\x0e\0", FileFormat::Tiff(ImageType::Tiff))]
    #[test_case(b"MM\0*\0\0\0\x08", FileFormat::Tiff(ImageType::Tiff))]
    #[test_case(b"II*\0\x10\0\0\0CR\x02\0", FileFormat::Tiff(ImageType::Cr2))]
    #[test_case(b"\0\0\0\x18ftypheic\0\0\0\0", FileFormat::Bmff(Brand::Heic))]
    #[test_case(b"\0\0\0\x18ftypcrx \0\0\0\x01", FileFormat::Bmff(Brand::Crx))]
    #[test_case(b"\0\0\0\x0cJXL \x0d\x0a\x87\x0a\0\0\0\x14ftypjxl ", FileFormat::Bmff(Brand::Jxl))]
    fn sniff(input: &[u8], expected: FileFormat) {
        assert_eq!(FileFormat::try_from(input).unwrap(), expected);
    }

    #[test_case(b"")]
    #[test_case(b"GIF89a")]
    #[test_case(b"\xff\x0a")]
    #[test_case(b"\0\0\0\x18moov")]
    fn unrecognized(input: &[u8]) {
        assert!(matches!(
            FileFormat::try_from(input),
            Err(crate::Error::UnrecognizedFileFormat)
        ));
    }

    #[test]
    fn image_types() {
        assert_eq!(FileFormat::Bmff(Brand::Avif).image_type(), ImageType::Avif);
        assert_eq!(FileFormat::Bmff(Brand::Mp42).image_type(), ImageType::Unknown);
        assert_eq!(ImageType::Tiff.refine_tiff("NIKON CORPORATION"), ImageType::Nef);
        assert_eq!(ImageType::Tiff.refine_tiff("SONY"), ImageType::Arw);
        assert_eq!(ImageType::Cr2.refine_tiff("SONY"), ImageType::Cr2);
        assert_eq!(ImageType::Cr3.to_string(), "cr3");
    }
}
