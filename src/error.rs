use std::{io, string::FromUtf8Error};
use thiserror::Error;

use crate::bmff::FourCC;

type FallbackError = Box<dyn std::error::Error + Send + Sync>;

/// Errors surfaced by a scan. The variant identifies the boundary the error
/// came from (TIFF, BMFF, callback, the underlying reader).
#[derive(Debug, Error)]
pub enum Error {
    /// End of input, or a callback asking the scan to stop.
    #[error("end of input")]
    Eof,

    #[error("no exif data found")]
    NoExif,

    #[error("unrecognized file format")]
    UnrecognizedFileFormat,

    #[error("tiff: {0}")]
    Tiff(#[from] TiffError),

    #[error("bmff: {0}")]
    Bmff(#[from] BmffError),

    #[error("callback failed; {0}")]
    Callback(FallbackError),

    #[error("parse failed; {0}")]
    ParseFailed(FallbackError),

    #[error("io error; {0}")]
    Io(io::Error),
}

impl Error {
    /// Returns true for end-of-input, the signal that terminates iteration.
    pub fn is_eof(&self) -> bool {
        matches!(self, Error::Eof)
    }

    /// Wraps an arbitrary error returned from a caller-supplied callback.
    pub fn callback<E>(e: E) -> Error
    where
        E: Into<FallbackError>,
    {
        Error::Callback(e.into())
    }
}

/// Errors raised while decoding TIFF headers and image file directories.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TiffError {
    #[error("invalid tiff signature")]
    InvalidSignature,

    #[error("ifd has too many tags ({0})")]
    TooManyTags(u16),

    #[error("invalid tag type {1} for tag 0x{0:04x}")]
    InvalidTagType(u16, u16),

    #[error("cannot seek backwards from {pos} to {offset}")]
    BackwardSeek { pos: u32, offset: u32 },

    #[error("read of {need} bytes exceeds exif length {limit}")]
    ExifLengthExceeded { need: u32, limit: u32 },

    #[error("ifd nesting is too deep")]
    TooDeep,

    #[error("invalid value; {0}")]
    InvalidValue(String),
}

/// Errors raised while walking ISOBMFF boxes and the HEIF item graph.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BmffError {
    #[error("box size {size} smaller than header size {header}")]
    SizeTooSmall { size: u64, header: u64 },

    #[error("box size 0 (extends to end of file) is not supported")]
    SizeToEof,

    #[error("box is too large: {0}")]
    TooLarge(u64),

    #[error("insufficient length; need {need}, remain {remain}")]
    InsufficientLength { need: u64, remain: u64 },

    #[error("unexpected box '{0}'")]
    UnexpectedBox(FourCC),

    #[error("unsupported {0} version {1}")]
    UnsupportedVersion(FourCC, u8),

    #[error("unsupported integer size {0}")]
    UnsupportedIntSize(u8),

    #[error("c-string exceeds {0} bytes")]
    CStringTooLong(usize),

    #[error("unsupported construction method ({0})")]
    UnsupportedConstructionMethod(u8),

    #[error("external data reference ({0}) is not supported")]
    ExternalDataReference(u16),

    #[error("item offset overflow")]
    OffsetOverflow,

    #[error("item extent lies outside of its container")]
    OutOfBounds,

    #[error("invalid box; {0}")]
    Invalid(String),
}

use Error::*;

impl From<io::Error> for Error {
    fn from(value: io::Error) -> Self {
        if value.kind() == io::ErrorKind::UnexpectedEof {
            Eof
        } else {
            Io(value)
        }
    }
}

impl From<String> for Error {
    fn from(src: String) -> Error {
        ParseFailed(src.into())
    }
}

impl From<&str> for Error {
    fn from(src: &str) -> Error {
        src.to_string().into()
    }
}

impl From<FromUtf8Error> for Error {
    fn from(value: FromUtf8Error) -> Self {
        ParseFailed(value.into())
    }
}

impl From<nom::Err<nom::error::Error<&[u8]>>> for crate::Error {
    fn from(e: nom::Err<nom::error::Error<&[u8]>>) -> Self {
        convert_parse_error(e, "")
    }
}

pub(crate) fn convert_parse_error(e: nom::Err<nom::error::Error<&[u8]>>, message: &str) -> Error {
    let s = match e {
        nom::Err::Incomplete(_) => return Eof,
        nom::Err::Error(e) => format!("{}; {message}", e.code.description()),
        nom::Err::Failure(e) => format!("{}; {message}", e.code.description()),
    };

    s.into()
}

/// Maps a crate error back into an `io::Error`, so byte sources can be used
/// through `std::io::Read`.
pub(crate) fn into_io_error(e: Error) -> io::Error {
    match e {
        Eof => io::ErrorKind::UnexpectedEof.into(),
        Io(e) => e,
        other => io::Error::other(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unexpected_eof_is_eof() {
        let e: Error = io::Error::from(io::ErrorKind::UnexpectedEof).into();
        assert!(e.is_eof());

        let e: Error = io::Error::from(io::ErrorKind::PermissionDenied).into();
        assert!(!e.is_eof());
        assert!(matches!(e, Error::Io(_)));
    }

    #[test]
    fn boundary_is_visible() {
        let e: Error = TiffError::TooManyTags(300).into();
        assert_eq!(e.to_string(), "tiff: ifd has too many tags (300)");

        let e: Error = BmffError::UnsupportedConstructionMethod(2).into();
        assert_eq!(e.to_string(), "bmff: unsupported construction method (2)");
    }

    #[test]
    fn incomplete_nom_error_is_eof() {
        let e: nom::Err<nom::error::Error<&[u8]>> = nom::Err::Incomplete(nom::Needed::new(4));
        assert!(Error::from(e).is_eof());
    }
}
