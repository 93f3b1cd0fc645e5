//! exifscan is a streaming Exif/XMP/preview extractor written in pure Rust
//! with [nom](https://github.com/rust-bakery/nom). It reads JPEG, TIFF and
//! the raw formats built on it (cr2/nef/arw/dng), PNG, and ISOBMFF image
//! containers (heic/heif/avif/cr3).
//!
//! ## Key Features
//!
//! - Forward-only: the input is never read backwards. TIFF values living
//!   outside their IFD entry are queued and read in file order, and ISOBMFF
//!   boxes are walked through bounded views nested over a single buffered
//!   reader. Any [`Read`] works; readers that are also `Seek` skip large
//!   runs of bytes by seeking.
//!
//! - Callback driven ISOBMFF scanning: [`BmffReader`] hands each Exif, XMP
//!   or preview payload to a callback together with a reader bounded to
//!   that payload, and stops as soon as every registered callback has been
//!   served.
//!
//! - Bounded work: IFD sizes, HEIF item tables, nesting depth and peeks are
//!   all capped, so hostile input fails fast instead of allocating.
//!
//! ## Usage
//!
//! Detect the container and extract everything in one go with
//! [`MetadataReader`]:
//!
//! ```rust
//! use exifscan::{ImageType, MetadataReader};
//! use std::io::Cursor;
//!
//! // a little-endian TIFF with a single Make tag
//! let tiff = [
//!     0x49, 0x49, 0x2A, 0x00, 0x08, 0x00, 0x00, 0x00, 0x01, 0x00, 0x0F, 0x01, 0x02, 0x00,
//!     0x06, 0x00, 0x00, 0x00, 0x1A, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x43, 0x61,
//!     0x6E, 0x6F, 0x6E, 0x00,
//! ];
//! let meta = MetadataReader::new().read(Cursor::new(tiff))?;
//! assert_eq!(meta.image_type, ImageType::Tiff);
//! assert_eq!(meta.exif.unwrap().make, "Canon");
//! # Ok::<(), exifscan::Error>(())
//! ```
//!
//! [`parse`] finds the first TIFF header in any stream and decodes it:
//!
//! ```rust
//! let buf = [
//!     0x4D, 0x4D, 0x00, 0x2A, 0x00, 0x00, 0x00, 0x08, 0x00, 0x01, 0x01, 0x12, 0x00, 0x03,
//!     0x00, 0x00, 0x00, 0x01, 0x00, 0x06, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
//! ];
//! let exif = exifscan::parse(&buf[..])?;
//! assert_eq!(exif.orientation, 6);
//! # Ok::<(), exifscan::Error>(())
//! ```
//!
//! Lower level building blocks are public too: [`IfdReader`] decodes a TIFF
//! structure from any [`ByteSource`], [`BmffReader`] walks ISOBMFF boxes,
//! and [`evaluate_xpacket_header`](xmp::evaluate_xpacket_header) inspects an
//! XMP packet.

use std::io::Read;

pub use bmff::{BmffReader, FileTypeBox, MetadataFlags};
pub use error::{BmffError, Error, TiffError};
pub use exif::{
    ByteOrder, DateField, Exif, ExifHeader, ExifTag, GpsInfo, IfdReader, IfdType, ImageRange,
};
pub use file::{FileFormat, ImageType};
pub use parser::{Metadata, MetadataReader, Preview};
pub use preview::{PreviewHeader, PreviewSource};
pub use skip::{Seekable, Skip, Unseekable};
pub use source::{ByteSource, SliceSource, Source};
pub use xmp::XPacketHeader;

pub type Result<T> = std::result::Result<T, Error>;

pub mod bmff;
pub mod error;
pub mod exif;
pub mod file;
pub mod preview;
pub mod source;
pub mod xmp;

mod buffer;
mod jpeg;
mod parser;
mod png;
mod skip;

#[cfg(test)]
mod testkit;

/// Bounds applied while scanning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanOptions {
    /// IFDs declaring more entries are rejected.
    pub max_ifd_tags: u16,
    /// Cap of every HEIF item table (`infe`, `iloc`, `iref`, `ipco`,
    /// `ipma`).
    pub max_items: usize,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            max_ifd_tags: 256,
            max_items: 4096,
        }
    }
}

/// Decodes the first TIFF structure found in `reader`.
///
/// Bytes in front of the TIFF signature are skipped, so a JPEG APP1 payload
/// or a raw file both work. Values decoded before the input runs out are
/// returned; [`Error::NoExif`] means no TIFF header was found at all.
#[tracing::instrument(skip_all)]
pub fn parse<R: Read>(reader: R) -> Result<Exif> {
    let mut src = Source::unseekable(reader);
    let mut header = exif::scan_tiff(&mut src, ImageType::Unknown)?;
    if header.tiff_header_offset == 0 {
        header.image_type = ImageType::Tiff;
    }
    exif::decode(&mut src, &header)
}
