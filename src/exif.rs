//! TIFF/Exif decoding: header scanning, forward-only IFD reading and the
//! [`Exif`] accumulator.

pub use endian::{binary_order, ByteOrder};
pub use gps::GpsInfo;
pub use header::{scan_tiff, ExifHeader};
pub use queue::{TagQueue, QUEUE_CAPACITY};
pub use reader::{IfdReader, MakerNoteHandler};
pub use record::{DateField, Exif, ImageRange};
pub use tag::{Ifd, IfdType, Tag, TagType, MAX_SUB_IFDS};
pub use tags::{CanonTag, ExifTag, GpsTag};
pub use tz::{fixed_zone, parse_offset_time};
pub use value::{
    apex_to_exposure_time, apex_to_f_number, parse_exif_date, parse_focal_length,
    parse_gps_coord, parse_gps_timestamp, parse_rational, parse_srational, parse_str_uint,
    trim_nul, ExposureBias, IRational, Rational, URational,
};

pub(crate) use header::strip_exif_prefix;
pub(crate) use reader::decode;

mod endian;
mod gps;
mod header;
mod parse;
mod queue;
mod reader;
mod record;
mod tag;
mod tags;
mod tz;
mod value;
