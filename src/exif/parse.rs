use bytes::Bytes;

use super::{
    record::{DateField, Exif, ImageRange},
    tag::{IfdType, Tag, TagType},
    tags::{CanonTag, ExifTag, GpsTag},
    tz,
    value::{
        apex_to_exposure_time, apex_to_f_number, parse_exif_date, parse_focal_length,
        parse_gps_coord, parse_gps_timestamp, parse_rational_f64, parse_srational,
        parse_str_uint, parse_string, parse_subsec_ms, trim_nul, ExposureBias,
    },
};
use crate::{error::TiffError, Result};

/// SubIFD index holding the full-size JPEG of a raw file.
const JPG_FROM_RAW_INDEX: u8 = 2;

/// Writes the value of `tag` into `exif`.
///
/// `buf` holds the value bytes: the rebuilt value field of an embedded tag,
/// or the bytes read at `value_offset`. Unknown tags are ignored.
pub(crate) fn parse_tag(exif: &mut Exif, tag: &Tag, buf: &[u8]) -> Result<()> {
    match tag.ifd {
        IfdType::Root | IfdType::SubIfd => parse_ifd0_tag(exif, tag, buf),
        IfdType::Exif => parse_exif_tag(exif, tag, buf),
        IfdType::Thumbnail => parse_thumbnail_tag(exif, tag, buf),
        IfdType::Gps => parse_gps_tag(exif, tag, buf),
        IfdType::CanonMakerNote => parse_canon_tag(exif, tag, buf),
        _ => Ok(()),
    }
}

fn parse_ifd0_tag(exif: &mut Exif, tag: &Tag, buf: &[u8]) -> Result<()> {
    let Ok(id) = ExifTag::try_from(tag.id) else {
        return Ok(());
    };
    let is_root = tag.ifd == IfdType::Root;

    match id {
        ExifTag::Make => exif.make = parse_string(buf),
        ExifTag::Model => exif.model = parse_string(buf),
        ExifTag::Software => exif.software = parse_string(buf),
        ExifTag::Artist => exif.artist = parse_string(buf),
        ExifTag::Copyright => exif.copyright = parse_string(buf),
        ExifTag::Orientation => exif.orientation = uint(tag, buf)? as u16,
        ExifTag::ImageWidth if is_root => exif.image_width = uint(tag, buf)?,
        ExifTag::ImageLength if is_root => exif.image_height = uint(tag, buf)?,
        ExifTag::DateTime => exif.set_date(DateField::Modify, parse_exif_date(buf)?),
        ExifTag::XResolution if is_root => exif.x_resolution = rational(tag, buf)? as f32,
        ExifTag::YResolution if is_root => exif.y_resolution = rational(tag, buf)? as f32,
        ExifTag::ResolutionUnit if is_root => exif.resolution_unit = uint(tag, buf)? as u16,
        ExifTag::Rating => exif.rating = uint(tag, buf)? as u16,
        ExifTag::ApplicationNotes => exif.xmp = Some(Bytes::copy_from_slice(trim_nul(buf))),
        ExifTag::StripOffsets => image_range(exif, tag).offset = uint(tag, buf)?,
        ExifTag::StripByteCounts => image_range(exif, tag).length = uint(tag, buf)?,
        ExifTag::JpegInterchangeFormat => exif.thumbnail.offset = uint(tag, buf)?,
        ExifTag::JpegInterchangeFormatLength => exif.thumbnail.length = uint(tag, buf)?,
        _ => {}
    }
    Ok(())
}

/// IFD1 only describes the thumbnail, either as a JPEG or as strips.
fn parse_thumbnail_tag(exif: &mut Exif, tag: &Tag, buf: &[u8]) -> Result<()> {
    match ExifTag::try_from(tag.id) {
        Ok(ExifTag::JpegInterchangeFormat | ExifTag::StripOffsets) => {
            exif.thumbnail.offset = uint(tag, buf)?
        }
        Ok(ExifTag::JpegInterchangeFormatLength | ExifTag::StripByteCounts) => {
            exif.thumbnail.length = uint(tag, buf)?
        }
        _ => {}
    }
    Ok(())
}

/// Strip ranges are named after the directory holding them.
fn image_range<'a>(exif: &'a mut Exif, tag: &Tag) -> &'a mut ImageRange {
    match (tag.ifd, tag.ifd_index) {
        (IfdType::Root, _) => &mut exif.strip,
        (_, JPG_FROM_RAW_INDEX) => &mut exif.jpg_from_raw,
        _ => &mut exif.preview_image,
    }
}

fn parse_exif_tag(exif: &mut Exif, tag: &Tag, buf: &[u8]) -> Result<()> {
    let Ok(id) = ExifTag::try_from(tag.id) else {
        return Ok(());
    };

    match id {
        ExifTag::ExposureTime => exif.exposure_time = rational(tag, buf)? as f32,
        ExifTag::FNumber => exif.f_number = rational(tag, buf)? as f32,
        ExifTag::ShutterSpeedValue if exif.exposure_time == 0.0 => {
            exif.exposure_time = apex_to_exposure_time(rational(tag, buf)?) as f32
        }
        ExifTag::ApertureValue if exif.f_number == 0.0 => {
            exif.f_number = apex_to_f_number(rational(tag, buf)?) as f32
        }
        ExifTag::ExposureProgram => exif.exposure_program = uint(tag, buf)? as u16,
        ExifTag::IsoSpeedRatings => exif.iso = uint(tag, buf)?,
        ExifTag::DateTimeOriginal => {
            exif.set_date(DateField::Original, parse_exif_date(buf)?)
        }
        ExifTag::DateTimeDigitized => exif.set_date(DateField::Create, parse_exif_date(buf)?),
        ExifTag::SubSecTime => exif.set_subsec(DateField::Modify, parse_subsec_ms(buf)),
        ExifTag::SubSecTimeOriginal => {
            exif.set_subsec(DateField::Original, parse_subsec_ms(buf))
        }
        ExifTag::SubSecTimeDigitized => {
            exif.set_subsec(DateField::Create, parse_subsec_ms(buf))
        }
        ExifTag::OffsetTime => exif.set_offset(DateField::Modify, tz::parse_offset_time(buf)),
        ExifTag::OffsetTimeOriginal => {
            exif.set_offset(DateField::Original, tz::parse_offset_time(buf))
        }
        ExifTag::OffsetTimeDigitized => {
            exif.set_offset(DateField::Create, tz::parse_offset_time(buf))
        }
        ExifTag::TimeZoneOffset => {
            exif.time_zone_offset = tz::hours_zone(uint(tag, buf)? as u16 as i16)
        }
        ExifTag::ExposureBiasValue => {
            exif.exposure_bias = ExposureBias::from_rational(parse_srational(tag.byte_order, buf)?)
        }
        ExifTag::MeteringMode => exif.metering_mode = uint(tag, buf)? as u16,
        ExifTag::LightSource => exif.light_source = uint(tag, buf)? as u16,
        ExifTag::Flash => exif.flash = uint(tag, buf)? as u16,
        ExifTag::FocalLength => {
            exif.focal_length = parse_focal_length(tag.byte_order, buf, tag.tag_type)?
        }
        ExifTag::FocalLengthIn35mmFilm => exif.focal_length_in_35mm = uint(tag, buf)? as u16,
        ExifTag::SubjectDistance => exif.subject_distance = rational(tag, buf)? as f32,
        ExifTag::SubjectArea => exif.subject_area = shorts(tag, buf, 4)?,
        ExifTag::LensInfo => {
            for (i, v) in exif.lens_info.iter_mut().enumerate() {
                *v = rational(tag, buf.get(i * 8..).unwrap_or_default())? as f32;
            }
        }
        ExifTag::LensMake => exif.lens_make = parse_string(buf),
        ExifTag::LensModel => exif.lens_model = parse_string(buf),
        ExifTag::LensSerialNumber => exif.lens_serial = parse_string(buf),
        ExifTag::CameraOwnerName => exif.camera_owner = parse_string(buf),
        ExifTag::BodySerialNumber => exif.camera_serial = parse_string(buf),
        ExifTag::ImageUniqueId => exif.image_unique_id = parse_string(buf),
        ExifTag::ColorSpace => exif.color_space = uint(tag, buf)? as u16,
        ExifTag::ExposureMode => exif.exposure_mode = uint(tag, buf)? as u16,
        ExifTag::WhiteBalance => exif.white_balance = uint(tag, buf)? as u16,
        ExifTag::PixelXDimension => exif.image_width = uint(tag, buf)?,
        ExifTag::PixelYDimension => exif.image_height = uint(tag, buf)?,
        _ => {}
    }
    Ok(())
}

fn parse_gps_tag(exif: &mut Exif, tag: &Tag, buf: &[u8]) -> Result<()> {
    let Ok(id) = GpsTag::try_from(tag.id) else {
        return Ok(());
    };
    let gps = &mut exif.gps;
    let bo = tag.byte_order;

    match id {
        GpsTag::LatitudeRef => gps.set_south(buf.first() == Some(&b'S')),
        GpsTag::LongitudeRef => gps.set_west(buf.first() == Some(&b'W')),
        GpsTag::AltitudeRef => gps.set_below_sea_level(buf.first() == Some(&1)),
        GpsTag::Latitude => gps.set_latitude(parse_gps_coord(bo, buf, tag.tag_type)?),
        GpsTag::Longitude => gps.set_longitude(parse_gps_coord(bo, buf, tag.tag_type)?),
        GpsTag::Altitude => gps.set_altitude(rational(tag, buf)? as f32),
        GpsTag::TimeStamp => gps.set_time(parse_gps_timestamp(bo, buf, tag.tag_type)?),
        GpsTag::DateStamp => {
            let b = trim_nul(buf);
            if b.len() < 10 || b[4] != b':' || b[7] != b':' {
                return Err(TiffError::InvalidValue("malformed gps date".to_owned()).into());
            }
            gps.set_date(
                parse_str_uint(&b[0..4]),
                parse_str_uint(&b[5..7]),
                parse_str_uint(&b[8..10]),
            );
        }
        GpsTag::ImgDirection => gps.set_img_direction(rational(tag, buf)? as f32),
        GpsTag::Speed => gps.set_speed(rational(tag, buf)? as f32),
        _ => {}
    }
    Ok(())
}

/// Canon values only fill fields the standard IFDs left empty.
fn parse_canon_tag(exif: &mut Exif, tag: &Tag, buf: &[u8]) -> Result<()> {
    let Ok(id) = CanonTag::try_from(tag.id) else {
        return Ok(());
    };

    match id {
        CanonTag::SerialNumber if exif.camera_serial.is_empty() => {
            let serial = uint(tag, buf)?;
            if serial != 0 {
                exif.camera_serial = serial.to_string();
            }
        }
        CanonTag::LensModel if exif.lens_model.is_empty() => {
            exif.lens_model = parse_string(buf)
        }
        CanonTag::OwnerName if exif.camera_owner.is_empty() => {
            exif.camera_owner = parse_string(buf)
        }
        _ => {}
    }
    Ok(())
}

fn too_short(tag: &Tag) -> TiffError {
    TiffError::InvalidValue(format!("value of tag 0x{:04x} is truncated", tag.id))
}

/// First element of an integer field.
fn uint(tag: &Tag, buf: &[u8]) -> Result<u32> {
    let bo = tag.byte_order;
    let need = match tag.tag_type {
        TagType::Byte | TagType::SByte | TagType::Undefined => 1,
        TagType::Short | TagType::SShort => 2,
        TagType::Long | TagType::SLong | TagType::Ifd => 4,
        other => {
            return Err(TiffError::InvalidValue(format!(
                "tag 0x{:04x} of type {other:?} is not an integer",
                tag.id
            ))
            .into())
        }
    };
    let b = buf.get(..need).ok_or_else(|| too_short(tag))?;
    Ok(match need {
        1 => b[0] as u32,
        2 => bo.u16(b) as u32,
        _ => bo.u32(b),
    })
}

/// A rational of either signedness, or a plain integer.
fn rational(tag: &Tag, buf: &[u8]) -> Result<f64> {
    match tag.tag_type {
        TagType::Rational | TagType::SRational => {
            parse_rational_f64(tag.byte_order, buf, tag.tag_type)
        }
        _ => uint(tag, buf).map(|v| v as f64),
    }
}

fn shorts(tag: &Tag, buf: &[u8], max: usize) -> Result<Vec<u16>> {
    if !matches!(tag.tag_type, TagType::Short | TagType::SShort) {
        return Err(too_short(tag).into());
    }
    let count = (tag.unit_count as usize).min(max);
    let b = buf.get(..count * 2).ok_or_else(|| too_short(tag))?;
    Ok(b.chunks_exact(2).map(|c| tag.byte_order.u16(c)).collect())
}
