use bytes::Bytes;
use chrono::{DateTime, Duration, FixedOffset, TimeZone, Utc};

use super::{gps::GpsInfo, value::ExposureBias};
use crate::file::ImageType;

/// Byte range of an embedded image, relative to the TIFF base.
#[cfg_attr(feature = "json_dump", derive(serde::Serialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImageRange {
    pub offset: u32,
    pub length: u32,
}

impl ImageRange {
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }
}

/// Which of the three Exif timestamps to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateField {
    /// `DateTime` of IFD0.
    Modify,
    /// `DateTimeOriginal`.
    Original,
    /// `DateTimeDigitized`.
    Create,
}

/// Decoded Exif fields, accumulated over every IFD of a scan.
///
/// Fields left at their zero value were absent or failed to parse.
#[cfg_attr(feature = "json_dump", derive(serde::Serialize))]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Exif {
    pub image_type: ImageType,
    pub make: String,
    pub model: String,
    pub software: String,
    pub artist: String,
    pub copyright: String,
    pub camera_owner: String,
    pub camera_serial: String,
    pub lens_make: String,
    pub lens_model: String,
    pub lens_serial: String,
    /// Min/max focal length, then the min f-number at each.
    pub lens_info: [f32; 4],
    pub image_unique_id: String,

    pub orientation: u16,
    pub image_width: u32,
    pub image_height: u32,
    pub x_resolution: f32,
    pub y_resolution: f32,
    pub resolution_unit: u16,
    pub rating: u16,

    pub exposure_program: u16,
    pub exposure_mode: u16,
    pub metering_mode: u16,
    pub light_source: u16,
    pub flash: u16,
    pub white_balance: u16,
    pub color_space: u16,
    pub exposure_bias: ExposureBias,
    /// Seconds.
    pub exposure_time: f32,
    pub f_number: f32,
    /// Millimeters.
    pub focal_length: f32,
    pub focal_length_in_35mm: u16,
    pub iso: u32,
    /// Meters.
    pub subject_distance: f32,
    pub subject_area: Vec<u16>,

    pub gps: GpsInfo,

    /// IFD1 thumbnail.
    pub thumbnail: ImageRange,
    /// Full-size JPEG of a raw file (SubIFD 2).
    pub jpg_from_raw: ImageRange,
    pub preview_image: ImageRange,
    /// First strip of IFD0.
    pub strip: ImageRange,

    /// XMP packet embedded in IFD0 `ApplicationNotes`.
    pub xmp: Option<Bytes>,

    pub(crate) modify_date: Option<DateTime<Utc>>,
    pub(crate) date_time_original: Option<DateTime<Utc>>,
    pub(crate) create_date: Option<DateTime<Utc>>,
    pub(crate) subsec_modify_ms: u16,
    pub(crate) subsec_original_ms: u16,
    pub(crate) subsec_create_ms: u16,

    #[cfg_attr(feature = "json_dump", serde(skip))]
    pub(crate) offset_time: Option<FixedOffset>,
    #[cfg_attr(feature = "json_dump", serde(skip))]
    pub(crate) offset_time_original: Option<FixedOffset>,
    #[cfg_attr(feature = "json_dump", serde(skip))]
    pub(crate) offset_time_digitized: Option<FixedOffset>,
    #[cfg_attr(feature = "json_dump", serde(skip))]
    pub(crate) time_zone_offset: Option<FixedOffset>,
}

impl Exif {
    /// `DateTime` plus `SubSecTime`. The clock time is the camera's, tagged
    /// as UTC.
    pub fn modify_date(&self) -> Option<DateTime<Utc>> {
        self.date_time(DateField::Modify)
    }

    /// `DateTimeOriginal` plus `SubSecTimeOriginal`.
    pub fn date_time_original(&self) -> Option<DateTime<Utc>> {
        self.date_time(DateField::Original)
    }

    /// `DateTimeDigitized` plus `SubSecTimeDigitized`.
    pub fn create_date(&self) -> Option<DateTime<Utc>> {
        self.date_time(DateField::Create)
    }

    pub fn date_time(&self, which: DateField) -> Option<DateTime<Utc>> {
        let (dt, ms) = match which {
            DateField::Modify => (self.modify_date, self.subsec_modify_ms),
            DateField::Original => (self.date_time_original, self.subsec_original_ms),
            DateField::Create => (self.create_date, self.subsec_create_ms),
        };
        dt.map(|dt| dt + Duration::milliseconds(ms as i64))
    }

    /// Offset recorded for a timestamp: the matching `OffsetTime*` tag, else
    /// the camera's `TimeZoneOffset`.
    pub fn offset(&self, which: DateField) -> Option<FixedOffset> {
        let specific = match which {
            DateField::Modify => self.offset_time,
            DateField::Original => self.offset_time_original,
            DateField::Create => self.offset_time_digitized,
        };
        specific.or(self.time_zone_offset)
    }

    /// The timestamp read as wall-clock time in its recorded offset.
    pub fn date_time_with_offset(&self, which: DateField) -> Option<DateTime<FixedOffset>> {
        let dt = self.date_time(which)?;
        let tz = self.offset(which)?;
        tz.from_local_datetime(&dt.naive_utc()).single()
    }

    pub(crate) fn set_date(&mut self, which: DateField, dt: DateTime<Utc>) {
        match which {
            DateField::Modify => self.modify_date = Some(dt),
            DateField::Original => self.date_time_original = Some(dt),
            DateField::Create => self.create_date = Some(dt),
        }
    }

    pub(crate) fn set_subsec(&mut self, which: DateField, ms: u16) {
        match which {
            DateField::Modify => self.subsec_modify_ms = ms,
            DateField::Original => self.subsec_original_ms = ms,
            DateField::Create => self.subsec_create_ms = ms,
        }
    }

    pub(crate) fn set_offset(&mut self, which: DateField, tz: Option<FixedOffset>) {
        match which {
            DateField::Modify => self.offset_time = tz,
            DateField::Original => self.offset_time_original = tz,
            DateField::Create => self.offset_time_digitized = tz,
        }
    }
}
