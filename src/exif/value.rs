use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, NaiveDate, Utc};

use super::{endian::ByteOrder, tag::TagType};
use crate::{error::TiffError, Result};

pub type URational = Rational<u32>;
pub type IRational = Rational<i32>;

/// `numerator / denominator` as stored in a TIFF rational field.
#[cfg_attr(feature = "json_dump", derive(serde::Serialize))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct Rational<T>(pub T, pub T);

impl<T> Rational<T>
where
    T: Copy + Into<f64>,
{
    /// A zero denominator yields 0.
    pub fn as_float(&self) -> f64 {
        let den: f64 = self.1.into();
        if den == 0.0 {
            return 0.0;
        }
        self.0.into() / den
    }
}

impl<T: Display> Display for Rational<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.0, self.1)
    }
}

impl<T> From<(T, T)> for Rational<T> {
    fn from(value: (T, T)) -> Self {
        Self(value.0, value.1)
    }
}

fn need(buf: &[u8], n: usize) -> Result<&[u8]> {
    buf.get(..n).ok_or_else(|| {
        TiffError::InvalidValue(format!("need {n} bytes, got {}", buf.len())).into()
    })
}

pub fn parse_rational(bo: ByteOrder, buf: &[u8]) -> Result<URational> {
    let buf = need(buf, 8)?;
    Ok(Rational(bo.u32(buf), bo.u32(&buf[4..])))
}

pub fn parse_srational(bo: ByteOrder, buf: &[u8]) -> Result<IRational> {
    let buf = need(buf, 8)?;
    Ok(Rational(bo.i32(buf), bo.i32(&buf[4..])))
}

/// Decodes a rational as a float. Some cameras write signed rationals into
/// unsigned fields, so the signedness follows the declared tag type.
pub fn parse_rational_f64(bo: ByteOrder, buf: &[u8], tag_type: TagType) -> Result<f64> {
    if tag_type == TagType::SRational {
        Ok(parse_srational(bo, buf)?.as_float())
    } else {
        Ok(parse_rational(bo, buf)?.as_float())
    }
}

/// Short and long produce `n/1`; rationals produce `n/d`.
pub fn parse_focal_length(bo: ByteOrder, buf: &[u8], tag_type: TagType) -> Result<f32> {
    let v = match tag_type {
        TagType::Short => need(buf, 2).map(|b| bo.u16(b) as f64)?,
        TagType::Long => need(buf, 4).map(|b| bo.u32(b) as f64)?,
        TagType::Rational | TagType::SRational => parse_rational_f64(bo, buf, tag_type)?,
        other => {
            return Err(TiffError::InvalidValue(format!("focal length of type {other:?}")).into())
        }
    };
    Ok(v as f32)
}

/// Parses the fixed `YYYY:MM:DD HH:MM:SS` form. The result is UTC; offsets
/// are applied by the caller.
pub fn parse_exif_date(buf: &[u8]) -> Result<DateTime<Utc>> {
    let invalid = || TiffError::InvalidValue("malformed exif date".to_owned());
    let b = buf.get(..19).ok_or_else(invalid)?;
    if b[4] != b':' || b[7] != b':' || b[10] != b' ' || b[13] != b':' || b[16] != b':' {
        return Err(invalid().into());
    }

    let year = parse_str_uint(&b[0..4]);
    let month = parse_str_uint(&b[5..7]);
    let day = parse_str_uint(&b[8..10]);
    let hour = parse_str_uint(&b[11..13]);
    let min = parse_str_uint(&b[14..16]);
    let sec = parse_str_uint(&b[17..19]);

    let dt = NaiveDate::from_ymd_opt(year as i32, month, day)
        .and_then(|d| d.and_hms_opt(hour, min, sec))
        .ok_or_else(invalid)?;
    Ok(dt.and_utc())
}

/// Fractional seconds from a `SubSecTime*` string, in milliseconds. "5"
/// means 500ms, "0123" means 12ms.
pub fn parse_subsec_ms(buf: &[u8]) -> u16 {
    let digits = trim_nul(buf)
        .iter()
        .skip_while(|b| **b == b' ')
        .take_while(|b| b.is_ascii_digit());
    let mut ms = 0u16;
    let mut scale = 100u16;
    for d in digits.take(3) {
        ms += (d - b'0') as u16 * scale;
        scale /= 10;
    }
    ms
}

/// `degrees + minutes/60 + seconds/3600`; a zero denominator drops that
/// component.
pub fn parse_gps_coord(bo: ByteOrder, buf: &[u8], tag_type: TagType) -> Result<f64> {
    let buf = need(buf, 24)?;
    let d = parse_rational_f64(bo, buf, tag_type)?;
    let m = parse_rational_f64(bo, &buf[8..], tag_type)?;
    let s = parse_rational_f64(bo, &buf[16..], tag_type)?;
    Ok(d + m / 60.0 + s / 3600.0)
}

/// Hours, minutes and seconds combined into seconds of the day.
pub fn parse_gps_timestamp(bo: ByteOrder, buf: &[u8], tag_type: TagType) -> Result<u32> {
    let buf = need(buf, 24)?;
    let h = parse_rational_f64(bo, buf, tag_type)?;
    let m = parse_rational_f64(bo, &buf[8..], tag_type)?;
    let s = parse_rational_f64(bo, &buf[16..], tag_type)?;
    let total = h * 3600.0 + m * 60.0 + s;
    if !(0.0..=u32::MAX as f64).contains(&total) {
        return Err(TiffError::InvalidValue(format!("gps time {total}")).into());
    }
    Ok(total as u32)
}

/// Right-trims NUL, space and newline bytes.
pub fn trim_nul(buf: &[u8]) -> &[u8] {
    let end = buf
        .iter()
        .rposition(|b| !matches!(b, 0 | b' ' | b'\n'))
        .map_or(0, |i| i + 1);
    &buf[..end]
}

/// Decodes ASCII digits permissively: bytes below `'0'` are skipped, every
/// other byte is accumulated as a digit.
pub fn parse_str_uint(buf: &[u8]) -> u32 {
    buf.iter().filter(|b| **b >= b'0').fold(0u32, |acc, b| {
        acc.wrapping_mul(10).wrapping_add((b - b'0') as u32)
    })
}

pub fn parse_string(buf: &[u8]) -> String {
    String::from_utf8_lossy(trim_nul(buf)).into_owned()
}

/// Shutter speed APEX value to exposure time in seconds.
pub fn apex_to_exposure_time(v: f64) -> f64 {
    (-v).exp2()
}

/// Aperture APEX value to f-number.
pub fn apex_to_f_number(v: f64) -> f64 {
    (v / 2.0).exp2()
}

/// Exposure compensation in EV, kept as a small fraction (`+1/3`, `-2/3`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct ExposureBias {
    n: i8,
    d: u8,
}

impl ExposureBias {
    pub fn new(numerator: i8, denominator: u8) -> Self {
        Self {
            n: numerator,
            d: denominator,
        }
    }

    /// Builds a bias from an arbitrary signed rational, reducing it and
    /// falling back to sixths of a stop when it does not fit.
    pub fn from_rational(r: IRational) -> Self {
        let Rational(mut n, mut d) = r;
        if d == 0 {
            return Self::default();
        }
        if d < 0 {
            n = n.wrapping_neg();
            d = d.wrapping_neg();
        }
        let g = gcd(n.unsigned_abs(), d as u32).max(1) as i32;
        let (n, d) = (n / g, d / g);
        match (i8::try_from(n), u8::try_from(d)) {
            (Ok(n), Ok(d)) => Self::new(n, d),
            _ => {
                let sixths = (r.as_float() * 6.0).round().clamp(-127.0, 127.0) as i8;
                Self::new(sixths, 6)
            }
        }
    }

    pub fn numerator(self) -> i8 {
        self.n
    }

    pub fn denominator(self) -> u8 {
        self.d
    }

    pub fn as_float(self) -> f32 {
        if self.d == 0 {
            return 0.0;
        }
        self.n as f32 / self.d as f32
    }
}

fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

impl Display for ExposureBias {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.n == 0 {
            write!(f, "0/{}", self.d)
        } else {
            write!(f, "{:+}/{}", self.n, self.d)
        }
    }
}

impl FromStr for ExposureBias {
    type Err = crate::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let invalid = || crate::Error::from(format!("invalid exposure bias {s:?}"));
        let (n, d) = s.trim().split_once('/').ok_or_else(invalid)?;
        let n = n.parse::<i8>().map_err(|_| invalid())?;
        let d = d.parse::<u8>().map_err(|_| invalid())?;
        Ok(Self::new(n, d))
    }
}

#[cfg(feature = "json_dump")]
impl serde::Serialize for ExposureBias {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
