use chrono::{DateTime, NaiveDate, Utc};

const SOUTH: u8 = 1;
const WEST: u8 = 1 << 1;
const BELOW_SEA_LEVEL: u8 = 1 << 2;

/// GPS position and time.
///
/// Values are stored unsigned as written; the reference flags are applied by
/// the accessors.
#[cfg_attr(feature = "json_dump", derive(serde::Serialize))]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GpsInfo {
    latitude: f64,
    longitude: f64,
    altitude: f32,
    img_direction: f32,
    speed: f32,
    /// `[months since year 0, day of month]`
    date: [u16; 2],
    /// Seconds of the day (UTC).
    time: u32,
    refs: u8,
}

impl GpsInfo {
    /// Signed latitude in degrees, negative in the southern hemisphere.
    pub fn latitude(&self) -> f64 {
        if self.refs & SOUTH != 0 {
            -self.latitude
        } else {
            self.latitude
        }
    }

    /// Signed longitude in degrees, negative west of Greenwich.
    pub fn longitude(&self) -> f64 {
        if self.refs & WEST != 0 {
            -self.longitude
        } else {
            self.longitude
        }
    }

    /// Altitude in meters, negative below sea level.
    pub fn altitude(&self) -> f32 {
        if self.refs & BELOW_SEA_LEVEL != 0 {
            -self.altitude
        } else {
            self.altitude
        }
    }

    pub fn img_direction(&self) -> f32 {
        self.img_direction
    }

    pub fn speed(&self) -> f32 {
        self.speed
    }

    pub fn date(&self) -> Option<NaiveDate> {
        let [months, day] = self.date;
        if months == 0 && day == 0 {
            return None;
        }
        NaiveDate::from_ymd_opt((months / 12) as i32, (months % 12) as u32 + 1, day as u32)
    }

    /// Seconds of the day.
    pub fn time(&self) -> u32 {
        self.time
    }

    pub fn date_time(&self) -> Option<DateTime<Utc>> {
        let dt = self
            .date()?
            .and_hms_opt(self.time / 3600, self.time / 60 % 60, self.time % 60)?;
        Some(dt.and_utc())
    }

    pub fn has_position(&self) -> bool {
        self.latitude != 0.0 || self.longitude != 0.0
    }

    /// Returns an ISO 6709 point such as `+48.85770+002.29500+35.000/`.
    pub fn to_iso6709(&self) -> String {
        let lat = self.latitude();
        let lon = self.longitude();
        let mut s = format!(
            "{}{:08.5}{}{:09.5}",
            if lat < 0.0 { '-' } else { '+' },
            lat.abs(),
            if lon < 0.0 { '-' } else { '+' },
            lon.abs(),
        );
        if self.altitude != 0.0 {
            let alt = self.altitude();
            s.push_str(&format!(
                "{}{:.3}",
                if alt < 0.0 { '-' } else { '+' },
                alt.abs()
            ));
        }
        s.push('/');
        s
    }

    pub(crate) fn set_latitude(&mut self, v: f64) {
        self.latitude = v.abs();
    }

    pub(crate) fn set_longitude(&mut self, v: f64) {
        self.longitude = v.abs();
    }

    pub(crate) fn set_altitude(&mut self, v: f32) {
        self.altitude = v.abs();
    }

    pub(crate) fn set_img_direction(&mut self, v: f32) {
        self.img_direction = v;
    }

    pub(crate) fn set_speed(&mut self, v: f32) {
        self.speed = v;
    }

    pub(crate) fn set_time(&mut self, seconds: u32) {
        self.time = seconds;
    }

    pub(crate) fn set_date(&mut self, year: u32, month: u32, day: u32) {
        if !(1..=12).contains(&month) || day > 31 {
            return;
        }
        let months = year.checked_mul(12).map(|m| m.saturating_add(month - 1));
        if let Some(months) = months.and_then(|m| u16::try_from(m).ok()) {
            self.date = [months, day as u16];
        }
    }

    pub(crate) fn set_south(&mut self, on: bool) {
        self.set_flag(SOUTH, on);
    }

    pub(crate) fn set_west(&mut self, on: bool) {
        self.set_flag(WEST, on);
    }

    pub(crate) fn set_below_sea_level(&mut self, on: bool) {
        self.set_flag(BELOW_SEA_LEVEL, on);
    }

    fn set_flag(&mut self, flag: u8, on: bool) {
        if on {
            self.refs |= flag;
        } else {
            self.refs &= !flag;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gps_iso6709() {
        let mut palace = GpsInfo::default();
        palace.set_latitude(39.0 + 55.0 / 60.0);
        palace.set_longitude(116.0 + 23.0 / 60.0 + 27.0 / 3600.0);
        assert_eq!(palace.to_iso6709(), "+39.91667+116.39083/");

        let mut liberty = GpsInfo::default();
        liberty.set_latitude(40.0 + 41.0 / 60.0 + 21.0 / 3600.0);
        liberty.set_longitude(74.0 + 2.0 / 60.0 + 40.0 / 3600.0);
        liberty.set_west(true);
        liberty.set_altitude(93.5);
        assert_eq!(liberty.to_iso6709(), "+40.68917-074.04444+93.500/");
    }

    #[test]
    fn refs_sign_values() {
        let mut g = GpsInfo::default();
        g.set_latitude(33.5);
        g.set_longitude(70.25);
        g.set_altitude(12.0);
        g.set_south(true);
        g.set_west(true);
        g.set_below_sea_level(true);
        assert_eq!(g.latitude(), -33.5);
        assert_eq!(g.longitude(), -70.25);
        assert_eq!(g.altitude(), -12.0);

        g.set_south(false);
        assert_eq!(g.latitude(), 33.5);
    }

    #[test]
    fn date_time() {
        let mut g = GpsInfo::default();
        assert!(g.date().is_none());
        g.set_date(2024, 2, 29);
        g.set_time(13 * 3600 + 5 * 60 + 9);
        assert_eq!(g.date(), NaiveDate::from_ymd_opt(2024, 2, 29));
        assert_eq!(
            g.date_time().unwrap().to_rfc3339(),
            "2024-02-29T13:05:09+00:00"
        );

        g.set_date(2024, 13, 1);
        assert_eq!(g.date(), NaiveDate::from_ymd_opt(2024, 2, 29));
    }
}
