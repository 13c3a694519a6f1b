//! Sun and moon positions for a viewpoint.

use std::f64::consts::PI;

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate};
use gmp_core::{classify_observing_window, MoonStatus, ObservingWindow, SunEvents};

/// Zenith of the sun's upper limb at sunrise/sunset, refraction included.
const SUNRISE_ZENITH: f64 = 90.833;
/// Sun 18° below the horizon.
const ASTRONOMICAL_ZENITH: f64 = 108.0;

const SYNODIC_MONTH_DAYS: f64 = 29.530_588_853;
/// Julian day of the new moon of 2000-01-06 18:14 UTC.
const REFERENCE_NEW_MOON_JD: f64 = 2_451_550.26;
const UNIX_EPOCH_JD: f64 = 2_440_587.5;

pub trait AstronomyProvider: Send + Sync {
    /// `None` when the sun does not rise or set on `date` (polar day or night).
    fn sun_events(&self, lat: f64, lon: f64, date: NaiveDate) -> Option<SunEvents>;

    fn moon_status(&self, lat: f64, lon: f64, at: DateTime<FixedOffset>) -> MoonStatus;

    fn observing_window(&self, sun: &SunEvents, moon: &MoonStatus) -> ObservingWindow {
        classify_observing_window(sun, moon)
    }
}

#[derive(Debug, Clone, Copy)]
struct SolarDay {
    /// Equation of time, minutes.
    eqtime: f64,
    /// Declination, radians.
    decl: f64,
}

impl SolarDay {
    fn for_date(date: NaiveDate) -> Self {
        let days_in_year = if date.leap_year() { 366.0 } else { 365.0 };
        // fractional year at local noon
        let gamma = 2.0 * PI / days_in_year * f64::from(date.ordinal0());
        let eqtime = 229.18
            * (0.000075 + 0.001868 * gamma.cos()
                - 0.032077 * gamma.sin()
                - 0.014615 * (2.0 * gamma).cos()
                - 0.040849 * (2.0 * gamma).sin());
        let decl = 0.006918 - 0.399912 * gamma.cos() + 0.070257 * gamma.sin()
            - 0.006758 * (2.0 * gamma).cos()
            + 0.000907 * (2.0 * gamma).sin()
            - 0.002697 * (3.0 * gamma).cos()
            + 0.00148 * (3.0 * gamma).sin();
        Self { eqtime, decl }
    }

    fn hour_angle(&self, lat: f64, zenith: f64) -> Option<f64> {
        let lat = lat.to_radians();
        let cos_ha = zenith.to_radians().cos() / (lat.cos() * self.decl.cos())
            - lat.tan() * self.decl.tan();
        (-1.0..=1.0)
            .contains(&cos_ha)
            .then(|| cos_ha.acos().to_degrees())
    }

    /// Minutes after UTC midnight of the crossing before (`-`) or after (`+`) noon.
    fn crossing_minutes(&self, lon: f64, hour_angle: f64, morning: bool) -> f64 {
        let ha = if morning { hour_angle } else { -hour_angle };
        720.0 - 4.0 * (lon + ha) - self.eqtime
    }

    fn rising_azimuth(&self, lat: f64, zenith: f64) -> f64 {
        let lat = lat.to_radians();
        let zenith = zenith.to_radians();
        let cos_az = (self.decl.sin() - lat.sin() * zenith.cos()) / (lat.cos() * zenith.sin());
        cos_az.clamp(-1.0, 1.0).acos().to_degrees()
    }
}

/// Accurate to a minute or two for sunrise/sunset away from the poles. Moon
/// elevation and rise/set times are not modelled.
#[derive(Debug, Clone, Copy)]
pub struct SolarCalculator {
    offset: FixedOffset,
}

impl SolarCalculator {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    fn at_minutes(&self, date: NaiveDate, minutes_utc: f64) -> Option<DateTime<FixedOffset>> {
        let midnight = date.and_hms_opt(0, 0, 0)?.and_utc();
        let delta = Duration::milliseconds((minutes_utc * 60_000.0).round() as i64);
        Some((midnight + delta).with_timezone(&self.offset))
    }

    fn crossing(
        &self,
        lat: f64,
        lon: f64,
        date: NaiveDate,
        zenith: f64,
        morning: bool,
    ) -> Option<DateTime<FixedOffset>> {
        let day = SolarDay::for_date(date);
        let ha = day.hour_angle(lat, zenith)?;
        self.at_minutes(date, day.crossing_minutes(lon, ha, morning))
    }
}

impl AstronomyProvider for SolarCalculator {
    fn sun_events(&self, lat: f64, lon: f64, date: NaiveDate) -> Option<SunEvents> {
        let sunrise = self.crossing(lat, lon, date, SUNRISE_ZENITH, true)?;
        let sunset = self.crossing(lat, lon, date, SUNRISE_ZENITH, false)?;
        let rising = SolarDay::for_date(date).rising_azimuth(lat, SUNRISE_ZENITH);

        // white nights never reach -18°: the night is bounded by sunset and sunrise
        let next = date.succ_opt()?;
        let astronomical_dusk = self
            .crossing(lat, lon, date, ASTRONOMICAL_ZENITH, false)
            .unwrap_or(sunset);
        let astronomical_dawn = self
            .crossing(lat, lon, next, ASTRONOMICAL_ZENITH, true)
            .or_else(|| self.crossing(lat, lon, next, SUNRISE_ZENITH, true))?;

        Some(SunEvents {
            sunrise,
            sunset,
            sunrise_azimuth: rising,
            sunset_azimuth: 360.0 - rising,
            astronomical_dawn,
            astronomical_dusk,
        })
    }

    fn moon_status(&self, _lat: f64, _lon: f64, at: DateTime<FixedOffset>) -> MoonStatus {
        MoonStatus {
            phase: moon_phase_percent(at),
            elevation: 0.0,
            moonrise: None,
            moonset: None,
        }
    }
}

pub fn moon_phase_percent(at: DateTime<FixedOffset>) -> u8 {
    let jd = at.timestamp() as f64 / 86_400.0 + UNIX_EPOCH_JD;
    let age = (jd - REFERENCE_NEW_MOON_JD).rem_euclid(SYNODIC_MONTH_DAYS);
    let illuminated = (1.0 - (2.0 * PI * age / SYNODIC_MONTH_DAYS).cos()) / 2.0;
    (illuminated * 100.0).round().clamp(0.0, 100.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};
    use gmp_core::WindowQuality;

    fn offset() -> FixedOffset {
        FixedOffset::east_opt(8 * 3600).unwrap()
    }

    fn calc() -> SolarCalculator {
        SolarCalculator::new(offset())
    }

    fn minutes_of_day(t: DateTime<FixedOffset>) -> u32 {
        t.hour() * 60 + t.minute()
    }

    #[test]
    fn winter_sun_on_the_sichuan_plateau() {
        let date = NaiveDate::from_ymd_opt(2026, 1, 15).unwrap();
        let sun = calc().sun_events(29.75, 102.35, date).unwrap();

        assert_eq!(sun.sunrise.date_naive(), date);
        // about 08:06 and 18:32 local
        assert!((480..=490).contains(&minutes_of_day(sun.sunrise)), "{}", sun.sunrise);
        assert!((1105..=1118).contains(&minutes_of_day(sun.sunset)), "{}", sun.sunset);
        assert!((sun.sunrise_azimuth - 114.2).abs() < 1.5, "{}", sun.sunrise_azimuth);
        assert!((sun.sunrise_azimuth + sun.sunset_azimuth - 360.0).abs() < 1e-9);

        assert!(sun.astronomical_dusk > sun.sunset);
        assert_eq!(sun.astronomical_dawn.date_naive(), date.succ_opt().unwrap());
        assert!(sun.astronomical_dawn.hour() < 8);
    }

    #[test]
    fn summer_sun_rises_north_of_east() {
        let date = NaiveDate::from_ymd_opt(2026, 6, 21).unwrap();
        let sun = calc().sun_events(29.75, 102.35, date).unwrap();
        assert!(sun.sunrise_azimuth < 70.0);
        assert!(sun.sunset_azimuth > 290.0);
    }

    #[test]
    fn polar_day_and_night_have_no_events() {
        let summer = NaiveDate::from_ymd_opt(2026, 6, 21).unwrap();
        let winter = NaiveDate::from_ymd_opt(2026, 12, 21).unwrap();
        assert!(calc().sun_events(78.2, 15.6, summer).is_none());
        assert!(calc().sun_events(78.2, 15.6, winter).is_none());
    }

    #[test]
    fn white_nights_fall_back_to_sunset_and_sunrise() {
        let date = NaiveDate::from_ymd_opt(2026, 6, 21).unwrap();
        let sun = calc().sun_events(60.0, 30.0, date).unwrap();
        assert_eq!(sun.astronomical_dusk, sun.sunset);
    }

    #[test]
    fn moon_phase_tracks_new_and_full_moon() {
        let new_moon = Utc8::at(2026, 1, 19, 4);
        let full_moon = Utc8::at(2026, 2, 2, 6);
        assert!(moon_phase_percent(new_moon) <= 2);
        assert!(moon_phase_percent(full_moon) >= 98);

        let moon = calc().moon_status(29.75, 102.35, full_moon);
        assert!(moon.moonrise.is_none() && moon.moonset.is_none());
    }

    #[test]
    fn observing_window_defaults_to_moon_phase_classification() {
        let date = NaiveDate::from_ymd_opt(2026, 1, 18).unwrap();
        let sun = calc().sun_events(29.75, 102.35, date).unwrap();
        let dark = calc().moon_status(29.75, 102.35, sun.astronomical_dusk);
        assert_eq!(calc().observing_window(&sun, &dark).quality, WindowQuality::Good);

        let bright = calc().moon_status(29.75, 102.35, Utc8::at(2026, 2, 2, 6));
        assert_eq!(calc().observing_window(&sun, &bright).quality, WindowQuality::Poor);
    }

    struct Utc8;

    impl Utc8 {
        fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<FixedOffset> {
            offset().with_ymd_and_hms(y, m, d, h, 0, 0).single().unwrap()
        }
    }
}
