use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, TimeDelta, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::BookingError;

/// Half-open interval `[start, end)` of absolute instants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        debug_assert!(start < end, "TimeWindow start ({start}) must be < end ({end})");
        Self { start, end }
    }

    pub fn starting_at(start: DateTime<Utc>, minutes: u32) -> Self {
        Self::new(start, start + TimeDelta::minutes(minutes as i64))
    }

    /// Touching windows (`a.end == b.start`) do not overlap.
    pub fn overlaps(&self, other: &TimeWindow) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Window with `end` pushed out by the buffer. Only used for conflict
    /// comparisons; never persisted as an appointment's own end.
    pub fn expand_end(&self, buffer_minutes: u32) -> TimeWindow {
        TimeWindow {
            start: self.start,
            end: self.end + TimeDelta::minutes(buffer_minutes as i64),
        }
    }
}

/// Combine a local calendar date and wall-clock time in `tz` into an instant.
///
/// Ambiguous times (DST fall-back) resolve to the earlier instant. Times that
/// do not exist (spring-forward gap) return `None`.
pub fn localize(tz: Tz, date: NaiveDate, time: NaiveTime) -> Option<DateTime<Utc>> {
    tz.from_local_datetime(&date.and_time(time))
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

/// First instant of `date` in `tz`. A few zones skip midnight on DST days,
/// in which case the first existing hour is used.
pub fn start_of_local_day(tz: Tz, date: NaiveDate) -> DateTime<Utc> {
    (0..3)
        .filter_map(|hour| NaiveTime::from_hms_opt(hour, 0, 0))
        .find_map(|time| localize(tz, date, time))
        .unwrap_or_else(|| date.and_time(NaiveTime::MIN).and_utc())
}

pub fn local_date(instant: DateTime<Utc>, tz: Tz) -> NaiveDate {
    instant.with_timezone(&tz).date_naive()
}

pub fn local_time(instant: DateTime<Utc>, tz: Tz) -> NaiveTime {
    instant.with_timezone(&tz).time()
}

pub fn minute_of_day(time: NaiveTime) -> u32 {
    time.hour() * 60 + time.minute()
}

pub fn time_from_minutes(minutes: u32) -> Option<NaiveTime> {
    NaiveTime::from_hms_opt(minutes / 60, minutes % 60, 0)
}

/// 0 = Sunday … 6 = Saturday.
pub fn weekday_index(date: NaiveDate) -> u8 {
    date.weekday().num_days_from_sunday() as u8
}

pub fn parse_date(s: &str) -> Result<NaiveDate, BookingError> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|_| {
        BookingError::Validation(format!("Cannot parse date: '{s}'. Use YYYY-MM-DD."))
    })
}

pub fn parse_time(s: &str) -> Result<NaiveTime, BookingError> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .map_err(|_| BookingError::Validation(format!("Cannot parse time: '{s}'. Use HH:MM.")))
}

pub fn parse_timezone(s: &str) -> Result<Tz, BookingError> {
    s.trim()
        .parse()
        .map_err(|_| BookingError::Validation(format!("Unknown IANA timezone: '{s}'")))
}

pub fn format_hhmm(time: NaiveTime) -> String {
    time.format("%H:%M").to_string()
}

/// Serde adapter for `HH:MM` wall-clock times.
pub mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_hhmm(*time))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let s = String::deserialize(deserializer)?;
        super::parse_time(&s).map_err(serde::de::Error::custom)
    }
}

/// Same as [`hhmm`] for optional fields.
pub mod hhmm_opt {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        time: &Option<NaiveTime>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match time {
            Some(t) => serializer.serialize_str(&super::format_hhmm(*t)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<NaiveTime>, D::Error> {
        let s = Option::<String>::deserialize(deserializer)?;
        s.map(|s| super::parse_time(&s).map_err(serde::de::Error::custom))
            .transpose()
    }
}
