use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::rules::BookingRules;
use super::time_window::{hhmm, TimeWindow};
use crate::error::BookingError;

/// Longest service duration and buffer, in minutes.
pub const MAX_SERVICE_MINUTES: u32 = 24 * 60;

/// Longest minimum notice a service may ask for: one year.
pub const MAX_NOTICE_HOURS: u32 = 365 * 24;

macro_rules! uuid_id {
    ($name:ident, $label:literal) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = BookingError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s.trim())
                    .map(Self)
                    .map_err(|e| BookingError::Validation(format!("Invalid {} ID: {e}", $label)))
            }
        }
    };
}

uuid_id!(BusinessId, "business");
uuid_id!(ServiceId, "service");
uuid_id!(CustomerId, "customer");
uuid_id!(AppointmentId, "appointment");
uuid_id!(SeriesId, "series");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayHours {
    #[serde(with = "hhmm")]
    pub open: NaiveTime,
    #[serde(with = "hhmm")]
    pub close: NaiveTime,
}

impl DayHours {
    pub fn new(open: NaiveTime, close: NaiveTime) -> Self {
        Self { open, close }
    }

    pub fn is_valid(&self) -> bool {
        self.open < self.close
    }
}

/// Opening hours per weekday, indexed 0 = Sunday … 6 = Saturday.
/// `None` means closed that day.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklyHours {
    days: [Option<DayHours>; 7],
}

impl WeeklyHours {
    pub fn closed() -> Self {
        Self::default()
    }

    /// Same hours Monday through Friday, closed on weekends.
    pub fn weekdays(open: NaiveTime, close: NaiveTime) -> Self {
        let mut hours = Self::closed();
        for day in 1..=5 {
            hours.set(day, Some(DayHours::new(open, close)));
        }
        hours
    }

    pub fn get(&self, weekday: u8) -> Option<DayHours> {
        self.days.get(weekday as usize).copied().flatten()
    }

    pub fn set(&mut self, weekday: u8, hours: Option<DayHours>) {
        if let Some(slot) = self.days.get_mut(weekday as usize) {
            *slot = hours;
        }
    }

    pub fn defines(&self, weekday: u8) -> bool {
        self.get(weekday).is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecialDate {
    pub date: NaiveDate,
    #[serde(default)]
    pub closed: bool,
    #[serde(default)]
    pub hours: Option<DayHours>,
    /// Repeats every year on the same month and day.
    #[serde(default)]
    pub recurring: bool,
    #[serde(default)]
    pub note: Option<String>,
}

impl SpecialDate {
    pub fn closure(date: NaiveDate) -> Self {
        Self {
            date,
            closed: true,
            hours: None,
            recurring: false,
            note: None,
        }
    }

    pub fn with_hours(date: NaiveDate, hours: DayHours) -> Self {
        Self {
            date,
            closed: false,
            hours: Some(hours),
            recurring: false,
            note: None,
        }
    }

    fn matches_annually(&self, date: NaiveDate) -> bool {
        self.recurring && self.date.month() == date.month() && self.date.day() == date.day()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Business {
    pub id: BusinessId,
    pub name: String,
    pub slug: String,
    pub timezone: Tz,
    pub weekly_hours: WeeklyHours,
    pub special_dates: Vec<SpecialDate>,
    pub booking_rules: BookingRules,
}

impl Business {
    pub fn new(name: impl Into<String>, timezone: Tz, weekly_hours: WeeklyHours) -> Self {
        let name = name.into();
        Self {
            id: BusinessId::new(),
            slug: slugify(&name),
            name,
            timezone,
            weekly_hours,
            special_dates: Vec::new(),
            booking_rules: BookingRules::default(),
        }
    }

    /// Exact-date override first, then an annual recurring one.
    pub fn special_date_for(&self, date: NaiveDate) -> Option<&SpecialDate> {
        self.special_dates
            .iter()
            .find(|sd| sd.date == date)
            .or_else(|| self.special_dates.iter().find(|sd| sd.matches_annually(date)))
    }

    /// Insert or replace; special dates are unique per calendar date.
    pub fn upsert_special_date(&mut self, special: SpecialDate) {
        self.special_dates.retain(|sd| sd.date != special.date);
        self.special_dates.push(special);
        self.special_dates.sort_by_key(|sd| sd.date);
    }
}

pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    slug.trim_end_matches('-').to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub id: ServiceId,
    pub business_id: BusinessId,
    pub name: String,
    pub duration_minutes: u32,
    /// Appended after the service before the next booking may start.
    pub buffer_minutes: u32,
    pub use_business_hours: bool,
    /// Weekdays (0 = Sunday) the service is offered. Empty means every day.
    pub available_days: Vec<u8>,
    /// Per-weekday hours, consulted only when `use_business_hours` is false.
    pub custom_availability: Option<WeeklyHours>,
    /// `None` falls back to the business booking rules.
    pub max_advance_booking_days: Option<u32>,
    pub min_notice_hours: u32,
    pub requires_approval: bool,
    pub active: bool,
}

impl Service {
    pub fn new(business_id: BusinessId, name: impl Into<String>, duration_minutes: u32) -> Self {
        Self {
            id: ServiceId::new(),
            business_id,
            name: name.into(),
            duration_minutes,
            buffer_minutes: 0,
            use_business_hours: true,
            available_days: Vec::new(),
            custom_availability: None,
            max_advance_booking_days: None,
            min_notice_hours: 0,
            requires_approval: false,
            active: true,
        }
    }

    pub fn validate(&self) -> Result<(), BookingError> {
        if self.name.trim().is_empty() {
            return Err(BookingError::Validation("Service name is required".to_string()));
        }
        if self.duration_minutes == 0 || self.duration_minutes > MAX_SERVICE_MINUTES {
            return Err(BookingError::Validation(format!(
                "Service duration must be between 1 and {MAX_SERVICE_MINUTES} minutes, got {}",
                self.duration_minutes
            )));
        }
        if self.buffer_minutes > MAX_SERVICE_MINUTES {
            return Err(BookingError::Validation(format!(
                "Buffer time must be at most {MAX_SERVICE_MINUTES} minutes, got {}",
                self.buffer_minutes
            )));
        }
        if self.min_notice_hours > MAX_NOTICE_HOURS {
            return Err(BookingError::Validation(format!(
                "Minimum notice must be at most {MAX_NOTICE_HOURS} hours, got {}",
                self.min_notice_hours
            )));
        }
        if let Some(day) = self.available_days.iter().find(|d| **d > 6) {
            return Err(BookingError::Validation(format!(
                "Available day {day} is out of range 0-6"
            )));
        }
        if !self.use_business_hours {
            let custom = self.custom_availability.as_ref().ok_or_else(|| {
                BookingError::Validation(
                    "customAvailability is required when useBusinessHours is false".to_string(),
                )
            })?;
            if let Some(day) = self.available_days.iter().find(|d| !custom.defines(**d)) {
                return Err(BookingError::Validation(format!(
                    "customAvailability does not define available day {day}"
                )));
            }
        }
        Ok(())
    }

    pub fn offered_on(&self, weekday: u8) -> bool {
        self.available_days.is_empty() || self.available_days.contains(&weekday)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub id: CustomerId,
    pub business_id: BusinessId,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub total_bookings: u32,
    pub last_booking_at: Option<DateTime<Utc>>,
    pub no_show_count: u32,
}

impl Customer {
    pub fn new(business_id: BusinessId, details: CustomerDetails) -> Self {
        Self {
            id: CustomerId::new(),
            business_id,
            name: details.name,
            email: details.email,
            phone: details.phone,
            total_bookings: 0,
            last_booking_at: None,
            no_show_count: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerDetails {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

/// Who a booking is for: a known customer, or details captured at booking time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CustomerRef {
    Existing(CustomerId),
    Inline(CustomerDetails),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AppointmentStatus::Completed | AppointmentStatus::Cancelled | AppointmentStatus::NoShow
        )
    }

    pub fn can_transition_to(self, next: AppointmentStatus) -> bool {
        use AppointmentStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed)
                | (Pending, Cancelled)
                | (Confirmed, Completed)
                | (Confirmed, Cancelled)
                | (Confirmed, NoShow)
        )
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AppointmentStatus::Pending => "PENDING",
            AppointmentStatus::Confirmed => "CONFIRMED",
            AppointmentStatus::Completed => "COMPLETED",
            AppointmentStatus::Cancelled => "CANCELLED",
            AppointmentStatus::NoShow => "NO_SHOW",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingSource {
    /// Created by staff; confirmed immediately.
    Dashboard,
    /// Self-serve booking page; may need business approval.
    Public,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CancellationSource {
    Customer,
    Business,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cancellation {
    pub source: CancellationSource,
    pub reason: Option<String>,
    pub cancelled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditAction {
    Created,
    Confirmed,
    Rescheduled {
        from_start: DateTime<Utc>,
        from_end: DateTime<Utc>,
    },
    Cancelled,
    NoShow,
    Completed,
    ReminderSent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub at: DateTime<Utc>,
    pub action: AuditAction,
    pub from_status: Option<AppointmentStatus>,
    pub to_status: AppointmentStatus,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Appointment {
    pub id: AppointmentId,
    pub business_id: BusinessId,
    pub service_id: ServiceId,
    pub customer_id: CustomerId,
    pub customer_name: String,
    pub customer_email: Option<String>,
    pub customer_phone: Option<String>,
    /// `end == start + service duration`; buffers are never stored here.
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub status: AppointmentStatus,
    pub previous_status: Option<AppointmentStatus>,
    pub source: BookingSource,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancellation: Option<Cancellation>,
    pub reminder_sent_at: Option<DateTime<Utc>>,
    pub series_id: Option<SeriesId>,
    pub series_position: Option<u32>,
    pub history: Vec<AuditEntry>,
}

impl Appointment {
    pub fn window(&self) -> TimeWindow {
        TimeWindow::new(self.start, self.end)
    }

    /// PENDING and CONFIRMED always hold their slot; COMPLETED only when
    /// the business counts history as occupied.
    pub fn occupies_slot(&self, completed_blocks: bool) -> bool {
        match self.status {
            AppointmentStatus::Pending | AppointmentStatus::Confirmed => true,
            AppointmentStatus::Completed => completed_blocks,
            AppointmentStatus::Cancelled | AppointmentStatus::NoShow => false,
        }
    }

    /// Move to `next`, keeping `previous_status` and the audit trail current.
    /// Callers check `can_transition_to` first.
    pub fn record_transition(
        &mut self,
        next: AppointmentStatus,
        action: AuditAction,
        note: Option<String>,
        at: DateTime<Utc>,
    ) {
        self.history.push(AuditEntry {
            at,
            action,
            from_status: Some(self.status),
            to_status: next,
            note,
        });
        self.previous_status = Some(self.status);
        self.status = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn hm(hour: u32, min: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(hour, min, 0).unwrap()
    }

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    #[test]
    fn weekdays_helper_closes_weekend() {
        let hours = WeeklyHours::weekdays(hm(9, 0), hm(17, 0));
        assert!(hours.get(0).is_none());
        assert!(hours.get(6).is_none());
        assert_eq!(hours.get(3), Some(DayHours::new(hm(9, 0), hm(17, 0))));
        assert!(hours.get(9).is_none());
    }

    #[test]
    fn weekly_hours_serialize_as_hh_mm() {
        let mut hours = WeeklyHours::closed();
        hours.set(1, Some(DayHours::new(hm(9, 0), hm(12, 30))));
        let json = serde_json::to_value(&hours).unwrap();
        assert_eq!(json["days"][1]["open"], "09:00");
        assert_eq!(json["days"][1]["close"], "12:30");
        assert!(json["days"][0].is_null());

        let back: WeeklyHours = serde_json::from_value(json).unwrap();
        assert_eq!(back, hours);
    }

    #[test]
    fn exact_special_date_wins_over_recurring() {
        let tz: Tz = "UTC".parse().unwrap();
        let mut business = Business::new("Studio", tz, WeeklyHours::closed());
        let mut christmas = SpecialDate::closure(date(2020, 12, 25));
        christmas.recurring = true;
        business.upsert_special_date(christmas);
        business.upsert_special_date(SpecialDate::with_hours(
            date(2025, 12, 25),
            DayHours::new(hm(10, 0), hm(12, 0)),
        ));

        let this_year = business.special_date_for(date(2025, 12, 25)).unwrap();
        assert!(!this_year.closed);
        let next_year = business.special_date_for(date(2026, 12, 25)).unwrap();
        assert!(next_year.closed);
        assert!(business.special_date_for(date(2026, 12, 24)).is_none());
    }

    #[test]
    fn upsert_special_date_replaces_same_date() {
        let tz: Tz = "UTC".parse().unwrap();
        let mut business = Business::new("Studio", tz, WeeklyHours::closed());
        business.upsert_special_date(SpecialDate::closure(date(2025, 5, 1)));
        business.upsert_special_date(SpecialDate::with_hours(
            date(2025, 5, 1),
            DayHours::new(hm(9, 0), hm(13, 0)),
        ));
        assert_eq!(business.special_dates.len(), 1);
        assert!(!business.special_dates[0].closed);
    }

    #[test]
    fn slugify_collapses_punctuation() {
        assert_eq!(slugify("Anna's Hair & Nails"), "anna-s-hair-nails");
        assert_eq!(slugify("  Yoga  "), "yoga");
    }

    #[test]
    fn service_validation() {
        let business_id = BusinessId::new();
        let mut service = Service::new(business_id, "Cut", 45);
        assert!(service.validate().is_ok());

        service.duration_minutes = 0;
        assert!(matches!(service.validate(), Err(BookingError::Validation(_))));
        service.duration_minutes = 45;

        service.available_days = vec![1, 7];
        assert!(service.validate().is_err());
        service.available_days = vec![1, 3];

        service.use_business_hours = false;
        assert!(service.validate().is_err(), "custom hours are required");

        let mut custom = WeeklyHours::closed();
        custom.set(1, Some(DayHours::new(hm(8, 0), hm(12, 0))));
        service.custom_availability = Some(custom.clone());
        assert!(service.validate().is_err(), "Wednesday is not defined");

        custom.set(3, Some(DayHours::new(hm(8, 0), hm(12, 0))));
        service.custom_availability = Some(custom);
        assert!(service.validate().is_ok());
    }

    #[test]
    fn min_notice_is_capped_at_a_year() {
        let mut service = Service::new(BusinessId::new(), "Consult", 30);
        service.min_notice_hours = MAX_NOTICE_HOURS;
        assert!(service.validate().is_ok());
        service.min_notice_hours = u32::MAX;
        assert!(matches!(service.validate(), Err(BookingError::Validation(_))));
    }

    #[test]
    fn status_transitions() {
        use AppointmentStatus::*;
        assert!(Pending.can_transition_to(Confirmed));
        assert!(Confirmed.can_transition_to(NoShow));
        assert!(!Pending.can_transition_to(NoShow));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Cancelled.can_transition_to(Confirmed));
        assert!(Completed.is_terminal());
        assert!(!Confirmed.is_terminal());
    }

    #[test]
    fn status_serializes_screaming_snake() {
        assert_eq!(
            serde_json::to_value(AppointmentStatus::NoShow).unwrap(),
            serde_json::json!("NO_SHOW")
        );
        assert_eq!(AppointmentStatus::NoShow.to_string(), "NO_SHOW");
    }

    #[test]
    fn id_parse_rejects_garbage() {
        let id = AppointmentId::new();
        assert_eq!(id.to_string().parse::<AppointmentId>().unwrap(), id);
        assert!("nope".parse::<AppointmentId>().is_err());
    }
}
