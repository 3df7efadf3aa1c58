use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::model::{Appointment, AppointmentId, Business, Service, ServiceId};
use super::rules::{resolve_day_rules, BookingRules};
use super::slots::{booking_window_violation, UnavailableReason};
use super::time_window::{format_hhmm, hhmm, local_time, localize, minute_of_day, TimeWindow};
use crate::error::BookingError;

/// An existing appointment as seen by conflict checks: its stored interval
/// plus the buffer of its own service.
#[derive(Debug, Clone)]
pub struct Occupied {
    pub appointment_id: AppointmentId,
    pub customer_name: String,
    pub window: TimeWindow,
    pub buffer_minutes: u32,
}

impl Occupied {
    pub fn blocked_window(&self) -> TimeWindow {
        self.window.expand_end(self.buffer_minutes)
    }
}

/// Keep only appointments that hold their slot and attach each one's buffer.
pub fn occupancy<F>(appointments: &[Appointment], completed_blocks: bool, buffer_for: F) -> Vec<Occupied>
where
    F: Fn(&ServiceId) -> u32,
{
    let mut occupied: Vec<Occupied> = appointments
        .iter()
        .filter(|a| a.occupies_slot(completed_blocks))
        .map(|a| Occupied {
            appointment_id: a.id,
            customer_name: a.customer_name.clone(),
            window: a.window(),
            buffer_minutes: buffer_for(&a.service_id),
        })
        .collect();
    occupied.sort_by_key(|o| o.window.start);
    occupied
}

/// What the caller may show about a clash. Customer name only, no other PII.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictInfo {
    pub appointment_id: AppointmentId,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    #[serde(with = "hhmm")]
    pub end_time: NaiveTime,
    pub customer_name: String,
}

/// Existing appointments whose buffered window overlaps the buffered candidate.
pub fn detect_conflicts(
    candidate: &TimeWindow,
    buffer_minutes: u32,
    occupied: &[Occupied],
    exclude: Option<AppointmentId>,
    tz: Tz,
) -> Vec<ConflictInfo> {
    let buffered = candidate.expand_end(buffer_minutes);
    occupied
        .iter()
        .filter(|o| Some(o.appointment_id) != exclude)
        .filter(|o| buffered.overlaps(&o.blocked_window()))
        .map(|o| ConflictInfo {
            appointment_id: o.appointment_id,
            start: o.window.start,
            end: o.window.end,
            start_time: local_time(o.window.start, tz),
            end_time: local_time(o.window.end, tz),
            customer_name: o.customer_name.clone(),
        })
        .collect()
}

/// Why a time cannot be booked, kept apart so callers can tell "closed"
/// from "booked" from "too soon".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AvailabilityIssue {
    Closed { reason: String },
    TooSoon { detail: String },
    TooFarAdvance { max_days: u32 },
    Booked,
}

impl AvailabilityIssue {
    /// Booking-window errors become issues; anything else is not a
    /// property of the requested time.
    pub fn from_error(err: &BookingError) -> Option<Self> {
        match err {
            BookingError::Closed { reason, .. } => Some(AvailabilityIssue::Closed {
                reason: reason.clone(),
            }),
            BookingError::TooSoon(detail) => Some(AvailabilityIssue::TooSoon {
                detail: detail.clone(),
            }),
            BookingError::TooFarAdvance { max_days, .. } => {
                Some(AvailabilityIssue::TooFarAdvance { max_days: *max_days })
            }
            BookingError::Conflict(_) => Some(AvailabilityIssue::Booked),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConflictQuery {
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub duration_minutes: u32,
    pub buffer_minutes: u32,
    pub exclude_appointment_id: Option<AppointmentId>,
}

impl ConflictQuery {
    pub fn for_service(service: &Service, date: NaiveDate, start_time: NaiveTime) -> Self {
        Self {
            date,
            start_time,
            duration_minutes: service.duration_minutes,
            buffer_minutes: service.buffer_minutes,
            exclude_appointment_id: None,
        }
    }

    pub fn excluding(mut self, id: AppointmentId) -> Self {
        self.exclude_appointment_id = Some(id);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictCheck {
    pub available: bool,
    pub conflicts: Vec<ConflictInfo>,
    /// First reason the time is unavailable. Conflicts are listed even when
    /// the time also fails the booking window.
    pub issue: Option<AvailabilityIssue>,
}

/// Check the open hours and booking window for a requested start, returning
/// the appointment interval (without buffer) when it passes.
pub fn validate_booking_time(
    business: &Business,
    service: &Service,
    date: NaiveDate,
    start_time: NaiveTime,
    duration_minutes: u32,
    rules: &BookingRules,
    now: DateTime<Utc>,
) -> Result<TimeWindow, BookingError> {
    let tz = business.timezone;
    let start = localize(tz, date, start_time).ok_or_else(|| {
        BookingError::Validation(format!(
            "{} {} does not exist in {}",
            date,
            format_hhmm(start_time),
            tz.name()
        ))
    })?;

    let rule = resolve_day_rules(business, service, date);
    let Some(hours) = rule.hours() else {
        return Err(BookingError::Closed {
            date,
            reason: rule.reason.as_str().to_string(),
        });
    };
    let start_min = minute_of_day(start_time);
    if start_min < minute_of_day(hours.open)
        || start_min + duration_minutes > minute_of_day(hours.close)
    {
        return Err(BookingError::Closed {
            date,
            reason: format!(
                "outside opening hours {}-{}",
                format_hhmm(hours.open),
                format_hhmm(hours.close)
            ),
        });
    }

    if let Some(reason) = booking_window_violation(business, service, date, start, rules, now) {
        return Err(window_error(reason, date, service, rules));
    }

    Ok(TimeWindow::starting_at(start, duration_minutes))
}

fn window_error(
    reason: UnavailableReason,
    date: NaiveDate,
    service: &Service,
    rules: &BookingRules,
) -> BookingError {
    match reason {
        UnavailableReason::Past => BookingError::TooSoon("start time is in the past".to_string()),
        UnavailableReason::SameDayLeadTime if !rules.same_day_booking => {
            BookingError::TooSoon("same-day booking is disabled".to_string())
        }
        UnavailableReason::SameDayLeadTime => BookingError::TooSoon(format!(
            "bookings need at least {} minutes lead time",
            rules.same_day_lead_time_minutes
        )),
        UnavailableReason::MinNotice => BookingError::TooSoon(format!(
            "{} requires {} hours notice",
            service.name, service.min_notice_hours
        )),
        UnavailableReason::TooFarAdvance => BookingError::TooFarAdvance {
            date,
            max_days: service
                .max_advance_booking_days
                .unwrap_or(rules.advance_booking_days),
        },
        UnavailableReason::Booked => BookingError::Conflict(Vec::new()),
    }
}

/// Full availability verdict for one requested time: booking-window checks
/// and overlap detection run independently.
pub fn check_conflicts(
    business: &Business,
    service: &Service,
    query: &ConflictQuery,
    occupied: &[Occupied],
    rules: &BookingRules,
    now: DateTime<Utc>,
) -> Result<ConflictCheck, BookingError> {
    let tz = business.timezone;
    let start = localize(tz, query.date, query.start_time).ok_or_else(|| {
        BookingError::Validation(format!(
            "{} {} does not exist in {}",
            query.date,
            format_hhmm(query.start_time),
            tz.name()
        ))
    })?;
    let candidate = TimeWindow::starting_at(start, query.duration_minutes);
    let conflicts = detect_conflicts(
        &candidate,
        query.buffer_minutes,
        occupied,
        query.exclude_appointment_id,
        tz,
    );

    let window_issue = match validate_booking_time(
        business,
        service,
        query.date,
        query.start_time,
        query.duration_minutes,
        rules,
        now,
    ) {
        Ok(_) => None,
        Err(err) => match AvailabilityIssue::from_error(&err) {
            Some(issue) => Some(issue),
            None => return Err(err),
        },
    };

    let issue = window_issue.or_else(|| (!conflicts.is_empty()).then_some(AvailabilityIssue::Booked));
    debug!(
        business = %business.id,
        date = %query.date,
        start = %format_hhmm(query.start_time),
        conflicts = conflicts.len(),
        "conflict check"
    );

    Ok(ConflictCheck {
        available: issue.is_none(),
        conflicts,
        issue,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::booking::model::{SpecialDate, WeeklyHours};
    use chrono::{TimeDelta, TimeZone};
    use pretty_assertions::assert_eq;

    fn utc(year: i32, month: u32, day: u32, hour: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, hour, min, 0).unwrap()
    }

    fn hm(hour: u32, min: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(hour, min, 0).unwrap()
    }

    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 3).unwrap()
    }

    fn studio() -> Business {
        Business::new("Studio", chrono_tz::UTC, WeeklyHours::weekdays(hm(9, 0), hm(17, 0)))
    }

    fn occupied(name: &str, start: DateTime<Utc>, minutes: u32, buffer: u32) -> Occupied {
        Occupied {
            appointment_id: AppointmentId::new(),
            customer_name: name.to_string(),
            window: TimeWindow::starting_at(start, minutes),
            buffer_minutes: buffer,
        }
    }

    // A week before the Monday under test.
    fn last_week() -> DateTime<Utc> {
        utc(2025, 2, 24, 8, 0)
    }

    // -- detect_conflicts --

    #[test]
    fn existing_buffer_blocks_following_start() {
        let existing = vec![occupied("Ada", utc(2025, 3, 3, 10, 0), 60, 15)];
        let at_11 = TimeWindow::starting_at(utc(2025, 3, 3, 11, 0), 30);
        let at_11_15 = TimeWindow::starting_at(utc(2025, 3, 3, 11, 15), 30);

        let conflicts = detect_conflicts(&at_11, 0, &existing, None, chrono_tz::UTC);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].customer_name, "Ada");
        assert_eq!(conflicts[0].start_time, hm(10, 0));
        assert_eq!(conflicts[0].end_time, hm(11, 0));

        assert!(detect_conflicts(&at_11_15, 0, &existing, None, chrono_tz::UTC).is_empty());
    }

    #[test]
    fn candidate_buffer_blocks_preceding_start() {
        let existing = vec![occupied("Ada", utc(2025, 3, 3, 10, 0), 60, 0)];
        let at_9 = TimeWindow::starting_at(utc(2025, 3, 3, 9, 0), 60);
        assert!(detect_conflicts(&at_9, 0, &existing, None, chrono_tz::UTC).is_empty());
        assert_eq!(detect_conflicts(&at_9, 15, &existing, None, chrono_tz::UTC).len(), 1);
    }

    #[test]
    fn excluded_appointment_is_ignored() {
        let existing = vec![occupied("Ada", utc(2025, 3, 3, 10, 0), 60, 0)];
        let same = TimeWindow::starting_at(utc(2025, 3, 3, 10, 0), 60);
        let id = existing[0].appointment_id;
        assert!(detect_conflicts(&same, 0, &existing, Some(id), chrono_tz::UTC).is_empty());
    }

    #[test]
    fn conflict_times_are_local() {
        let tz: Tz = "America/New_York".parse().unwrap();
        let existing = vec![occupied("Ada", utc(2025, 1, 15, 19, 0), 30, 0)];
        let candidate = TimeWindow::starting_at(utc(2025, 1, 15, 19, 15), 30);
        let conflicts = detect_conflicts(&candidate, 0, &existing, None, tz);
        assert_eq!(conflicts[0].start_time, hm(14, 0));
        assert_eq!(conflicts[0].end_time, hm(14, 30));
    }

    // -- validate_booking_time --

    #[test]
    fn valid_time_returns_unbuffered_window() {
        let business = studio();
        let mut service = Service::new(business.id, "Cut", 45);
        service.buffer_minutes = 30;
        let window = validate_booking_time(
            &business,
            &service,
            monday(),
            hm(9, 30),
            45,
            &BookingRules::default(),
            last_week(),
        )
        .unwrap();
        assert_eq!(window.start, utc(2025, 3, 3, 9, 30));
        assert_eq!(window.end - window.start, TimeDelta::minutes(45));
    }

    #[test]
    fn closed_day_and_outside_hours_are_closed() {
        let mut business = studio();
        let service = Service::new(business.id, "Cut", 60);
        let rules = BookingRules::default();

        let late = validate_booking_time(&business, &service, monday(), hm(16, 30), 60, &rules, last_week());
        assert!(matches!(late, Err(BookingError::Closed { .. })));

        let early = validate_booking_time(&business, &service, monday(), hm(8, 45), 60, &rules, last_week());
        assert!(matches!(early, Err(BookingError::Closed { .. })));

        business.upsert_special_date(SpecialDate::closure(monday()));
        let err = validate_booking_time(&business, &service, monday(), hm(10, 0), 60, &rules, last_week())
            .unwrap_err();
        match err {
            BookingError::Closed { reason, .. } => assert_eq!(reason, "special_closed"),
            other => panic!("expected Closed, got {other:?}"),
        }
    }

    #[test]
    fn same_day_disabled_is_too_soon_even_when_open() {
        let business = studio();
        let service = Service::new(business.id, "Cut", 60);
        let rules = BookingRules {
            same_day_booking: false,
            ..BookingRules::default()
        };
        let now = utc(2025, 3, 3, 7, 0);
        let err = validate_booking_time(&business, &service, monday(), hm(15, 0), 60, &rules, now)
            .unwrap_err();
        assert!(matches!(err, BookingError::TooSoon(_)));
        assert!(err.is_recoverable());
    }

    #[test]
    fn past_and_lead_time_are_too_soon() {
        let business = studio();
        let service = Service::new(business.id, "Cut", 30);
        let rules = BookingRules::default();
        let now = utc(2025, 3, 3, 12, 0);

        let past = validate_booking_time(&business, &service, monday(), hm(11, 0), 30, &rules, now);
        assert!(matches!(past, Err(BookingError::TooSoon(_))));

        let within_lead = validate_booking_time(&business, &service, monday(), hm(12, 30), 30, &rules, now);
        assert!(matches!(within_lead, Err(BookingError::TooSoon(_))));

        assert!(validate_booking_time(&business, &service, monday(), hm(13, 0), 30, &rules, now).is_ok());
    }

    #[test]
    fn min_notice_is_too_soon() {
        let business = studio();
        let mut service = Service::new(business.id, "Consult", 30);
        service.min_notice_hours = 48;
        let now = utc(2025, 3, 2, 9, 0);
        let result = validate_booking_time(
            &business,
            &service,
            monday(),
            hm(10, 0),
            30,
            &BookingRules::default(),
            now,
        );
        assert!(matches!(result, Err(BookingError::TooSoon(_))));
    }

    #[test]
    fn service_advance_limit_overrides_business_rule() {
        let business = studio();
        let mut service = Service::new(business.id, "Cut", 30);
        service.max_advance_booking_days = Some(3);
        let err = validate_booking_time(
            &business,
            &service,
            monday(),
            hm(10, 0),
            30,
            &BookingRules::default(),
            last_week(),
        )
        .unwrap_err();
        assert!(matches!(err, BookingError::TooFarAdvance { max_days: 3, .. }));
    }

    #[test]
    fn nonexistent_local_time_is_validation_error() {
        let tz: Tz = "America/New_York".parse().unwrap();
        let mut business = studio();
        business.timezone = tz;
        let mut hours = WeeklyHours::closed();
        hours.set(0, Some(crate::booking::model::DayHours::new(hm(0, 0), hm(12, 0))));
        business.weekly_hours = hours;
        let service = Service::new(business.id, "Cut", 30);
        let sunday = NaiveDate::from_ymd_opt(2025, 3, 9).unwrap();
        let result = validate_booking_time(
            &business,
            &service,
            sunday,
            hm(2, 30),
            30,
            &BookingRules::default(),
            utc(2025, 3, 1, 0, 0),
        );
        assert!(matches!(result, Err(BookingError::Validation(_))));
    }

    // -- check_conflicts --

    #[test]
    fn check_reports_booked_with_conflict_list() {
        let business = studio();
        let service = Service::new(business.id, "Cut", 60);
        let existing = vec![occupied("Ada", utc(2025, 3, 3, 10, 0), 60, 0)];
        let query = ConflictQuery::for_service(&service, monday(), hm(10, 30));
        let check = check_conflicts(&business, &service, &query, &existing, &BookingRules::default(), last_week())
            .unwrap();
        assert!(!check.available);
        assert_eq!(check.issue, Some(AvailabilityIssue::Booked));
        assert_eq!(check.conflicts.len(), 1);
    }

    #[test]
    fn check_distinguishes_closed_from_booked() {
        let business = studio();
        let service = Service::new(business.id, "Cut", 60);
        let saturday = NaiveDate::from_ymd_opt(2025, 3, 8).unwrap();
        let query = ConflictQuery::for_service(&service, saturday, hm(10, 0));
        let check = check_conflicts(&business, &service, &query, &[], &BookingRules::default(), last_week())
            .unwrap();
        assert!(!check.available);
        assert!(check.conflicts.is_empty());
        assert_eq!(
            check.issue,
            Some(AvailabilityIssue::Closed {
                reason: "business_closed".to_string()
            })
        );
    }

    #[test]
    fn check_excluding_self_is_available() {
        let business = studio();
        let service = Service::new(business.id, "Cut", 60);
        let existing = vec![occupied("Ada", utc(2025, 3, 3, 10, 0), 60, 0)];
        let query = ConflictQuery::for_service(&service, monday(), hm(10, 0))
            .excluding(existing[0].appointment_id);
        let check = check_conflicts(&business, &service, &query, &existing, &BookingRules::default(), last_week())
            .unwrap();
        assert!(check.available);
        assert!(check.issue.is_none());
    }

    #[test]
    fn occupancy_skips_cancelled_and_attaches_buffers() {
        use crate::booking::model::{AppointmentStatus, BookingSource, CustomerId};
        let business = studio();
        let service = Service::new(business.id, "Cut", 30);
        let make = |status| Appointment {
            id: AppointmentId::new(),
            business_id: business.id,
            service_id: service.id,
            customer_id: CustomerId::new(),
            customer_name: "Ada".to_string(),
            customer_email: None,
            customer_phone: None,
            start: utc(2025, 3, 3, 10, 0),
            end: utc(2025, 3, 3, 10, 30),
            status,
            previous_status: None,
            source: BookingSource::Dashboard,
            notes: None,
            created_at: last_week(),
            confirmed_at: None,
            completed_at: None,
            cancellation: None,
            reminder_sent_at: None,
            series_id: None,
            series_position: None,
            history: Vec::new(),
        };
        let appointments = vec![
            make(AppointmentStatus::Confirmed),
            make(AppointmentStatus::Pending),
            make(AppointmentStatus::Cancelled),
            make(AppointmentStatus::NoShow),
            make(AppointmentStatus::Completed),
        ];

        let live = occupancy(&appointments, false, |_| 10);
        assert_eq!(live.len(), 2);
        assert_eq!(live[0].blocked_window().end, utc(2025, 3, 3, 10, 40));

        let with_history = occupancy(&appointments, true, |_| 0);
        assert_eq!(with_history.len(), 3);
    }
}
