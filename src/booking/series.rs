use chrono::{DateTime, Days, NaiveDate, NaiveTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::conflict::{check_conflicts, AvailabilityIssue, ConflictInfo, ConflictQuery};
use super::lifecycle::{book_session, cancel_in, record_bookings, resolve_customer, Session};
use super::model::{
    Appointment, AppointmentId, BookingSource, BusinessId, CancellationSource, CustomerRef,
    SeriesId, ServiceId,
};
use super::store::BookingRepository;
use super::time_window::{format_hhmm, hhmm, local_time, localize, weekday_index, TimeWindow};
use super::{
    load_appointment, load_bookable_service, load_business, occupied_between, BookingEngine,
};
use crate::error::BookingError;

/// Most sessions one multi-day booking may create.
pub const MAX_SERIES_SESSIONS: usize = 100;

/// How a series repeats from its start date. Weekdays are 0 = Sunday.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum MultiDayPattern {
    Consecutive {
        days: u32,
    },
    #[serde(rename_all = "camelCase")]
    Weekly {
        weekdays: Vec<u8>,
        week_count: u32,
    },
    Custom {
        dates: Vec<NaiveDate>,
    },
    /// RFC 5545 rule body such as `FREQ=WEEKLY;BYDAY=TU,TH;COUNT=6`,
    /// anchored at the start date.
    #[serde(rename_all = "camelCase")]
    Rrule {
        rule: String,
        max_sessions: Option<u32>,
    },
}

/// Expand a pattern into ascending, de-duplicated calendar dates.
pub fn generate_dates(
    start_date: NaiveDate,
    pattern: &MultiDayPattern,
) -> Result<Vec<NaiveDate>, BookingError> {
    let dates = match pattern {
        MultiDayPattern::Consecutive { days } => {
            if *days == 0 {
                return Err(BookingError::Validation(
                    "Consecutive pattern needs at least one day".to_string(),
                ));
            }
            check_session_count(*days as usize)?;
            start_date.iter_days().take(*days as usize).collect()
        }
        MultiDayPattern::Weekly {
            weekdays,
            week_count,
        } => weekly_dates(start_date, weekdays, *week_count)?,
        MultiDayPattern::Custom { dates } => {
            let mut dates = dates.clone();
            dates.sort();
            dates.dedup();
            dates
        }
        MultiDayPattern::Rrule { rule, max_sessions } => {
            rrule_dates(start_date, rule, *max_sessions)?
        }
    };

    if dates.is_empty() {
        return Err(BookingError::Validation(
            "Pattern produced no dates".to_string(),
        ));
    }
    check_session_count(dates.len())?;
    Ok(dates)
}

fn weekly_dates(
    start_date: NaiveDate,
    weekdays: &[u8],
    week_count: u32,
) -> Result<Vec<NaiveDate>, BookingError> {
    if weekdays.is_empty() || week_count == 0 {
        return Err(BookingError::Validation(
            "Weekly pattern needs weekdays and at least one week".to_string(),
        ));
    }
    if let Some(day) = weekdays.iter().find(|d| **d > 6) {
        return Err(BookingError::Validation(format!(
            "Weekday {day} is out of range 0-6"
        )));
    }
    let mut days = weekdays.to_vec();
    days.sort_unstable();
    days.dedup();
    check_session_count(days.len() * week_count as usize)?;

    let week_start = start_date
        .checked_sub_days(Days::new(u64::from(weekday_index(start_date))))
        .ok_or_else(|| BookingError::Validation(format!("Date {start_date} is out of range")))?;
    let mut dates = Vec::new();
    for week in 0..u64::from(week_count) {
        for day in &days {
            let date = week_start
                .checked_add_days(Days::new(week * 7 + u64::from(*day)))
                .ok_or_else(|| BookingError::Validation("Pattern runs past the calendar".to_string()))?;
            if date >= start_date {
                dates.push(date);
            }
        }
    }
    Ok(dates)
}

fn rrule_dates(
    start_date: NaiveDate,
    rule: &str,
    max_sessions: Option<u32>,
) -> Result<Vec<NaiveDate>, BookingError> {
    let rule = rule.trim().trim_start_matches("RRULE:");
    let rrule_str = format!("DTSTART:{}T000000Z\nRRULE:{}", start_date.format("%Y%m%d"), rule);
    let rrule_set: rrule::RRuleSet = rrule_str
        .parse()
        .map_err(|e| BookingError::Validation(format!("Invalid recurrence rule '{rule}': {e}")))?;

    let limit = max_sessions
        .map_or(MAX_SERIES_SESSIONS, |m| (m as usize).min(MAX_SERIES_SESSIONS))
        .max(1);
    // One extra so an unbounded rule is reported instead of silently cut.
    let result = rrule_set.all((limit + 1) as u16);
    let occurrences = result.dates.len();
    let mut dates: Vec<NaiveDate> = result.dates.iter().map(|dt| dt.date_naive()).collect();
    dates.dedup();
    // Sessions are one per date; sub-daily rules would be cut short by the dedup.
    if dates.len() < occurrences {
        return Err(BookingError::Validation(format!(
            "Recurrence rule '{rule}' repeats within a day; use FREQ=DAILY or coarser"
        )));
    }
    if dates.len() > limit {
        if max_sessions.is_some() {
            dates.truncate(limit);
        } else {
            return Err(BookingError::Validation(format!(
                "Recurrence rule yields more than {MAX_SERIES_SESSIONS} sessions; add COUNT or UNTIL"
            )));
        }
    }
    Ok(dates)
}

fn check_session_count(count: usize) -> Result<(), BookingError> {
    if count > MAX_SERIES_SESSIONS {
        return Err(BookingError::Validation(format!(
            "Series of {count} sessions exceeds the limit of {MAX_SERIES_SESSIONS}"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSlot {
    pub date: NaiveDate,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    #[serde(with = "hhmm")]
    pub end_time: NaiveTime,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// The same local start time on every date.
pub fn generate_slots(
    dates: &[NaiveDate],
    start_time: NaiveTime,
    duration_minutes: u32,
    tz: Tz,
) -> Result<Vec<SessionSlot>, BookingError> {
    dates
        .iter()
        .map(|date| {
            let start = localize(tz, *date, start_time).ok_or_else(|| {
                BookingError::Validation(format!(
                    "{} {} does not exist in {}",
                    date,
                    format_hhmm(start_time),
                    tz.name()
                ))
            })?;
            let window = TimeWindow::starting_at(start, duration_minutes);
            Ok(SessionSlot {
                date: *date,
                start_time,
                end_time: local_time(window.end, tz),
                start: window.start,
                end: window.end,
            })
        })
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionAvailability {
    #[serde(flatten)]
    pub slot: SessionSlot,
    pub available: bool,
    pub issue: Option<AvailabilityIssue>,
    pub conflicts: Vec<ConflictInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionFailure {
    pub date: NaiveDate,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    pub issue: Option<AvailabilityIssue>,
    pub message: String,
    pub conflicts: Vec<ConflictInfo>,
}

impl SessionFailure {
    fn from_error(date: NaiveDate, start_time: NaiveTime, err: &BookingError) -> Self {
        let conflicts = match err {
            BookingError::Conflict(conflicts) => conflicts.clone(),
            _ => Vec::new(),
        };
        Self {
            date,
            start_time,
            issue: AvailabilityIssue::from_error(err),
            message: err.to_string(),
            conflicts,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MultiDayRequest {
    pub business_id: BusinessId,
    pub service_id: ServiceId,
    pub start_date: NaiveDate,
    pub pattern: MultiDayPattern,
    pub start_time: NaiveTime,
    pub customer: CustomerRef,
    pub notes: Option<String>,
    pub source: BookingSource,
    /// Book the sessions that fit and report the rest, instead of all-or-nothing.
    pub allow_partial: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiDayResult {
    pub success: bool,
    pub series_id: Option<SeriesId>,
    pub appointments: Vec<Appointment>,
    pub failures: Vec<SessionFailure>,
}

impl<R: BookingRepository> BookingEngine<R> {
    /// Per-session verdicts for a pattern without booking anything.
    ///
    /// Sessions are checked in date order the way creation books them, so a
    /// session that collides with an earlier available session of the same
    /// pattern is reported as booked.
    pub fn check_multi_day_availability(
        &self,
        business_id: &BusinessId,
        service_id: &ServiceId,
        start_date: NaiveDate,
        pattern: &MultiDayPattern,
        start_time: NaiveTime,
        now: DateTime<Utc>,
    ) -> Result<Vec<SessionAvailability>, BookingError> {
        let business = load_business(&self.repo, business_id)?;
        let service = load_bookable_service(&self.repo, &business, service_id)?;
        let dates = generate_dates(start_date, pattern)?;
        let slots = generate_slots(&dates, start_time, service.duration_minutes, business.timezone)?;
        let (Some(first), Some(last)) = (dates.first(), dates.last()) else {
            return Ok(Vec::new());
        };
        let occupied = occupied_between(&self.repo, &business, *first, *last)?;

        let mut earlier: Vec<TimeWindow> = Vec::new();
        slots
            .into_iter()
            .map(|slot| {
                let query = ConflictQuery::for_service(&service, slot.date, slot.start_time);
                let check = check_conflicts(
                    &business,
                    &service,
                    &query,
                    &occupied,
                    &business.booking_rules,
                    now,
                )?;
                let buffered = TimeWindow::new(slot.start, slot.end).expand_end(service.buffer_minutes);
                let mut issue = check.issue;
                if issue.is_none() && earlier.iter().any(|w| w.overlaps(&buffered)) {
                    issue = Some(AvailabilityIssue::Booked);
                }
                if issue.is_none() {
                    earlier.push(buffered);
                }
                Ok(SessionAvailability {
                    slot,
                    available: issue.is_none(),
                    issue,
                    conflicts: check.conflicts,
                })
            })
            .collect()
    }

    /// Book every session of a pattern as one series.
    ///
    /// Each session is validated and conflict-checked against the store as
    /// it stands, including sessions booked earlier in the same call. Without
    /// `allow_partial` a single failure rolls back the whole series.
    pub fn create_multi_day_appointment(
        &mut self,
        request: MultiDayRequest,
        now: DateTime<Utc>,
    ) -> Result<MultiDayResult, BookingError> {
        let outcome = self.repo.transaction(|tx| {
            let business = load_business(tx, &request.business_id)?;
            let service = load_bookable_service(tx, &business, &request.service_id)?;
            let dates = generate_dates(request.start_date, &request.pattern)?;
            let customer = resolve_customer(tx, &business, &request.customer)?;
            let series_id = SeriesId::new();

            let mut appointments = Vec::with_capacity(dates.len());
            let mut failures = Vec::new();
            for (position, date) in dates.iter().enumerate() {
                let session = Session {
                    date: *date,
                    start_time: request.start_time,
                    series: Some((series_id, position as u32 + 1)),
                };
                match book_session(
                    tx,
                    &business,
                    &service,
                    &customer,
                    &session,
                    request.source,
                    request.notes.clone(),
                    false,
                    now,
                ) {
                    Ok(appt) => appointments.push(appt),
                    Err(err) if err.is_recoverable() || matches!(err, BookingError::Validation(_)) => {
                        debug!(%err, date = %date, "series session rejected");
                        failures.push(SessionFailure::from_error(*date, request.start_time, &err));
                    }
                    Err(err) => return Err(err),
                }
            }

            if !failures.is_empty() && !request.allow_partial {
                return Err(BookingError::SeriesRejected(failures));
            }
            record_bookings(tx, customer, appointments.len() as u32, now)?;
            Ok(MultiDayResult {
                success: !appointments.is_empty(),
                series_id: (!appointments.is_empty()).then_some(series_id),
                appointments,
                failures,
            })
        });

        match outcome {
            Ok(result) => {
                info!(
                    series = ?result.series_id,
                    booked = result.appointments.len(),
                    failed = result.failures.len(),
                    "multi-day booking"
                );
                Ok(result)
            }
            Err(BookingError::SeriesRejected(failures)) => {
                info!(failed = failures.len(), "multi-day booking rejected");
                Ok(MultiDayResult {
                    success: false,
                    series_id: None,
                    appointments: Vec::new(),
                    failures,
                })
            }
            Err(err) => Err(err),
        }
    }

    /// All members of the series `member` belongs to, by start time. An
    /// appointment outside any series is its own series of one.
    pub fn get_appointment_series(
        &self,
        member: &AppointmentId,
    ) -> Result<Vec<Appointment>, BookingError> {
        let appt = load_appointment(&self.repo, member)?;
        match appt.series_id {
            Some(series_id) => self.repo.find_series(&series_id),
            None => Ok(vec![appt]),
        }
    }

    /// Cancel every live member of `member`'s series; returns how many changed.
    /// Completed, no-show and already cancelled members are left alone.
    pub fn cancel_appointment_series(
        &mut self,
        member: &AppointmentId,
        source: CancellationSource,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<usize, BookingError> {
        let members = self.get_appointment_series(member)?;
        let cancelled = self.repo.transaction(|tx| {
            let mut count = 0;
            for appt in members.iter().filter(|a| !a.status.is_terminal()) {
                if cancel_in(tx, &appt.id, source, reason.clone(), now)?.changed {
                    count += 1;
                }
            }
            Ok(count)
        })?;
        info!(member = %member, cancelled, "series cancelled");
        Ok(cancelled)
    }
}
