use chrono::{DateTime, Days, NaiveDate, NaiveTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use super::conflict::Occupied;
use super::model::{Business, DayHours, Service};
use super::rules::{resolve_day_rules, BookingRules, DayRuleReason};
use super::time_window::{
    hhmm, hhmm_opt, local_date, local_time, localize, minute_of_day, time_from_minutes,
    weekday_index, TimeWindow,
};
use crate::error::BookingError;

/// Longest span `availability_range` will expand in one call.
pub const MAX_RANGE_DAYS: u64 = 366;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnavailableReason {
    Past,
    SameDayLeadTime,
    MinNotice,
    TooFarAdvance,
    Booked,
}

/// One candidate start. `start_time`/`end_time` are local wall clock,
/// `start`/`end` the absolute instants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Slot {
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    #[serde(with = "hhmm")]
    pub end_time: NaiveTime,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<UnavailableReason>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayInfo {
    pub date: NaiveDate,
    /// 0 = Sunday.
    pub day_of_week: u8,
    pub is_open: bool,
    pub reason: DayRuleReason,
    #[serde(with = "hhmm_opt")]
    pub open_time: Option<NaiveTime>,
    #[serde(with = "hhmm_opt")]
    pub close_time: Option<NaiveTime>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayAvailability {
    pub date: NaiveDate,
    pub is_open: bool,
    pub business_hours: Option<DayHours>,
    pub day_info: DayInfo,
    pub slots: Vec<Slot>,
}

impl DayAvailability {
    pub fn available_slots(&self) -> impl Iterator<Item = &Slot> {
        self.slots.iter().filter(|s| s.available)
    }

    pub fn has_available(&self) -> bool {
        self.slots.iter().any(|s| s.available)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NextAvailable {
    pub date: NaiveDate,
    pub slot: Slot,
}

/// First booking-window rule a start instant breaks, if any.
///
/// Checked in order: past, same-day lead time, service minimum notice,
/// advance limit. "Today" is the current date in the business timezone.
pub fn booking_window_violation(
    business: &Business,
    service: &Service,
    date: NaiveDate,
    start: DateTime<Utc>,
    rules: &BookingRules,
    now: DateTime<Utc>,
) -> Option<UnavailableReason> {
    if start < now {
        return Some(UnavailableReason::Past);
    }

    let today = local_date(now, business.timezone);
    if date == today && !rules.same_day_booking {
        return Some(UnavailableReason::SameDayLeadTime);
    }
    let lead = now.checked_add_signed(TimeDelta::minutes(i64::from(rules.same_day_lead_time_minutes)));
    if lead.map_or(true, |earliest| start < earliest) {
        return Some(UnavailableReason::SameDayLeadTime);
    }
    let notice = now.checked_add_signed(TimeDelta::hours(i64::from(service.min_notice_hours)));
    if notice.map_or(true, |earliest| start < earliest) {
        return Some(UnavailableReason::MinNotice);
    }

    let max_days = service
        .max_advance_booking_days
        .unwrap_or(rules.advance_booking_days);
    let last_bookable = today.checked_add_days(Days::new(max_days as u64));
    if last_bookable.map_or(true, |last| date > last) {
        return Some(UnavailableReason::TooFarAdvance);
    }
    None
}

/// Candidate slots for one service on one local date.
pub fn generate_day_availability(
    business: &Business,
    service: &Service,
    date: NaiveDate,
    occupied: &[Occupied],
    rules: &BookingRules,
    now: DateTime<Utc>,
) -> DayAvailability {
    let rule = resolve_day_rules(business, service, date);
    let day_info = DayInfo {
        date,
        day_of_week: weekday_index(date),
        is_open: rule.is_open,
        reason: rule.reason,
        open_time: rule.open_time,
        close_time: rule.close_time,
    };

    let Some(hours) = rule.hours() else {
        return DayAvailability {
            date,
            is_open: false,
            business_hours: None,
            day_info,
            slots: Vec::new(),
        };
    };

    let tz = business.timezone;
    let interval = rules.slot_interval_minutes.max(1);
    let close = minute_of_day(hours.close);
    let mut slots = Vec::new();
    let mut minute = minute_of_day(hours.open);

    while minute + service.duration_minutes <= close {
        // Local times inside a DST gap have no instant and are skipped.
        if let Some(start) = time_from_minutes(minute).and_then(|t| localize(tz, date, t)) {
            let window = TimeWindow::starting_at(start, service.duration_minutes);
            let buffered = window.expand_end(service.buffer_minutes);
            let reason = booking_window_violation(business, service, date, start, rules, now)
                .or_else(|| {
                    occupied
                        .iter()
                        .any(|o| buffered.overlaps(&o.blocked_window()))
                        .then_some(UnavailableReason::Booked)
                });
            slots.push(Slot {
                start_time: local_time(window.start, tz),
                end_time: local_time(window.end, tz),
                start: window.start,
                end: window.end,
                available: reason.is_none(),
                reason,
            });
        }
        minute += interval;
    }

    DayAvailability {
        date,
        is_open: true,
        business_hours: Some(hours),
        day_info,
        slots,
    }
}

/// Inclusive day range, one entry per calendar date in order.
/// `occupied` must cover the whole range.
pub fn generate_detailed_availability_range(
    business: &Business,
    service: &Service,
    start: NaiveDate,
    end: NaiveDate,
    occupied: &[Occupied],
    rules: &BookingRules,
    now: DateTime<Utc>,
) -> Result<Vec<DayAvailability>, BookingError> {
    if end < start {
        return Err(BookingError::Validation(format!(
            "Range end {end} is before start {start}"
        )));
    }
    let span = (end - start).num_days() as u64 + 1;
    if span > MAX_RANGE_DAYS {
        return Err(BookingError::Validation(format!(
            "Range of {span} days exceeds the {MAX_RANGE_DAYS}-day limit"
        )));
    }

    Ok(start
        .iter_days()
        .take_while(|d| *d <= end)
        .map(|date| generate_day_availability(business, service, date, occupied, rules, now))
        .collect())
}

/// First day with an open slot; within it, the slot nearest `preferred`
/// (earliest on ties), or simply the first available slot.
pub fn find_next_available_slot(
    days: &[DayAvailability],
    preferred: Option<NaiveTime>,
) -> Option<NextAvailable> {
    let day = days.iter().find(|d| d.has_available())?;
    let slot = match preferred {
        None => day.available_slots().next(),
        Some(time) => {
            let target = minute_of_day(time) as i64;
            day.available_slots()
                .min_by_key(|s| ((minute_of_day(s.start_time) as i64 - target).abs(), s.start))
        }
    }?;
    Some(NextAvailable {
        date: day.date,
        slot: slot.clone(),
    })
}

/// Slots of `day` starting within `range_minutes` of `around`.
pub fn get_slots_around_time(day: &DayAvailability, around: NaiveTime, range_minutes: u32) -> Vec<Slot> {
    let target = minute_of_day(around) as i64;
    day.slots
        .iter()
        .filter(|s| (minute_of_day(s.start_time) as i64 - target).abs() <= range_minutes as i64)
        .cloned()
        .collect()
}
