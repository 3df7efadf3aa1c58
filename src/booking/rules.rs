use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::model::{Business, DayHours, Service, SpecialDate};
use super::time_window::{hhmm_opt, weekday_index};
use crate::error::BookingError;

pub const DEFAULT_SLOT_INTERVAL_MINUTES: u32 = 15;
pub const DEFAULT_ADVANCE_BOOKING_DAYS: u32 = 60;
pub const DEFAULT_SAME_DAY_LEAD_MINUTES: u32 = 60;

/// Typed booking settings for a business. Parsed once from the business
/// `settings` JSON; every missing field takes the default below.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BookingRules {
    /// Step between candidate slot starts. Default 15.
    pub slot_interval_minutes: u32,
    /// How far ahead customers may book. Default 60 days.
    pub advance_booking_days: u32,
    /// Whether slots on the current local day can be booked at all. Default true.
    pub same_day_booking: bool,
    /// Minimum lead time for same-day slots. Default 60 minutes.
    pub same_day_lead_time_minutes: u32,
    /// Public bookings start PENDING until the business confirms. Default false.
    pub require_approval: bool,
    /// COMPLETED appointments keep blocking their slot. Default false.
    pub completed_blocks_slots: bool,
}

impl Default for BookingRules {
    fn default() -> Self {
        Self {
            slot_interval_minutes: DEFAULT_SLOT_INTERVAL_MINUTES,
            advance_booking_days: DEFAULT_ADVANCE_BOOKING_DAYS,
            same_day_booking: true,
            same_day_lead_time_minutes: DEFAULT_SAME_DAY_LEAD_MINUTES,
            require_approval: false,
            completed_blocks_slots: false,
        }
    }
}

impl BookingRules {
    /// Layer a settings blob over `base`. Accepts either the rules object
    /// itself or a wrapper with a `bookingRules` key; unknown keys are ignored.
    pub fn from_settings(settings: &Value, base: &BookingRules) -> Result<Self, BookingError> {
        let overrides = settings.get("bookingRules").unwrap_or(settings);
        if overrides.is_null() {
            return Ok(base.clone());
        }
        let Value::Object(fields) = overrides else {
            return Err(BookingError::Validation(
                "Booking rules must be a JSON object".to_string(),
            ));
        };

        let mut merged = serde_json::to_value(base)
            .map_err(|e| BookingError::Validation(format!("Invalid booking rules: {e}")))?;
        if let Value::Object(target) = &mut merged {
            for (key, value) in fields {
                target.insert(key.clone(), value.clone());
            }
        }

        let rules: BookingRules = serde_json::from_value(merged)
            .map_err(|e| BookingError::Validation(format!("Invalid booking rules: {e}")))?;
        rules.validate()?;
        Ok(rules)
    }

    pub fn validate(&self) -> Result<(), BookingError> {
        if self.slot_interval_minutes == 0 || self.slot_interval_minutes > 24 * 60 {
            return Err(BookingError::Validation(format!(
                "slotIntervalMinutes must be between 1 and 1440, got {}",
                self.slot_interval_minutes
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DayRuleReason {
    BusinessHours,
    CustomHours,
    SpecialHours,
    SpecialClosed,
    BusinessClosed,
    CustomClosed,
    ServiceDayExcluded,
    InvalidHours,
}

impl DayRuleReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DayRuleReason::BusinessHours => "business_hours",
            DayRuleReason::CustomHours => "custom_hours",
            DayRuleReason::SpecialHours => "special_hours",
            DayRuleReason::SpecialClosed => "special_closed",
            DayRuleReason::BusinessClosed => "business_closed",
            DayRuleReason::CustomClosed => "custom_closed",
            DayRuleReason::ServiceDayExcluded => "service_day_excluded",
            DayRuleReason::InvalidHours => "invalid_hours",
        }
    }
}

/// Effective open/closed schedule of one service on one calendar date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayRule {
    pub is_open: bool,
    #[serde(with = "hhmm_opt")]
    pub open_time: Option<NaiveTime>,
    #[serde(with = "hhmm_opt")]
    pub close_time: Option<NaiveTime>,
    pub reason: DayRuleReason,
}

impl DayRule {
    fn open(hours: DayHours, reason: DayRuleReason) -> Self {
        if !hours.is_valid() {
            return Self::closed(DayRuleReason::InvalidHours);
        }
        Self {
            is_open: true,
            open_time: Some(hours.open),
            close_time: Some(hours.close),
            reason,
        }
    }

    fn closed(reason: DayRuleReason) -> Self {
        Self {
            is_open: false,
            open_time: None,
            close_time: None,
            reason,
        }
    }

    pub fn hours(&self) -> Option<DayHours> {
        match (self.is_open, self.open_time, self.close_time) {
            (true, Some(open), Some(close)) => Some(DayHours::new(open, close)),
            _ => None,
        }
    }
}

/// Merge weekly hours, special dates and the service's own availability into
/// the schedule for `date`.
///
/// Special dates beat weekly/custom hours; the service's weekday restriction
/// beats everything, special dates included.
pub fn resolve_day_rules(business: &Business, service: &Service, date: NaiveDate) -> DayRule {
    let weekday = weekday_index(date);

    let base = match business.special_date_for(date) {
        Some(special) if special.closed => DayRule::closed(DayRuleReason::SpecialClosed),
        Some(SpecialDate {
            hours: Some(hours), ..
        }) => DayRule::open(*hours, DayRuleReason::SpecialHours),
        _ => weekly_rule(business, service, weekday),
    };

    if !service.offered_on(weekday) {
        return DayRule::closed(DayRuleReason::ServiceDayExcluded);
    }
    base
}

fn weekly_rule(business: &Business, service: &Service, weekday: u8) -> DayRule {
    if service.use_business_hours {
        return match business.weekly_hours.get(weekday) {
            Some(hours) => DayRule::open(hours, DayRuleReason::BusinessHours),
            None => DayRule::closed(DayRuleReason::BusinessClosed),
        };
    }
    match service
        .custom_availability
        .as_ref()
        .and_then(|custom| custom.get(weekday))
    {
        Some(hours) => DayRule::open(hours, DayRuleReason::CustomHours),
        None => DayRule::closed(DayRuleReason::CustomClosed),
    }
}
