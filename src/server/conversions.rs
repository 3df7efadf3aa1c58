use chrono::{DateTime, Utc};
use rmcp::{ErrorData as McpError, model::*};
use serde::Serialize;
use serde_json::json;

use super::types::{
    BusinessInput, CustomerInput, DayHoursInput, PatternInput, ServiceInput, SpecialDateInput,
};
use crate::booking::conflict::AvailabilityIssue;
use crate::booking::model::{
    slugify, BookingSource, Business, BusinessId, CancellationSource, CustomerDetails,
    CustomerRef, DayHours, Service, SpecialDate, WeeklyHours,
};
use crate::booking::rules::BookingRules;
use crate::booking::series::MultiDayPattern;
use crate::booking::time_window::{parse_date, parse_time, parse_timezone};
use crate::error::BookingError;

pub(crate) fn parse_datetime(s: &str) -> Result<DateTime<Utc>, BookingError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    // No offset: treat as UTC
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Ok(naive.and_utc());
    }
    Err(BookingError::Validation(format!(
        "Cannot parse datetime: '{s}'. Use ISO 8601 format."
    )))
}

pub(crate) fn parse_optional_date(
    s: Option<&str>,
) -> Result<Option<chrono::NaiveDate>, BookingError> {
    s.map(parse_date).transpose()
}

pub(crate) fn weekly_hours_from_input(days: &[DayHoursInput]) -> Result<WeeklyHours, BookingError> {
    let mut hours = WeeklyHours::closed();
    let mut seen = [false; 7];
    for input in days {
        let Some(seen_day) = seen.get_mut(input.day as usize) else {
            return Err(BookingError::Validation(format!(
                "Day of week {} is out of range 0-6",
                input.day
            )));
        };
        if *seen_day {
            return Err(BookingError::Validation(format!(
                "Day of week {} is listed twice",
                input.day
            )));
        }
        *seen_day = true;

        if input.closed.unwrap_or(false) {
            continue;
        }
        let (Some(open), Some(close)) = (input.open.as_deref(), input.close.as_deref()) else {
            return Err(BookingError::Validation(format!(
                "Day {} needs open and close times, or closed: true",
                input.day
            )));
        };
        hours.set(input.day, Some(DayHours::new(parse_time(open)?, parse_time(close)?)));
    }
    Ok(hours)
}

pub(crate) fn special_date_from_input(input: &SpecialDateInput) -> Result<SpecialDate, BookingError> {
    let date = parse_date(&input.date)?;
    let closed = input.closed.unwrap_or(false);
    let hours = match (input.open_time.as_deref(), input.close_time.as_deref()) {
        (Some(open), Some(close)) => Some(DayHours::new(parse_time(open)?, parse_time(close)?)),
        (None, None) => None,
        _ => {
            return Err(BookingError::Validation(format!(
                "Special date {date} needs both openTime and closeTime"
            )))
        }
    };
    let mut special = match (closed, hours) {
        (true, _) => SpecialDate::closure(date),
        (false, Some(hours)) => SpecialDate::with_hours(date, hours),
        (false, None) => {
            return Err(BookingError::Validation(format!(
                "Special date {date} needs closed: true or openTime and closeTime"
            )))
        }
    };
    special.recurring = input.recurring.unwrap_or(false);
    special.note = input.note.clone();
    Ok(special)
}

/// Build the business to save. Fields left out keep `existing`'s values;
/// booking rules layer the settings over the existing rules or `defaults`.
pub(crate) fn business_from_input(
    input: &BusinessInput,
    existing: Option<Business>,
    defaults: &BookingRules,
) -> Result<Business, BookingError> {
    let timezone = parse_timezone(&input.timezone)?;
    let weekly_hours = weekly_hours_from_input(&input.weekly_hours)?;

    let mut business = match existing {
        Some(mut business) => {
            business.name = input.name.clone();
            business.timezone = timezone;
            business.weekly_hours = weekly_hours;
            business
        }
        None => {
            let mut business = Business::new(input.name.clone(), timezone, weekly_hours);
            business.booking_rules = defaults.clone();
            business
        }
    };

    if let Some(slug) = &input.slug {
        business.slug = slugify(slug);
    } else if business.slug.is_empty() {
        business.slug = slugify(&business.name);
    }
    if let Some(settings) = &input.settings {
        business.booking_rules = BookingRules::from_settings(settings, &business.booking_rules)?;
    }
    if let Some(specials) = &input.special_dates {
        business.special_dates.clear();
        for special in specials {
            business.upsert_special_date(special_date_from_input(special)?);
        }
    }
    Ok(business)
}

/// Build the service to save; optional fields left out keep `existing`'s
/// values, or the defaults for a new service.
pub(crate) fn service_from_input(
    input: &ServiceInput,
    business_id: BusinessId,
    existing: Option<Service>,
) -> Result<Service, BookingError> {
    let mut service = existing
        .unwrap_or_else(|| Service::new(business_id, input.name.clone(), input.duration_minutes));
    service.business_id = business_id;
    service.name = input.name.clone();
    service.duration_minutes = input.duration_minutes;
    if let Some(buffer) = input.buffer_minutes {
        service.buffer_minutes = buffer;
    }
    if let Some(use_business_hours) = input.use_business_hours {
        service.use_business_hours = use_business_hours;
    }
    if let Some(days) = &input.available_days {
        let mut days = days.clone();
        days.sort_unstable();
        days.dedup();
        service.available_days = days;
    }
    if let Some(custom) = &input.custom_availability {
        service.custom_availability = Some(weekly_hours_from_input(custom)?);
    }
    if input.max_advance_booking_days.is_some() {
        service.max_advance_booking_days = input.max_advance_booking_days;
    }
    if let Some(hours) = input.min_notice_hours {
        service.min_notice_hours = hours;
    }
    if let Some(requires_approval) = input.requires_approval {
        service.requires_approval = requires_approval;
    }
    if let Some(active) = input.active {
        service.active = active;
    }
    Ok(service)
}

pub(crate) fn customer_ref_from_input(input: &CustomerInput) -> Result<CustomerRef, BookingError> {
    if let Some(id) = &input.customer_id {
        return Ok(CustomerRef::Existing(id.parse()?));
    }
    let name = input
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| {
            BookingError::Validation("Customer needs either customerId or a name".to_string())
        })?;
    Ok(CustomerRef::Inline(CustomerDetails {
        name: name.to_string(),
        email: input.email.clone(),
        phone: input.phone.clone(),
    }))
}

pub(crate) fn pattern_from_input(input: &PatternInput) -> Result<MultiDayPattern, BookingError> {
    fn required<T: Clone>(value: &Option<T>, field: &str, kind: &str) -> Result<T, BookingError> {
        value.clone().ok_or_else(|| {
            BookingError::Validation(format!("Pattern '{kind}' requires '{field}'"))
        })
    }

    let kind = input.kind.trim().to_ascii_lowercase();
    match kind.as_str() {
        "consecutive" => Ok(MultiDayPattern::Consecutive {
            days: required(&input.days, "days", &kind)?,
        }),
        "weekly" => Ok(MultiDayPattern::Weekly {
            weekdays: required(&input.weekdays, "weekdays", &kind)?,
            week_count: required(&input.week_count, "weekCount", &kind)?,
        }),
        "custom" => {
            let dates = required(&input.dates, "dates", &kind)?
                .iter()
                .map(|d| parse_date(d))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(MultiDayPattern::Custom { dates })
        }
        "rrule" => Ok(MultiDayPattern::Rrule {
            rule: required(&input.rule, "rule", &kind)?,
            max_sessions: input.max_sessions,
        }),
        other => Err(BookingError::Validation(format!(
            "Unknown pattern type '{other}'. Use consecutive, weekly, custom or rrule."
        ))),
    }
}

pub(crate) fn parse_booking_source(s: Option<&str>) -> Result<BookingSource, BookingError> {
    match s.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
        None | Some("dashboard") => Ok(BookingSource::Dashboard),
        Some("public") => Ok(BookingSource::Public),
        Some(other) => Err(BookingError::Validation(format!(
            "Unknown booking source '{other}'. Use dashboard or public."
        ))),
    }
}

pub(crate) fn parse_cancellation_source(s: Option<&str>) -> Result<CancellationSource, BookingError> {
    match s.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
        None | Some("business") => Ok(CancellationSource::Business),
        Some("customer") => Ok(CancellationSource::Customer),
        Some(other) => Err(BookingError::Validation(format!(
            "Unknown cancellation source '{other}'. Use customer or business."
        ))),
    }
}

/// Structured body for a booking the caller can retry at another time.
pub(crate) fn rejection(err: &BookingError) -> Option<serde_json::Value> {
    if !err.is_recoverable() {
        return None;
    }
    let conflicts = match err {
        BookingError::Conflict(conflicts) => json!(conflicts),
        _ => json!([]),
    };
    let mut body = json!({
        "booked": false,
        "error": err.to_string(),
        "issue": AvailabilityIssue::from_error(err),
        "conflicts": conflicts,
    });
    if let BookingError::SeriesRejected(failures) = err {
        body["failures"] = json!(failures);
    }
    Some(body)
}

pub(crate) fn booking_err(e: BookingError) -> McpError {
    let code = if e.is_not_found() {
        ErrorCode::RESOURCE_NOT_FOUND
    } else {
        ErrorCode::INVALID_PARAMS
    };
    let data = match &e {
        BookingError::InvalidTransition { id, from, action } => Some(json!({
            "appointmentId": id,
            "status": from,
            "action": action,
        })),
        other => rejection(other),
    };
    McpError::new(code, e.to_string(), data)
}

pub(crate) fn parse_id<T>(s: &str) -> Result<T, McpError>
where
    T: std::str::FromStr<Err = BookingError>,
{
    s.parse().map_err(booking_err)
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}"))
}

pub(crate) fn json_text<T: Serialize>(value: &T) -> CallToolResult {
    CallToolResult::success(vec![Content::text(to_json(value))])
}

/// A tool-level failure the caller should act on, e.g. a taken slot.
pub(crate) fn json_error<T: Serialize>(value: &T) -> CallToolResult {
    CallToolResult::error(vec![Content::text(to_json(value))])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::booking::conflict::ConflictInfo;
    use crate::booking::model::{AppointmentId, AppointmentStatus};
    use chrono::{NaiveDate, NaiveTime, TimeZone};
    use pretty_assertions::assert_eq;

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn day(day: u8, open: &str, close: &str) -> DayHoursInput {
        DayHoursInput {
            day,
            open: Some(open.to_string()),
            close: Some(close.to_string()),
            closed: None,
        }
    }

    fn business_input() -> BusinessInput {
        BusinessInput {
            id: None,
            name: "Harbour Physio".to_string(),
            slug: None,
            timezone: "Europe/Berlin".to_string(),
            weekly_hours: vec![day(1, "09:00", "17:00"), day(2, "09:00", "12:30")],
            special_dates: None,
            settings: Some(json!({ "bookingRules": { "slotIntervalMinutes": 30 } })),
        }
    }

    fn service_input() -> ServiceInput {
        ServiceInput {
            id: None,
            name: "Assessment".to_string(),
            duration_minutes: 45,
            buffer_minutes: Some(10),
            use_business_hours: None,
            available_days: Some(vec![2, 1, 2]),
            custom_availability: None,
            max_advance_booking_days: None,
            min_notice_hours: None,
            requires_approval: None,
            active: None,
        }
    }

    #[test]
    fn parse_datetime_rfc3339() {
        let dt = parse_datetime("2025-01-15T09:00:00-05:00").unwrap();
        assert_eq!(dt, Utc.with_ymd_and_hms(2025, 1, 15, 14, 0, 0).unwrap());
    }

    #[test]
    fn parse_datetime_without_offset_is_utc() {
        let dt = parse_datetime("2025-01-15T09:00:00").unwrap();
        assert_eq!(dt, Utc.with_ymd_and_hms(2025, 1, 15, 9, 0, 0).unwrap());
    }

    #[test]
    fn parse_datetime_invalid() {
        assert!(parse_datetime("not a date").is_err());
    }

    #[test]
    fn weekly_hours_lists_only_open_days() {
        let hours = weekly_hours_from_input(&[
            day(1, "09:00", "17:00"),
            DayHoursInput {
                day: 6,
                open: None,
                close: None,
                closed: Some(true),
            },
        ])
        .unwrap();
        assert_eq!(hours.get(1), Some(DayHours::new(hm(9, 0), hm(17, 0))));
        assert_eq!(hours.get(6), None);
        assert_eq!(hours.get(0), None);
    }

    #[test]
    fn weekly_hours_rejects_bad_days() {
        assert!(weekly_hours_from_input(&[day(7, "09:00", "17:00")]).is_err());
        assert!(
            weekly_hours_from_input(&[day(1, "09:00", "17:00"), day(1, "10:00", "11:00")]).is_err()
        );
        let missing_close = DayHoursInput {
            day: 3,
            open: Some("09:00".to_string()),
            close: None,
            closed: None,
        };
        assert!(weekly_hours_from_input(&[missing_close]).is_err());
    }

    #[test]
    fn new_business_layers_settings_over_defaults() {
        let defaults = BookingRules {
            advance_booking_days: 14,
            ..BookingRules::default()
        };
        let business = business_from_input(&business_input(), None, &defaults).unwrap();
        assert_eq!(business.slug, "harbour-physio");
        assert_eq!(business.timezone, chrono_tz::Europe::Berlin);
        assert_eq!(business.booking_rules.slot_interval_minutes, 30);
        assert_eq!(business.booking_rules.advance_booking_days, 14);
    }

    #[test]
    fn existing_business_keeps_id_and_special_dates() {
        let defaults = BookingRules::default();
        let mut existing = business_from_input(&business_input(), None, &defaults).unwrap();
        existing.upsert_special_date(SpecialDate::closure(NaiveDate::from_ymd_opt(2025, 12, 25).unwrap()));

        let mut input = business_input();
        input.name = "Harbour Physio & Sports".to_string();
        input.settings = None;
        let updated = business_from_input(&input, Some(existing.clone()), &defaults).unwrap();
        assert_eq!(updated.id, existing.id);
        assert_eq!(updated.slug, "harbour-physio");
        assert_eq!(updated.special_dates.len(), 1);
        assert_eq!(updated.booking_rules.slot_interval_minutes, 30);
    }

    #[test]
    fn special_date_with_partial_hours_is_rejected() {
        let input = SpecialDateInput {
            date: "2025-12-24".to_string(),
            closed: None,
            open_time: Some("09:00".to_string()),
            close_time: None,
            recurring: Some(true),
            note: None,
        };
        assert!(special_date_from_input(&input).is_err());
    }

    #[test]
    fn service_input_dedups_days_and_keeps_existing_fields() {
        let bid = BusinessId::new();
        let created = service_from_input(&service_input(), bid, None).unwrap();
        assert_eq!(created.available_days, vec![1, 2]);
        assert_eq!(created.buffer_minutes, 10);
        assert!(created.active);

        let mut existing = created.clone();
        existing.min_notice_hours = 24;
        let mut input = service_input();
        input.buffer_minutes = None;
        input.duration_minutes = 60;
        let updated = service_from_input(&input, bid, Some(existing)).unwrap();
        assert_eq!(updated.id, created.id);
        assert_eq!(updated.duration_minutes, 60);
        assert_eq!(updated.buffer_minutes, 10);
        assert_eq!(updated.min_notice_hours, 24);
    }

    #[test]
    fn customer_input_prefers_id() {
        let id = crate::booking::model::CustomerId::new();
        let input = CustomerInput {
            customer_id: Some(id.to_string()),
            name: None,
            email: None,
            phone: None,
        };
        assert_eq!(customer_ref_from_input(&input).unwrap(), CustomerRef::Existing(id));

        let anonymous = CustomerInput {
            customer_id: None,
            name: Some("  ".to_string()),
            email: Some("a@example.com".to_string()),
            phone: None,
        };
        assert!(customer_ref_from_input(&anonymous).is_err());
    }

    #[test]
    fn pattern_input_by_type() {
        let weekly = PatternInput {
            kind: "Weekly".to_string(),
            days: None,
            weekdays: Some(vec![1, 3]),
            week_count: Some(2),
            dates: None,
            rule: None,
            max_sessions: None,
        };
        assert_eq!(
            pattern_from_input(&weekly).unwrap(),
            MultiDayPattern::Weekly {
                weekdays: vec![1, 3],
                week_count: 2
            }
        );

        let missing = PatternInput {
            kind: "consecutive".to_string(),
            days: None,
            ..weekly.clone()
        };
        let err = pattern_from_input(&missing).unwrap_err();
        assert!(err.to_string().contains("'days'"));

        let unknown = PatternInput {
            kind: "fortnightly".to_string(),
            ..weekly
        };
        assert!(pattern_from_input(&unknown).is_err());
    }

    #[test]
    fn sources_default_and_reject_unknown() {
        assert_eq!(parse_booking_source(None).unwrap(), BookingSource::Dashboard);
        assert_eq!(parse_booking_source(Some("PUBLIC")).unwrap(), BookingSource::Public);
        assert!(parse_booking_source(Some("phone")).is_err());
        assert_eq!(
            parse_cancellation_source(Some("customer")).unwrap(),
            CancellationSource::Customer
        );
        assert_eq!(parse_cancellation_source(None).unwrap(), CancellationSource::Business);
    }

    #[test]
    fn booking_err_maps_not_found_to_resource_not_found() {
        let err = booking_err(BookingError::AppointmentNotFound("test".to_string()));
        assert_eq!(err.code, ErrorCode::RESOURCE_NOT_FOUND);
        assert!(err.data.is_none());
    }

    #[test]
    fn booking_err_maps_validation_to_invalid_params() {
        let err = booking_err(BookingError::Validation("bad".to_string()));
        assert_eq!(err.code, ErrorCode::INVALID_PARAMS);
    }

    #[test]
    fn booking_err_carries_conflicts() {
        let start = Utc.with_ymd_and_hms(2025, 3, 3, 10, 0, 0).unwrap();
        let conflict = ConflictInfo {
            appointment_id: AppointmentId::new(),
            start,
            end: start + chrono::TimeDelta::hours(1),
            start_time: hm(10, 0),
            end_time: hm(11, 0),
            customer_name: "Ada".to_string(),
        };
        let err = booking_err(BookingError::Conflict(vec![conflict]));
        assert_eq!(err.code, ErrorCode::INVALID_PARAMS);
        let data = err.data.unwrap();
        assert_eq!(data["booked"], json!(false));
        assert_eq!(data["issue"]["kind"], json!("booked"));
        assert_eq!(data["conflicts"][0]["customerName"], json!("Ada"));
    }

    #[test]
    fn booking_err_describes_invalid_transition() {
        let err = booking_err(BookingError::InvalidTransition {
            id: "abc".to_string(),
            from: AppointmentStatus::Completed,
            action: "cancel",
        });
        let data = err.data.unwrap();
        assert_eq!(data["status"], json!("COMPLETED"));
        assert_eq!(data["action"], json!("cancel"));
    }
}
