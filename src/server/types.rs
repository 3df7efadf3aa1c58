use schemars::JsonSchema;
use serde::Deserialize;

// -- Shared input shapes --

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DayHoursInput {
    #[schemars(description = "Day of week, 0 = Sunday through 6 = Saturday")]
    pub(crate) day: u8,
    #[schemars(description = "Opening time 'HH:MM' (local to the business)")]
    pub(crate) open: Option<String>,
    #[schemars(description = "Closing time 'HH:MM'. Must be after the opening time.")]
    pub(crate) close: Option<String>,
    #[schemars(description = "Set true to mark the day closed. Defaults to false.")]
    pub(crate) closed: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SpecialDateInput {
    #[schemars(description = "Date 'YYYY-MM-DD'")]
    pub(crate) date: String,
    #[schemars(description = "Closed all day. Defaults to false.")]
    pub(crate) closed: Option<bool>,
    #[schemars(description = "Override opening time 'HH:MM' when not closed")]
    pub(crate) open_time: Option<String>,
    #[schemars(description = "Override closing time 'HH:MM' when not closed")]
    pub(crate) close_time: Option<String>,
    #[schemars(description = "Repeat every year on the same month and day. Defaults to false.")]
    pub(crate) recurring: Option<bool>,
    #[schemars(description = "Free-text note, e.g. 'Christmas'")]
    pub(crate) note: Option<String>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct BusinessInput {
    #[schemars(description = "Existing business ID to update. Omit to create a new business.")]
    pub(crate) id: Option<String>,
    #[schemars(description = "Business display name")]
    pub(crate) name: String,
    #[schemars(description = "URL slug. Derived from the name when omitted.")]
    pub(crate) slug: Option<String>,
    #[schemars(description = "IANA timezone name (e.g. 'Europe/Berlin')")]
    pub(crate) timezone: String,
    #[schemars(description = "Weekly opening hours. Days not listed are closed.")]
    pub(crate) weekly_hours: Vec<DayHoursInput>,
    #[schemars(description = "Holidays and one-off hour changes")]
    pub(crate) special_dates: Option<Vec<SpecialDateInput>>,
    #[schemars(description = "Settings object. Booking rules are read from its 'bookingRules' key (or the object itself): slotIntervalMinutes, advanceBookingDays, sameDayBooking, sameDayLeadTimeMinutes, requireApproval, completedBlocksSlots.")]
    pub(crate) settings: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ServiceInput {
    #[schemars(description = "Existing service ID to update. Omit to create a new service.")]
    pub(crate) id: Option<String>,
    #[schemars(description = "Service name")]
    pub(crate) name: String,
    #[schemars(description = "Appointment length in minutes (1-1440)")]
    pub(crate) duration_minutes: u32,
    #[schemars(description = "Minutes kept free after each appointment. Defaults to 0.")]
    pub(crate) buffer_minutes: Option<u32>,
    #[schemars(description = "Follow the business's weekly hours. Defaults to true.")]
    pub(crate) use_business_hours: Option<bool>,
    #[schemars(description = "Days the service is offered (0 = Sunday). Empty or omitted means every open day.")]
    pub(crate) available_days: Option<Vec<u8>>,
    #[schemars(description = "Service-specific weekly hours, required when useBusinessHours is false")]
    pub(crate) custom_availability: Option<Vec<DayHoursInput>>,
    #[schemars(description = "Per-service advance booking limit in days, overriding the business rule")]
    pub(crate) max_advance_booking_days: Option<u32>,
    #[schemars(description = "Minimum hours between now and the appointment start. Defaults to 0.")]
    pub(crate) min_notice_hours: Option<u32>,
    #[schemars(description = "Public bookings need confirmation. Defaults to false.")]
    pub(crate) requires_approval: Option<bool>,
    #[schemars(description = "Inactive services cannot be booked. Defaults to true.")]
    pub(crate) active: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CustomerInput {
    #[schemars(description = "Existing customer ID. When given, the other fields are ignored.")]
    pub(crate) customer_id: Option<String>,
    #[schemars(description = "Customer name")]
    pub(crate) name: Option<String>,
    #[schemars(description = "Customer email. Matches an existing customer of the business case-insensitively.")]
    pub(crate) email: Option<String>,
    #[schemars(description = "Customer phone")]
    pub(crate) phone: Option<String>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PatternInput {
    #[schemars(description = "Pattern type: 'consecutive', 'weekly', 'custom' or 'rrule'")]
    #[serde(rename = "type")]
    pub(crate) kind: String,
    #[schemars(description = "consecutive: number of days starting at startDate")]
    pub(crate) days: Option<u32>,
    #[schemars(description = "weekly: days of week (0 = Sunday)")]
    pub(crate) weekdays: Option<Vec<u8>>,
    #[schemars(description = "weekly: number of weeks, counted from the week of startDate")]
    pub(crate) week_count: Option<u32>,
    #[schemars(description = "custom: explicit dates 'YYYY-MM-DD'")]
    pub(crate) dates: Option<Vec<String>>,
    #[schemars(description = "rrule: RFC 5545 rule body, e.g. 'FREQ=WEEKLY;BYDAY=TU,TH;COUNT=6'")]
    pub(crate) rule: Option<String>,
    #[schemars(description = "rrule: cap on generated sessions")]
    pub(crate) max_sessions: Option<u32>,
}

// -- Seed file --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SeedFile {
    #[serde(default)]
    pub(crate) businesses: Vec<SeedBusiness>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SeedBusiness {
    #[serde(flatten)]
    pub(crate) business: BusinessInput,
    #[serde(default)]
    pub(crate) services: Vec<ServiceInput>,
}

// -- Tool parameter structs --

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UpsertBusinessParams {
    #[serde(flatten)]
    pub(crate) business: BusinessInput,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UpsertServiceParams {
    #[schemars(description = "Business ID or slug")]
    pub(crate) business: String,
    #[serde(flatten)]
    pub(crate) service: ServiceInput,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AddSpecialDateParams {
    #[schemars(description = "Business ID or slug")]
    pub(crate) business: String,
    #[serde(flatten)]
    pub(crate) special_date: SpecialDateInput,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GetAvailabilityParams {
    #[schemars(description = "Business ID or slug")]
    pub(crate) business: String,
    #[schemars(description = "Service ID")]
    pub(crate) service_id: String,
    #[schemars(description = "Date 'YYYY-MM-DD' in the business's timezone")]
    pub(crate) date: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GetAvailabilityRangeParams {
    #[schemars(description = "Business ID or slug")]
    pub(crate) business: String,
    #[schemars(description = "Service ID")]
    pub(crate) service_id: String,
    #[schemars(description = "First date 'YYYY-MM-DD'")]
    pub(crate) start_date: String,
    #[schemars(description = "Last date 'YYYY-MM-DD' (inclusive)")]
    pub(crate) end_date: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FindNextAvailableParams {
    #[schemars(description = "Business ID or slug")]
    pub(crate) business: String,
    #[schemars(description = "Service ID")]
    pub(crate) service_id: String,
    #[schemars(description = "First date to search 'YYYY-MM-DD'. Defaults to today in the business's timezone.")]
    pub(crate) from_date: Option<String>,
    #[schemars(description = "Number of days to search (1-90). Defaults to 30.")]
    pub(crate) search_days: Option<u32>,
    #[schemars(description = "Preferred time 'HH:MM'. Picks the slot closest to it on the first day with availability.")]
    pub(crate) preferred_time: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SlotsAroundTimeParams {
    #[schemars(description = "Business ID or slug")]
    pub(crate) business: String,
    #[schemars(description = "Service ID")]
    pub(crate) service_id: String,
    #[schemars(description = "Date 'YYYY-MM-DD'")]
    pub(crate) date: String,
    #[schemars(description = "Centre time 'HH:MM'")]
    pub(crate) around_time: String,
    #[schemars(description = "Minutes either side of the centre time. Defaults to 60.")]
    pub(crate) range_minutes: Option<u32>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CheckConflictsParams {
    #[schemars(description = "Business ID or slug")]
    pub(crate) business: String,
    #[schemars(description = "Service ID")]
    pub(crate) service_id: String,
    #[schemars(description = "Date 'YYYY-MM-DD'")]
    pub(crate) date: String,
    #[schemars(description = "Start time 'HH:MM'")]
    pub(crate) start_time: String,
    #[schemars(description = "Duration in minutes. Defaults to the service duration.")]
    pub(crate) duration_minutes: Option<u32>,
    #[schemars(description = "Buffer in minutes, at most 1440. Defaults to the service buffer.")]
    pub(crate) buffer_minutes: Option<u32>,
    #[schemars(description = "Appointment ID to ignore, e.g. the one being rescheduled")]
    pub(crate) exclude_appointment_id: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateAppointmentParams {
    #[schemars(description = "Business ID or slug")]
    pub(crate) business: String,
    #[schemars(description = "Service ID")]
    pub(crate) service_id: String,
    #[schemars(description = "Date 'YYYY-MM-DD'")]
    pub(crate) date: String,
    #[schemars(description = "Start time 'HH:MM'. Use a start time returned by get_availability.")]
    pub(crate) start_time: String,
    #[schemars(description = "Who the appointment is for")]
    pub(crate) customer: CustomerInput,
    #[schemars(description = "Notes for the appointment")]
    pub(crate) notes: Option<String>,
    #[schemars(description = "Booking channel: 'dashboard' (staff) or 'public'. Defaults to 'dashboard'.")]
    pub(crate) source: Option<String>,
    #[schemars(description = "Staff override: book even if the time overlaps another appointment. Defaults to false.")]
    pub(crate) skip_conflict_check: Option<bool>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AppointmentIdParams {
    #[schemars(description = "Appointment ID")]
    pub(crate) appointment_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RescheduleParams {
    #[schemars(description = "Appointment ID")]
    pub(crate) appointment_id: String,
    #[schemars(description = "New date 'YYYY-MM-DD'")]
    pub(crate) date: String,
    #[schemars(description = "New start time 'HH:MM'")]
    pub(crate) start_time: String,
    #[schemars(description = "Staff override: skip the conflict check. Defaults to false.")]
    pub(crate) skip_conflict_check: Option<bool>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CancelParams {
    #[schemars(description = "Appointment ID (for series tools, any member of the series)")]
    pub(crate) appointment_id: String,
    #[schemars(description = "Who cancelled: 'customer' or 'business'. Defaults to 'business'.")]
    pub(crate) source: Option<String>,
    #[schemars(description = "Cancellation reason")]
    pub(crate) reason: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PreviewMultiDayParams {
    #[schemars(description = "Business ID or slug")]
    pub(crate) business: String,
    #[schemars(description = "Service ID")]
    pub(crate) service_id: String,
    #[schemars(description = "Anchor date 'YYYY-MM-DD'")]
    pub(crate) start_date: String,
    #[schemars(description = "Start time 'HH:MM' used for every session")]
    pub(crate) start_time: String,
    #[schemars(description = "How the sessions repeat")]
    pub(crate) pattern: PatternInput,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateMultiDayParams {
    #[schemars(description = "Business ID or slug")]
    pub(crate) business: String,
    #[schemars(description = "Service ID")]
    pub(crate) service_id: String,
    #[schemars(description = "Anchor date 'YYYY-MM-DD'")]
    pub(crate) start_date: String,
    #[schemars(description = "Start time 'HH:MM' used for every session")]
    pub(crate) start_time: String,
    #[schemars(description = "How the sessions repeat")]
    pub(crate) pattern: PatternInput,
    #[schemars(description = "Who the sessions are for")]
    pub(crate) customer: CustomerInput,
    #[schemars(description = "Notes copied to every session")]
    pub(crate) notes: Option<String>,
    #[schemars(description = "Booking channel: 'dashboard' or 'public'. Defaults to 'dashboard'.")]
    pub(crate) source: Option<String>,
    #[schemars(description = "Book the sessions that fit and report the rest. Defaults to false (all-or-nothing).")]
    pub(crate) allow_partial: Option<bool>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DueRemindersParams {
    #[schemars(description = "Business ID or slug")]
    pub(crate) business: String,
    #[schemars(description = "Look-ahead window in hours. Defaults to 24.")]
    pub(crate) within_hours: Option<u32>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ExportIcalParams {
    #[schemars(description = "Business ID or slug")]
    pub(crate) business: String,
    #[schemars(description = "Start of range (ISO 8601)")]
    pub(crate) start: String,
    #[schemars(description = "End of range (ISO 8601)")]
    pub(crate) end: String,
}
