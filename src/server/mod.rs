mod conversions;
mod types;

pub(crate) use conversions::*;
pub(crate) use types::*;

use std::sync::Arc;

use chrono::{TimeDelta, Utc};
use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::wrapper::Parameters,
    model::*,
    tool, tool_router,
};
use serde_json::json;
use tokio::sync::RwLock;

use crate::booking::conflict::ConflictQuery;
use crate::booking::model::{AppointmentId, Business, BusinessId, Service, ServiceId};
use crate::booking::rules::BookingRules;
use crate::booking::series::MultiDayRequest;
use crate::booking::store::{BookingRepository, InMemoryStore};
use crate::booking::time_window::{local_date, parse_date, parse_time};
use crate::booking::{BookingEngine, NewAppointment};
use crate::config::AppConfig;
use crate::error::BookingError;

type Engine = BookingEngine<InMemoryStore>;

const DEFAULT_SEARCH_DAYS: u32 = 30;
const DEFAULT_AROUND_MINUTES: u32 = 60;
const DEFAULT_REMINDER_HOURS: u32 = 24;

#[derive(Clone)]
pub struct SlotkeeperServer {
    engine: Arc<RwLock<Engine>>,
    default_rules: Arc<BookingRules>,
}

impl ServerHandler for SlotkeeperServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "slotkeeper".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                title: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Slotkeeper is an appointment-booking engine for businesses with opening hours. \
                 Recommended workflow: \
                 1) Set up with upsert_business and upsert_service (add holidays with add_special_date), \
                 2) Use get_availability or find_next_available to list bookable slots, \
                 3) Book with create_appointment using the EXACT date and startTime of an available slot. \
                 If create_appointment reports conflicts, pick another slot and retry. \
                 Dates are 'YYYY-MM-DD' and times 'HH:MM' in the business's own timezone; \
                 days of week are numbered 0 = Sunday to 6 = Saturday."
                    .into(),
            ),
        }
    }
}

// -- Tool implementations --

#[tool_router]
impl SlotkeeperServer {
    pub fn new(config: &AppConfig) -> Self {
        Self::with_engine(
            BookingEngine::new(InMemoryStore::new()),
            config.default_rules.clone(),
        )
    }

    pub fn with_engine(engine: Engine, default_rules: BookingRules) -> Self {
        Self {
            engine: Arc::new(RwLock::new(engine)),
            default_rules: Arc::new(default_rules),
        }
    }

    /// Load businesses and services from a seed file. Records that fail
    /// validation are logged and skipped. Returns (businesses, services) saved.
    pub async fn load_seed(&self, seed: SeedFile) -> (usize, usize) {
        let mut engine = self.engine.write().await;
        let mut businesses = 0;
        let mut services = 0;
        for entry in seed.businesses {
            let business = match save_business(&mut engine, &entry.business, &self.default_rules) {
                Ok(business) => business,
                Err(e) => {
                    tracing::warn!("Skipping seed business '{}': {e}", entry.business.name);
                    continue;
                }
            };
            businesses += 1;
            for service in &entry.services {
                match save_service(&mut engine, business.id, service) {
                    Ok(_) => services += 1,
                    Err(e) => tracing::warn!(
                        "Skipping seed service '{}' of '{}': {e}",
                        service.name,
                        business.slug
                    ),
                }
            }
        }
        (businesses, services)
    }

    // === Setup ===

    #[tool(description = "Create or update a business: name, IANA timezone, weekly opening hours (0 = Sunday), special dates and booking settings. Pass 'id' to update an existing business.")]
    async fn upsert_business(
        &self,
        params: Parameters<UpsertBusinessParams>,
    ) -> Result<CallToolResult, McpError> {
        let mut engine = self.engine.write().await;
        let business = save_business(&mut engine, &params.0.business, &self.default_rules)
            .map_err(booking_err)?;
        Ok(json_text(&business))
    }

    #[tool(description = "Create or update a bookable service of a business: duration, buffer, offered days, custom hours, notice and advance limits. Pass 'id' to update an existing service.")]
    async fn upsert_service(
        &self,
        params: Parameters<UpsertServiceParams>,
    ) -> Result<CallToolResult, McpError> {
        let mut engine = self.engine.write().await;
        let business = engine.find_business(&params.0.business).map_err(booking_err)?;
        let service = save_service(&mut engine, business.id, &params.0.service).map_err(booking_err)?;
        Ok(json_text(&service))
    }

    #[tool(description = "Add or replace a special date (holiday closure or changed hours). Set recurring to repeat it every year.")]
    async fn add_special_date(
        &self,
        params: Parameters<AddSpecialDateParams>,
    ) -> Result<CallToolResult, McpError> {
        let special = special_date_from_input(&params.0.special_date).map_err(booking_err)?;
        let mut engine = self.engine.write().await;
        let business = engine.find_business(&params.0.business).map_err(booking_err)?;
        let business = engine
            .add_special_date(&business.id, special)
            .map_err(booking_err)?;
        Ok(json_text(&json!({
            "businessId": business.id,
            "specialDates": business.special_dates,
        })))
    }

    // === Availability ===

    #[tool(description = "List every candidate slot of a service on one date with availability and the reason for each unavailable slot. When nothing is free, also returns the next available slot within 30 days.")]
    async fn get_availability(
        &self,
        params: Parameters<GetAvailabilityParams>,
    ) -> Result<CallToolResult, McpError> {
        let date = parse_date(&params.0.date).map_err(booking_err)?;
        let service_id: ServiceId = parse_id(&params.0.service_id)?;
        let now = Utc::now();

        let engine = self.engine.read().await;
        let business = engine.find_business(&params.0.business).map_err(booking_err)?;
        let day = engine
            .day_availability(&business.id, &service_id, date, now)
            .map_err(booking_err)?;
        let next_available = match date.succ_opt() {
            Some(next) if !day.has_available() => engine
                .next_available(&business.id, &service_id, next, DEFAULT_SEARCH_DAYS, None, now)
                .map_err(booking_err)?,
            _ => None,
        };

        Ok(json_text(&json!({
            "date": day.date,
            "available": day.has_available(),
            "isOpen": day.is_open,
            "businessHours": day.business_hours,
            "dayInfo": day.day_info,
            "slots": day.slots,
            "nextAvailable": next_available,
        })))
    }

    #[tool(description = "Availability for every date in an inclusive range (at most 366 days), with day info and slots per date.")]
    async fn get_availability_range(
        &self,
        params: Parameters<GetAvailabilityRangeParams>,
    ) -> Result<CallToolResult, McpError> {
        let start = parse_date(&params.0.start_date).map_err(booking_err)?;
        let end = parse_date(&params.0.end_date).map_err(booking_err)?;
        let service_id: ServiceId = parse_id(&params.0.service_id)?;

        let engine = self.engine.read().await;
        let business = engine.find_business(&params.0.business).map_err(booking_err)?;
        let days = engine
            .availability_range(&business.id, &service_id, start, end, Utc::now())
            .map_err(booking_err)?;
        let available_days = days.iter().filter(|d| d.has_available()).count();

        Ok(json_text(&json!({
            "startDate": start,
            "endDate": end,
            "availableDays": available_days,
            "days": days,
        })))
    }

    #[tool(description = "Find the first date with a free slot. With preferredTime, returns the slot on that date closest to it; otherwise the earliest.")]
    async fn find_next_available(
        &self,
        params: Parameters<FindNextAvailableParams>,
    ) -> Result<CallToolResult, McpError> {
        let service_id: ServiceId = parse_id(&params.0.service_id)?;
        let from = parse_optional_date(params.0.from_date.as_deref()).map_err(booking_err)?;
        let preferred = params
            .0
            .preferred_time
            .as_deref()
            .map(parse_time)
            .transpose()
            .map_err(booking_err)?;
        let search_days = params.0.search_days.unwrap_or(DEFAULT_SEARCH_DAYS);
        let now = Utc::now();

        let engine = self.engine.read().await;
        let business = engine.find_business(&params.0.business).map_err(booking_err)?;
        let from = from.unwrap_or_else(|| local_date(now, business.timezone));
        let next = engine
            .next_available(&business.id, &service_id, from, search_days, preferred, now)
            .map_err(booking_err)?;

        Ok(json_text(&json!({
            "found": next.is_some(),
            "nextAvailable": next,
        })))
    }

    #[tool(description = "Slots of one date whose start lies within rangeMinutes of a given time, e.g. to offer alternatives near a requested time.")]
    async fn get_slots_around_time(
        &self,
        params: Parameters<SlotsAroundTimeParams>,
    ) -> Result<CallToolResult, McpError> {
        let date = parse_date(&params.0.date).map_err(booking_err)?;
        let around = parse_time(&params.0.around_time).map_err(booking_err)?;
        let service_id: ServiceId = parse_id(&params.0.service_id)?;
        let range = params.0.range_minutes.unwrap_or(DEFAULT_AROUND_MINUTES);

        let engine = self.engine.read().await;
        let business = engine.find_business(&params.0.business).map_err(booking_err)?;
        let slots = engine
            .slots_around(&business.id, &service_id, date, around, range, Utc::now())
            .map_err(booking_err)?;
        let available = slots.iter().filter(|s| s.available).count();

        Ok(json_text(&json!({
            "date": date,
            "available": available > 0,
            "availableCount": available,
            "slots": slots,
        })))
    }

    #[tool(description = "Check whether a specific start time can be booked: opening hours, booking window and overlaps with existing appointments (including buffers).")]
    async fn check_conflicts(
        &self,
        params: Parameters<CheckConflictsParams>,
    ) -> Result<CallToolResult, McpError> {
        let date = parse_date(&params.0.date).map_err(booking_err)?;
        let start_time = parse_time(&params.0.start_time).map_err(booking_err)?;
        let service_id: ServiceId = parse_id(&params.0.service_id)?;
        let exclude = params
            .0
            .exclude_appointment_id
            .as_deref()
            .map(parse_id::<AppointmentId>)
            .transpose()?;

        let engine = self.engine.read().await;
        let business = engine.find_business(&params.0.business).map_err(booking_err)?;
        let service = find_service(&engine, &service_id).map_err(booking_err)?;

        let mut query = ConflictQuery::for_service(&service, date, start_time);
        if let Some(duration) = params.0.duration_minutes {
            query.duration_minutes = duration;
        }
        if let Some(buffer) = params.0.buffer_minutes {
            query.buffer_minutes = buffer;
        }
        if let Some(id) = exclude {
            query = query.excluding(id);
        }

        let check = engine
            .check_conflicts(&business.id, &service_id, &query, Utc::now())
            .map_err(booking_err)?;
        Ok(json_text(&check))
    }

    // === Lifecycle ===

    #[tool(description = "Book one appointment. Dashboard bookings are CONFIRMED; public bookings may be PENDING when the business or service requires approval. Reports conflicts when the time is taken.")]
    async fn create_appointment(
        &self,
        params: Parameters<CreateAppointmentParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let service_id: ServiceId = parse_id(&p.service_id)?;
        let date = parse_date(&p.date).map_err(booking_err)?;
        let start_time = parse_time(&p.start_time).map_err(booking_err)?;
        let customer = customer_ref_from_input(&p.customer).map_err(booking_err)?;
        let source = parse_booking_source(p.source.as_deref()).map_err(booking_err)?;

        let mut engine = self.engine.write().await;
        let business = engine.find_business(&p.business).map_err(booking_err)?;
        let request = NewAppointment {
            business_id: business.id,
            service_id,
            date,
            start_time,
            customer,
            notes: p.notes,
            source,
            skip_conflict_check: p.skip_conflict_check.unwrap_or(false),
        };

        match engine.create_appointment(request, Utc::now()) {
            Ok(appointment) => Ok(json_text(&json!({
                "booked": true,
                "appointment": appointment,
            }))),
            Err(err) => rejected_or_err(err),
        }
    }

    #[tool(description = "Confirm a PENDING appointment.")]
    async fn confirm_appointment(
        &self,
        params: Parameters<AppointmentIdParams>,
    ) -> Result<CallToolResult, McpError> {
        let id: AppointmentId = parse_id(&params.0.appointment_id)?;
        let mut engine = self.engine.write().await;
        let appointment = engine.confirm_appointment(&id, Utc::now()).map_err(booking_err)?;
        Ok(json_text(&appointment))
    }

    #[tool(description = "Move a PENDING or CONFIRMED appointment to a new date and start time. The appointment's own current time never counts as a conflict.")]
    async fn reschedule_appointment(
        &self,
        params: Parameters<RescheduleParams>,
    ) -> Result<CallToolResult, McpError> {
        let id: AppointmentId = parse_id(&params.0.appointment_id)?;
        let date = parse_date(&params.0.date).map_err(booking_err)?;
        let start_time = parse_time(&params.0.start_time).map_err(booking_err)?;
        let skip = params.0.skip_conflict_check.unwrap_or(false);

        let mut engine = self.engine.write().await;
        match engine.reschedule_appointment(&id, date, start_time, skip, Utc::now()) {
            Ok(appointment) => Ok(json_text(&json!({
                "rescheduled": true,
                "appointment": appointment,
            }))),
            Err(err) => rejected_or_err(err),
        }
    }

    #[tool(description = "Cancel an appointment. Cancelling an already cancelled appointment succeeds with changed = false; completed and no-show appointments cannot be cancelled.")]
    async fn cancel_appointment(
        &self,
        params: Parameters<CancelParams>,
    ) -> Result<CallToolResult, McpError> {
        let id: AppointmentId = parse_id(&params.0.appointment_id)?;
        let source = parse_cancellation_source(params.0.source.as_deref()).map_err(booking_err)?;

        let mut engine = self.engine.write().await;
        let outcome = engine
            .cancel_appointment(&id, source, params.0.reason.clone(), Utc::now())
            .map_err(booking_err)?;
        Ok(json_text(&outcome))
    }

    #[tool(description = "Mark a CONFIRMED appointment as a no-show. Frees the slot and counts against the customer.")]
    async fn mark_no_show(
        &self,
        params: Parameters<AppointmentIdParams>,
    ) -> Result<CallToolResult, McpError> {
        let id: AppointmentId = parse_id(&params.0.appointment_id)?;
        let mut engine = self.engine.write().await;
        let appointment = engine.mark_no_show(&id, Utc::now()).map_err(booking_err)?;
        Ok(json_text(&appointment))
    }

    #[tool(description = "Mark a CONFIRMED appointment as completed.")]
    async fn complete_appointment(
        &self,
        params: Parameters<AppointmentIdParams>,
    ) -> Result<CallToolResult, McpError> {
        let id: AppointmentId = parse_id(&params.0.appointment_id)?;
        let mut engine = self.engine.write().await;
        let appointment = engine.complete_appointment(&id, Utc::now()).map_err(booking_err)?;
        Ok(json_text(&appointment))
    }

    #[tool(description = "Get an appointment with its status history.")]
    async fn get_appointment(
        &self,
        params: Parameters<AppointmentIdParams>,
    ) -> Result<CallToolResult, McpError> {
        let id: AppointmentId = parse_id(&params.0.appointment_id)?;
        let engine = self.engine.read().await;
        let appointment = engine.get_appointment(&id).map_err(booking_err)?;
        Ok(json_text(&appointment))
    }

    // === Reminders ===

    #[tool(description = "List CONFIRMED appointments starting within the next withinHours hours (default 24) that have not had a reminder yet.")]
    async fn list_due_reminders(
        &self,
        params: Parameters<DueRemindersParams>,
    ) -> Result<CallToolResult, McpError> {
        let hours = params.0.within_hours.unwrap_or(DEFAULT_REMINDER_HOURS);
        let engine = self.engine.read().await;
        let business = engine.find_business(&params.0.business).map_err(booking_err)?;
        let due = engine
            .due_reminders(&business.id, Utc::now(), TimeDelta::hours(i64::from(hours)))
            .map_err(booking_err)?;
        Ok(json_text(&json!({ "appointments": due })))
    }

    #[tool(description = "Record that a reminder was sent for an appointment.")]
    async fn mark_reminder_sent(
        &self,
        params: Parameters<AppointmentIdParams>,
    ) -> Result<CallToolResult, McpError> {
        let id: AppointmentId = parse_id(&params.0.appointment_id)?;
        let mut engine = self.engine.write().await;
        let appointment = engine.mark_reminder_sent(&id, Utc::now()).map_err(booking_err)?;
        Ok(json_text(&appointment))
    }

    // === Multi-day ===

    #[tool(description = "Preview a multi-day booking: expands the pattern (consecutive, weekly, custom or rrule) and reports availability and conflicts per session without booking anything.")]
    async fn preview_multi_day(
        &self,
        params: Parameters<PreviewMultiDayParams>,
    ) -> Result<CallToolResult, McpError> {
        let service_id: ServiceId = parse_id(&params.0.service_id)?;
        let start_date = parse_date(&params.0.start_date).map_err(booking_err)?;
        let start_time = parse_time(&params.0.start_time).map_err(booking_err)?;
        let pattern = pattern_from_input(&params.0.pattern).map_err(booking_err)?;

        let engine = self.engine.read().await;
        let business = engine.find_business(&params.0.business).map_err(booking_err)?;
        let sessions = engine
            .check_multi_day_availability(
                &business.id,
                &service_id,
                start_date,
                &pattern,
                start_time,
                Utc::now(),
            )
            .map_err(booking_err)?;
        let available = sessions.iter().filter(|s| s.available).count();

        Ok(json_text(&json!({
            "allAvailable": available == sessions.len(),
            "availableCount": available,
            "totalSessions": sessions.len(),
            "sessions": sessions,
        })))
    }

    #[tool(description = "Book every session of a multi-day pattern as one series. All-or-nothing unless allowPartial is true, in which case the sessions that fit are booked and the rest reported as failures.")]
    async fn create_multi_day_appointment(
        &self,
        params: Parameters<CreateMultiDayParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let service_id: ServiceId = parse_id(&p.service_id)?;
        let start_date = parse_date(&p.start_date).map_err(booking_err)?;
        let start_time = parse_time(&p.start_time).map_err(booking_err)?;
        let pattern = pattern_from_input(&p.pattern).map_err(booking_err)?;
        let customer = customer_ref_from_input(&p.customer).map_err(booking_err)?;
        let source = parse_booking_source(p.source.as_deref()).map_err(booking_err)?;

        let mut engine = self.engine.write().await;
        let business = engine.find_business(&p.business).map_err(booking_err)?;
        let request = MultiDayRequest {
            business_id: business.id,
            service_id,
            start_date,
            pattern,
            start_time,
            customer,
            notes: p.notes,
            source,
            allow_partial: p.allow_partial.unwrap_or(false),
        };
        let result = engine
            .create_multi_day_appointment(request, Utc::now())
            .map_err(booking_err)?;

        if result.success {
            Ok(json_text(&result))
        } else {
            Ok(json_error(&result))
        }
    }

    #[tool(description = "List every appointment in the series of the given appointment, by start time.")]
    async fn get_appointment_series(
        &self,
        params: Parameters<AppointmentIdParams>,
    ) -> Result<CallToolResult, McpError> {
        let id: AppointmentId = parse_id(&params.0.appointment_id)?;
        let engine = self.engine.read().await;
        let appointments = engine.get_appointment_series(&id).map_err(booking_err)?;
        Ok(json_text(&json!({
            "seriesId": appointments.first().and_then(|a| a.series_id),
            "appointments": appointments,
        })))
    }

    #[tool(description = "Cancel every pending or confirmed appointment in the series of the given appointment.")]
    async fn cancel_appointment_series(
        &self,
        params: Parameters<CancelParams>,
    ) -> Result<CallToolResult, McpError> {
        let id: AppointmentId = parse_id(&params.0.appointment_id)?;
        let source = parse_cancellation_source(params.0.source.as_deref()).map_err(booking_err)?;

        let mut engine = self.engine.write().await;
        let cancelled = engine
            .cancel_appointment_series(&id, source, params.0.reason.clone(), Utc::now())
            .map_err(booking_err)?;
        Ok(json_text(&json!({ "cancelled": cancelled })))
    }

    // === Export ===

    #[tool(description = "Export a business's appointments in a time range as iCal/ICS. Cancelled and no-show appointments are left out.")]
    async fn export_ical(
        &self,
        params: Parameters<ExportIcalParams>,
    ) -> Result<CallToolResult, McpError> {
        let start = parse_datetime(&params.0.start).map_err(booking_err)?;
        let end = parse_datetime(&params.0.end).map_err(booking_err)?;

        let engine = self.engine.read().await;
        let business = engine.find_business(&params.0.business).map_err(booking_err)?;
        let ical_str = engine
            .export_ical(&business.id, start, end)
            .map_err(booking_err)?;

        Ok(CallToolResult::success(vec![Content::text(ical_str)]))
    }
}

impl SlotkeeperServer {
    pub fn into_router(self) -> rmcp::handler::server::router::Router<Self> {
        let mut router = rmcp::handler::server::router::Router::new(self);
        router.tool_router = Self::tool_router();
        router
    }
}

fn rejected_or_err(err: BookingError) -> Result<CallToolResult, McpError> {
    match rejection(&err) {
        Some(body) => {
            tracing::debug!("Booking rejected: {err}");
            Ok(json_error(&body))
        }
        None => Err(booking_err(err)),
    }
}

fn find_service(engine: &Engine, id: &ServiceId) -> Result<Service, BookingError> {
    engine
        .repo()
        .find_service(id)?
        .ok_or_else(|| BookingError::ServiceNotFound(id.to_string()))
}

fn save_business(
    engine: &mut Engine,
    input: &BusinessInput,
    defaults: &BookingRules,
) -> Result<Business, BookingError> {
    let existing = match input.id.as_deref() {
        Some(id) => Some(engine.find_business(id)?),
        None => None,
    };
    let business = business_from_input(input, existing, defaults)?;
    engine.upsert_business(business)
}

fn save_service(
    engine: &mut Engine,
    business_id: BusinessId,
    input: &ServiceInput,
) -> Result<Service, BookingError> {
    let existing = match input.id.as_deref() {
        Some(id) => Some(find_service(engine, &id.parse()?)?),
        None => None,
    };
    let service = service_from_input(input, business_id, existing)?;
    engine.upsert_service(service)
}
