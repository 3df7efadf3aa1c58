pub mod conflict;
pub mod model;
pub mod rules;
pub mod series;
pub mod slots;
pub mod store;
pub mod time_window;

mod lifecycle;

pub use lifecycle::{CancelOutcome, NewAppointment};

use std::collections::HashMap;

use chrono::{DateTime, Days, NaiveDate, NaiveTime, TimeDelta, Utc};
use tracing::{debug, info};

use crate::error::BookingError;
use crate::ical_bridge::{appointments_to_ical, ExportEntry};
use conflict::{check_conflicts, occupancy, ConflictCheck, ConflictQuery, Occupied};
use model::{
    Appointment, AppointmentId, AppointmentStatus, Business, BusinessId, Service, ServiceId,
    SpecialDate,
};
use slots::{
    find_next_available_slot, generate_day_availability, generate_detailed_availability_range,
    get_slots_around_time, DayAvailability, NextAvailable, Slot,
};
use store::BookingRepository;
use time_window::start_of_local_day;

/// Longest look-ahead for `next_available`.
pub const MAX_SEARCH_DAYS: u32 = 90;

/// Scheduling engine over a repository. Queries take `&self`; anything that
/// writes takes `&mut self` and runs inside one repository transaction.
pub struct BookingEngine<R> {
    repo: R,
}

impl<R: BookingRepository> BookingEngine<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    pub fn repo(&self) -> &R {
        &self.repo
    }

    // -- Setup --

    pub fn upsert_business(&mut self, business: Business) -> Result<Business, BookingError> {
        business.booking_rules.validate()?;
        if business.name.trim().is_empty() || business.slug.is_empty() {
            return Err(BookingError::Validation(
                "Business name must contain at least one letter or digit".to_string(),
            ));
        }
        for special in &business.special_dates {
            validate_special_date(special)?;
        }
        self.repo.save_business(business.clone())?;
        info!(business = %business.id, slug = %business.slug, "business saved");
        Ok(business)
    }

    pub fn upsert_service(&mut self, service: Service) -> Result<Service, BookingError> {
        service.validate()?;
        load_business(&self.repo, &service.business_id)?;
        if let Some(existing) = self.repo.find_service(&service.id)? {
            if existing.business_id != service.business_id {
                return Err(BookingError::Validation(format!(
                    "Service {} belongs to another business",
                    service.id
                )));
            }
        }
        self.repo.save_service(service.clone())?;
        info!(service = %service.id, business = %service.business_id, "service saved");
        Ok(service)
    }

    pub fn add_special_date(
        &mut self,
        business_id: &BusinessId,
        special: SpecialDate,
    ) -> Result<Business, BookingError> {
        validate_special_date(&special)?;
        let mut business = load_business(&self.repo, business_id)?;
        business.upsert_special_date(special);
        self.repo.save_business(business.clone())?;
        Ok(business)
    }

    /// Look a business up by id or, failing that, by slug.
    pub fn find_business(&self, id_or_slug: &str) -> Result<Business, BookingError> {
        if let Ok(id) = id_or_slug.parse::<BusinessId>() {
            if let Some(business) = self.repo.find_business(&id)? {
                return Ok(business);
            }
        }
        self.repo
            .find_business_by_slug(id_or_slug.trim())?
            .ok_or_else(|| BookingError::BusinessNotFound(id_or_slug.to_string()))
    }

    // -- Availability --

    pub fn day_availability(
        &self,
        business_id: &BusinessId,
        service_id: &ServiceId,
        date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<DayAvailability, BookingError> {
        let (business, service) = self.business_and_service(business_id, service_id)?;
        let occupied = occupied_between(&self.repo, &business, date, date)?;
        Ok(generate_day_availability(
            &business,
            &service,
            date,
            &occupied,
            &business.booking_rules,
            now,
        ))
    }

    pub fn availability_range(
        &self,
        business_id: &BusinessId,
        service_id: &ServiceId,
        start: NaiveDate,
        end: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<Vec<DayAvailability>, BookingError> {
        let (business, service) = self.business_and_service(business_id, service_id)?;
        if end < start {
            return Err(BookingError::Validation(format!(
                "Range end {end} is before start {start}"
            )));
        }
        let occupied = occupied_between(&self.repo, &business, start, end)?;
        generate_detailed_availability_range(
            &business,
            &service,
            start,
            end,
            &occupied,
            &business.booking_rules,
            now,
        )
    }

    /// Scan `search_days` days from `from` for the first bookable slot.
    pub fn next_available(
        &self,
        business_id: &BusinessId,
        service_id: &ServiceId,
        from: NaiveDate,
        search_days: u32,
        preferred: Option<NaiveTime>,
        now: DateTime<Utc>,
    ) -> Result<Option<NextAvailable>, BookingError> {
        let span = search_days.clamp(1, MAX_SEARCH_DAYS);
        let end = from
            .checked_add_days(Days::new(u64::from(span - 1)))
            .ok_or_else(|| BookingError::Validation(format!("Date {from} is out of range")))?;
        let days = self.availability_range(business_id, service_id, from, end, now)?;
        Ok(find_next_available_slot(&days, preferred))
    }

    pub fn slots_around(
        &self,
        business_id: &BusinessId,
        service_id: &ServiceId,
        date: NaiveDate,
        around: NaiveTime,
        range_minutes: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<Slot>, BookingError> {
        let day = self.day_availability(business_id, service_id, date, now)?;
        Ok(get_slots_around_time(&day, around, range_minutes))
    }

    /// Availability verdict for an explicit time. Duration and buffer default
    /// to the service's own when not given in `query`.
    pub fn check_conflicts(
        &self,
        business_id: &BusinessId,
        service_id: &ServiceId,
        query: &ConflictQuery,
        now: DateTime<Utc>,
    ) -> Result<ConflictCheck, BookingError> {
        let (business, service) = self.business_and_service(business_id, service_id)?;
        if query.duration_minutes == 0 || query.duration_minutes > model::MAX_SERVICE_MINUTES {
            return Err(BookingError::Validation(format!(
                "Duration must be between 1 and {} minutes",
                model::MAX_SERVICE_MINUTES
            )));
        }
        // Occupancy is fetched one day either side, which covers buffers up to a day.
        if query.buffer_minutes > model::MAX_SERVICE_MINUTES {
            return Err(BookingError::Validation(format!(
                "Buffer must be at most {} minutes, got {}",
                model::MAX_SERVICE_MINUTES,
                query.buffer_minutes
            )));
        }
        let occupied = occupied_between(&self.repo, &business, query.date, query.date)?;
        check_conflicts(
            &business,
            &service,
            query,
            &occupied,
            &business.booking_rules,
            now,
        )
    }

    // -- Records --

    pub fn get_appointment(&self, id: &AppointmentId) -> Result<Appointment, BookingError> {
        load_appointment(&self.repo, id)
    }

    /// CONFIRMED appointments starting in `[now, now + lead)` with no
    /// reminder recorded yet.
    pub fn due_reminders(
        &self,
        business_id: &BusinessId,
        now: DateTime<Utc>,
        lead: TimeDelta,
    ) -> Result<Vec<Appointment>, BookingError> {
        load_business(&self.repo, business_id)?;
        let horizon = now + lead;
        Ok(self
            .repo
            .find_appointments_in_range(business_id, now, horizon)?
            .into_iter()
            .filter(|a| {
                a.status == AppointmentStatus::Confirmed
                    && a.reminder_sent_at.is_none()
                    && a.start >= now
                    && a.start < horizon
            })
            .collect())
    }

    pub fn export_ical(
        &self,
        business_id: &BusinessId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<String, BookingError> {
        if to <= from {
            return Err(BookingError::Validation(
                "Export range end must be after its start".to_string(),
            ));
        }
        let business = load_business(&self.repo, business_id)?;
        let appointments = self.repo.find_appointments_in_range(business_id, from, to)?;

        let mut names: HashMap<ServiceId, String> = HashMap::new();
        for appt in &appointments {
            if !names.contains_key(&appt.service_id) {
                let name = self
                    .repo
                    .find_service(&appt.service_id)?
                    .map(|s| s.name)
                    .unwrap_or_else(|| "Appointment".to_string());
                names.insert(appt.service_id, name);
            }
        }

        let entries: Vec<ExportEntry<'_>> = appointments
            .iter()
            .map(|appointment| ExportEntry {
                appointment,
                service_name: names
                    .get(&appointment.service_id)
                    .map(String::as_str)
                    .unwrap_or("Appointment"),
            })
            .collect();
        debug!(business = %business.id, count = entries.len(), "exporting appointments");
        Ok(appointments_to_ical(&business, &entries))
    }

    fn business_and_service(
        &self,
        business_id: &BusinessId,
        service_id: &ServiceId,
    ) -> Result<(Business, Service), BookingError> {
        let business = load_business(&self.repo, business_id)?;
        let service = load_service(&self.repo, &business, service_id)?;
        Ok((business, service))
    }
}

fn validate_special_date(special: &SpecialDate) -> Result<(), BookingError> {
    match (special.closed, special.hours) {
        (true, _) => Ok(()),
        (false, Some(hours)) if hours.is_valid() => Ok(()),
        (false, Some(_)) => Err(BookingError::Validation(format!(
            "Special date {} closes before it opens",
            special.date
        ))),
        (false, None) => Err(BookingError::Validation(format!(
            "Special date {} needs either closed or hours",
            special.date
        ))),
    }
}

pub(crate) fn load_business<R: BookingRepository>(
    repo: &R,
    id: &BusinessId,
) -> Result<Business, BookingError> {
    repo.find_business(id)?
        .ok_or_else(|| BookingError::BusinessNotFound(id.to_string()))
}

/// A service that exists and belongs to `business`.
pub(crate) fn load_service<R: BookingRepository>(
    repo: &R,
    business: &Business,
    id: &ServiceId,
) -> Result<Service, BookingError> {
    repo.find_service(id)?
        .filter(|s| s.business_id == business.id)
        .ok_or_else(|| BookingError::ServiceNotFound(id.to_string()))
}

/// Like `load_service`, but the service must also be accepting bookings.
pub(crate) fn load_bookable_service<R: BookingRepository>(
    repo: &R,
    business: &Business,
    id: &ServiceId,
) -> Result<Service, BookingError> {
    let service = load_service(repo, business, id)?;
    if !service.active {
        return Err(BookingError::Validation(format!(
            "Service '{}' is not accepting bookings",
            service.name
        )));
    }
    Ok(service)
}

pub(crate) fn load_appointment<R: BookingRepository>(
    repo: &R,
    id: &AppointmentId,
) -> Result<Appointment, BookingError> {
    repo.find_appointment(id)?
        .ok_or_else(|| BookingError::AppointmentNotFound(id.to_string()))
}

/// Slot-holding appointments that can touch local dates `first..=last`.
///
/// Fetches one extra day on each side so cross-midnight appointments and
/// buffers of up to a day are seen.
pub(crate) fn occupied_between<R: BookingRepository>(
    repo: &R,
    business: &Business,
    first: NaiveDate,
    last: NaiveDate,
) -> Result<Vec<Occupied>, BookingError> {
    let tz = business.timezone;
    let from = first
        .checked_sub_days(Days::new(1))
        .map(|d| start_of_local_day(tz, d))
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    let to = last
        .checked_add_days(Days::new(2))
        .map(|d| start_of_local_day(tz, d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC);
    let appointments = repo.find_appointments_in_range(&business.id, from, to)?;

    let mut buffers: HashMap<ServiceId, u32> = HashMap::new();
    for appt in &appointments {
        if !buffers.contains_key(&appt.service_id) {
            let buffer = repo
                .find_service(&appt.service_id)?
                .map_or(0, |s| s.buffer_minutes);
            buffers.insert(appt.service_id, buffer);
        }
    }

    Ok(occupancy(
        &appointments,
        business.booking_rules.completed_blocks_slots,
        |id| buffers.get(id).copied().unwrap_or(0),
    ))
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::booking::model::{DayHours, WeeklyHours};
    use crate::booking::slots::UnavailableReason;
    use pretty_assertions::assert_eq;

    fn slot_at(day: &DayAvailability, time: NaiveTime) -> &Slot {
        day.slots.iter().find(|s| s.start_time == time).unwrap()
    }

    #[test]
    fn buffered_appointment_blocks_surrounding_slots() {
        let (mut engine, business, service) = engine_with_service();
        engine
            .create_appointment(booking(&business, &service, monday(), hm(10, 0), "Ada"), now())
            .unwrap();

        let day = engine
            .day_availability(&business.id, &service.id, monday(), now())
            .unwrap();
        assert_eq!(slot_at(&day, hm(10, 0)).reason, Some(UnavailableReason::Booked));
        assert_eq!(slot_at(&day, hm(10, 30)).reason, Some(UnavailableReason::Booked));
        assert_eq!(slot_at(&day, hm(9, 30)).reason, Some(UnavailableReason::Booked));
        assert!(slot_at(&day, hm(11, 30)).available);
    }

    #[test]
    fn quarter_hour_grid_reopens_after_buffer() {
        let (mut engine, mut business, service) = engine_with_service();
        business.booking_rules.slot_interval_minutes = 15;
        let business = engine.upsert_business(business).unwrap();
        engine
            .create_appointment(booking(&business, &service, monday(), hm(10, 0), "Ada"), now())
            .unwrap();

        let day = engine
            .day_availability(&business.id, &service.id, monday(), now())
            .unwrap();
        assert_eq!(slot_at(&day, hm(11, 0)).reason, Some(UnavailableReason::Booked));
        assert!(slot_at(&day, hm(11, 15)).available);
    }

    #[test]
    fn cancelled_appointment_frees_its_slot() {
        let (mut engine, business, service) = engine_with_service();
        let appt = engine
            .create_appointment(booking(&business, &service, monday(), hm(10, 0), "Ada"), now())
            .unwrap();
        engine
            .cancel_appointment(&appt.id, model::CancellationSource::Customer, None, now())
            .unwrap();

        let day = engine
            .day_availability(&business.id, &service.id, monday(), now())
            .unwrap();
        assert!(slot_at(&day, hm(10, 0)).available);
    }

    #[test]
    fn completed_blocks_only_when_configured() {
        let (mut engine, mut business, service) = engine_with_service();
        let appt = engine
            .create_appointment(booking(&business, &service, monday(), hm(10, 0), "Ada"), now())
            .unwrap();
        engine.complete_appointment(&appt.id, now()).unwrap();

        let day = engine
            .day_availability(&business.id, &service.id, monday(), now())
            .unwrap();
        assert!(slot_at(&day, hm(10, 0)).available);

        business.booking_rules.completed_blocks_slots = true;
        let business = engine.upsert_business(business).unwrap();
        let day = engine
            .day_availability(&business.id, &service.id, monday(), now())
            .unwrap();
        assert!(!slot_at(&day, hm(10, 0)).available);
    }

    #[test]
    fn other_service_buffer_is_applied_to_its_appointments() {
        let (mut engine, business, service) = engine_with_service();
        let mut deep_clean = Service::new(business.id, "Deep clean", 30);
        deep_clean.buffer_minutes = 60;
        let deep_clean = engine.upsert_service(deep_clean).unwrap();
        engine
            .create_appointment(booking(&business, &deep_clean, monday(), hm(9, 0), "Ada"), now())
            .unwrap();

        // 09:00-09:30 plus a 60 minute buffer blocks until 10:30.
        let day = engine
            .day_availability(&business.id, &service.id, monday(), now())
            .unwrap();
        assert_eq!(slot_at(&day, hm(10, 0)).reason, Some(UnavailableReason::Booked));
        assert!(slot_at(&day, hm(10, 30)).available);
    }

    #[test]
    fn next_available_honours_preference() {
        let (engine, business, service) = engine_with_service();
        let saturday = date(2025, 3, 1);
        let next = engine
            .next_available(&business.id, &service.id, saturday, 7, Some(hm(14, 20)), now())
            .unwrap()
            .unwrap();
        assert_eq!(next.date, monday());
        assert_eq!(next.slot.start_time, hm(14, 30));
    }

    #[test]
    fn check_conflicts_reports_names_and_reason() {
        let (mut engine, business, service) = engine_with_service();
        engine
            .create_appointment(booking(&business, &service, monday(), hm(10, 0), "Ada"), now())
            .unwrap();

        let query = ConflictQuery::for_service(&service, monday(), hm(10, 30));
        let check = engine
            .check_conflicts(&business.id, &service.id, &query, now())
            .unwrap();
        assert!(!check.available);
        assert_eq!(check.conflicts[0].customer_name, "Ada");
        assert_eq!(check.conflicts[0].start_time, hm(10, 0));
    }

    #[test]
    fn check_conflicts_rejects_buffer_longer_than_a_day() {
        let (engine, business, service) = engine_with_service();
        let mut query = ConflictQuery::for_service(&service, monday(), hm(10, 0));
        query.buffer_minutes = model::MAX_SERVICE_MINUTES;
        assert!(engine
            .check_conflicts(&business.id, &service.id, &query, now())
            .is_ok());

        query.buffer_minutes = 3 * model::MAX_SERVICE_MINUTES;
        assert!(matches!(
            engine.check_conflicts(&business.id, &service.id, &query, now()),
            Err(BookingError::Validation(_))
        ));
    }

    #[test]
    fn service_of_another_business_is_not_found() {
        let (mut engine, _business, service) = engine_with_service();
        let other = engine
            .upsert_business(Business::new("Other", chrono_tz::UTC, WeeklyHours::closed()))
            .unwrap();
        let err = engine
            .day_availability(&other.id, &service.id, monday(), now())
            .unwrap_err();
        assert!(matches!(err, BookingError::ServiceNotFound(_)));
    }

    #[test]
    fn special_date_requires_closed_or_valid_hours() {
        let (mut engine, business, _service) = engine_with_service();
        let bad = SpecialDate {
            date: monday(),
            closed: false,
            hours: Some(DayHours::new(hm(12, 0), hm(11, 0))),
            recurring: false,
            note: None,
        };
        assert!(matches!(
            engine.add_special_date(&business.id, bad),
            Err(BookingError::Validation(_))
        ));

        let christmas = SpecialDate {
            recurring: true,
            ..SpecialDate::closure(date(2020, 12, 25))
        };
        let updated = engine.add_special_date(&business.id, christmas).unwrap();
        assert_eq!(updated.special_dates.len(), 1);
    }

    #[test]
    fn find_business_accepts_id_or_slug() {
        let (engine, business, _service) = engine_with_service();
        assert_eq!(engine.find_business(&business.id.to_string()).unwrap().id, business.id);
        assert_eq!(engine.find_business("studio").unwrap().id, business.id);
        assert!(engine.find_business("nowhere").unwrap_err().is_not_found());
    }

    #[test]
    fn due_reminders_lists_unreminded_confirmed_within_lead() {
        let (mut engine, business, service) = engine_with_service();
        let soon = engine
            .create_appointment(booking(&business, &service, monday(), hm(10, 0), "Ada"), now())
            .unwrap();
        let later = engine
            .create_appointment(booking(&business, &service, date(2025, 3, 5), hm(10, 0), "Grace"), now())
            .unwrap();

        let at = utc(2025, 3, 2, 12, 0);
        let due = engine
            .due_reminders(&business.id, at, TimeDelta::hours(24))
            .unwrap();
        assert_eq!(due.iter().map(|a| a.id).collect::<Vec<_>>(), vec![soon.id]);

        engine.mark_reminder_sent(&soon.id, at).unwrap();
        assert!(engine
            .due_reminders(&business.id, at, TimeDelta::hours(24))
            .unwrap()
            .is_empty());
        assert!(engine
            .due_reminders(&business.id, at, TimeDelta::days(4))
            .unwrap()
            .iter()
            .any(|a| a.id == later.id));
    }

    #[test]
    fn export_lists_live_appointments() {
        let (mut engine, business, service) = engine_with_service();
        engine
            .create_appointment(booking(&business, &service, monday(), hm(10, 0), "Ada"), now())
            .unwrap();
        let cancelled = engine
            .create_appointment(booking(&business, &service, monday(), hm(13, 0), "Grace"), now())
            .unwrap();
        engine
            .cancel_appointment(&cancelled.id, model::CancellationSource::Business, None, now())
            .unwrap();

        let ics = engine
            .export_ical(&business.id, utc(2025, 3, 3, 0, 0), utc(2025, 3, 4, 0, 0))
            .unwrap();
        assert!(ics.contains("SUMMARY:Massage: Ada"));
        assert!(!ics.contains("Grace"));
    }

    #[test]
    fn invalid_business_rules_are_rejected() {
        let mut engine = BookingEngine::new(crate::booking::store::InMemoryStore::new());
        let mut business = Business::new("Zero", chrono_tz::UTC, WeeklyHours::closed());
        business.booking_rules.slot_interval_minutes = 0;
        assert!(matches!(
            engine.upsert_business(business),
            Err(BookingError::Validation(_))
        ));
    }
}
