use std::collections::HashMap;

use chrono::{DateTime, Utc};

use super::model::{
    Appointment, AppointmentId, Business, BusinessId, Customer, CustomerId, SeriesId, Service,
    ServiceId,
};
use crate::error::BookingError;

/// Persistence seen by the booking engine.
///
/// Reads return owned records. Every booking-affecting write runs inside
/// `transaction`, which must make the whole closure atomic: either all of
/// its writes land or none do.
pub trait BookingRepository {
    fn find_business(&self, id: &BusinessId) -> Result<Option<Business>, BookingError>;
    fn find_business_by_slug(&self, slug: &str) -> Result<Option<Business>, BookingError>;
    fn save_business(&mut self, business: Business) -> Result<(), BookingError>;

    fn find_service(&self, id: &ServiceId) -> Result<Option<Service>, BookingError>;
    fn save_service(&mut self, service: Service) -> Result<(), BookingError>;

    fn find_customer(&self, id: &CustomerId) -> Result<Option<Customer>, BookingError>;
    fn find_customer_by_email(
        &self,
        business_id: &BusinessId,
        email: &str,
    ) -> Result<Option<Customer>, BookingError>;
    fn save_customer(&mut self, customer: Customer) -> Result<(), BookingError>;

    fn find_appointment(&self, id: &AppointmentId) -> Result<Option<Appointment>, BookingError>;

    /// Appointments of any status overlapping `[from, to)`, ordered by start.
    fn find_appointments_in_range(
        &self,
        business_id: &BusinessId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, BookingError>;

    /// Members of a series ordered by start.
    fn find_series(&self, series_id: &SeriesId) -> Result<Vec<Appointment>, BookingError>;

    fn create_appointment(&mut self, appointment: Appointment) -> Result<AppointmentId, BookingError>;

    /// Persist status, lifecycle timestamps, cancellation and history.
    fn update_appointment_status(&mut self, appointment: &Appointment) -> Result<(), BookingError>;

    /// Persist start/end and history.
    fn update_appointment_times(&mut self, appointment: &Appointment) -> Result<(), BookingError>;

    fn transaction<T, F>(&mut self, f: F) -> Result<T, BookingError>
    where
        Self: Sized,
        F: FnOnce(&mut Self) -> Result<T, BookingError>;
}

/// Process-local store. Transactions snapshot the maps and restore them
/// when the closure fails.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    businesses: HashMap<BusinessId, Business>,
    services: HashMap<ServiceId, Service>,
    customers: HashMap<CustomerId, Customer>,
    appointments: HashMap<AppointmentId, Appointment>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn appointment_count(&self) -> usize {
        self.appointments.len()
    }

    #[cfg(test)]
    pub fn appointments(&self) -> impl Iterator<Item = &Appointment> {
        self.appointments.values()
    }

    fn stored_appointment(&mut self, id: &AppointmentId) -> Result<&mut Appointment, BookingError> {
        self.appointments
            .get_mut(id)
            .ok_or_else(|| BookingError::AppointmentNotFound(id.to_string()))
    }
}

impl BookingRepository for InMemoryStore {
    fn find_business(&self, id: &BusinessId) -> Result<Option<Business>, BookingError> {
        Ok(self.businesses.get(id).cloned())
    }

    fn find_business_by_slug(&self, slug: &str) -> Result<Option<Business>, BookingError> {
        let slug = slug.to_lowercase();
        Ok(self.businesses.values().find(|b| b.slug == slug).cloned())
    }

    fn save_business(&mut self, business: Business) -> Result<(), BookingError> {
        let taken = self
            .businesses
            .values()
            .any(|b| b.slug == business.slug && b.id != business.id);
        if taken {
            return Err(BookingError::Validation(format!(
                "Business slug '{}' is already in use",
                business.slug
            )));
        }
        self.businesses.insert(business.id, business);
        Ok(())
    }

    fn find_service(&self, id: &ServiceId) -> Result<Option<Service>, BookingError> {
        Ok(self.services.get(id).cloned())
    }

    fn save_service(&mut self, service: Service) -> Result<(), BookingError> {
        self.services.insert(service.id, service);
        Ok(())
    }

    fn find_customer(&self, id: &CustomerId) -> Result<Option<Customer>, BookingError> {
        Ok(self.customers.get(id).cloned())
    }

    fn find_customer_by_email(
        &self,
        business_id: &BusinessId,
        email: &str,
    ) -> Result<Option<Customer>, BookingError> {
        let email = email.trim();
        Ok(self
            .customers
            .values()
            .find(|c| {
                c.business_id == *business_id
                    && c.email
                        .as_deref()
                        .is_some_and(|e| e.eq_ignore_ascii_case(email))
            })
            .cloned())
    }

    fn save_customer(&mut self, customer: Customer) -> Result<(), BookingError> {
        self.customers.insert(customer.id, customer);
        Ok(())
    }

    fn find_appointment(&self, id: &AppointmentId) -> Result<Option<Appointment>, BookingError> {
        Ok(self.appointments.get(id).cloned())
    }

    fn find_appointments_in_range(
        &self,
        business_id: &BusinessId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, BookingError> {
        let mut found: Vec<Appointment> = self
            .appointments
            .values()
            .filter(|a| a.business_id == *business_id && a.start < to && from < a.end)
            .cloned()
            .collect();
        found.sort_by_key(|a| (a.start, a.created_at));
        Ok(found)
    }

    fn find_series(&self, series_id: &SeriesId) -> Result<Vec<Appointment>, BookingError> {
        let mut members: Vec<Appointment> = self
            .appointments
            .values()
            .filter(|a| a.series_id.as_ref() == Some(series_id))
            .cloned()
            .collect();
        members.sort_by_key(|a| a.start);
        Ok(members)
    }

    fn create_appointment(&mut self, appointment: Appointment) -> Result<AppointmentId, BookingError> {
        let id = appointment.id;
        if self.appointments.contains_key(&id) {
            return Err(BookingError::Store(format!("Appointment {id} already exists")));
        }
        self.appointments.insert(id, appointment);
        Ok(id)
    }

    fn update_appointment_status(&mut self, appointment: &Appointment) -> Result<(), BookingError> {
        let stored = self.stored_appointment(&appointment.id)?;
        stored.status = appointment.status;
        stored.previous_status = appointment.previous_status;
        stored.confirmed_at = appointment.confirmed_at;
        stored.completed_at = appointment.completed_at;
        stored.cancellation = appointment.cancellation.clone();
        stored.reminder_sent_at = appointment.reminder_sent_at;
        stored.history = appointment.history.clone();
        Ok(())
    }

    fn update_appointment_times(&mut self, appointment: &Appointment) -> Result<(), BookingError> {
        let stored = self.stored_appointment(&appointment.id)?;
        stored.start = appointment.start;
        stored.end = appointment.end;
        stored.history = appointment.history.clone();
        Ok(())
    }

    fn transaction<T, F>(&mut self, f: F) -> Result<T, BookingError>
    where
        F: FnOnce(&mut Self) -> Result<T, BookingError>,
    {
        let snapshot = self.clone();
        let result = f(self);
        if result.is_err() {
            *self = snapshot;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::booking::model::{
        AppointmentStatus, BookingSource, CustomerDetails, WeeklyHours,
    };
    use chrono::{NaiveTime, TimeZone};
    use pretty_assertions::assert_eq;

    fn utc(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, day, hour, 0, 0).unwrap()
    }

    fn business(name: &str) -> Business {
        let nine = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
        let five = NaiveTime::from_hms_opt(17, 0, 0).unwrap();
        Business::new(name, chrono_tz::UTC, WeeklyHours::weekdays(nine, five))
    }

    fn appointment(business_id: BusinessId, start: DateTime<Utc>, hours: i64) -> Appointment {
        Appointment {
            id: AppointmentId::new(),
            business_id,
            service_id: ServiceId::new(),
            customer_id: CustomerId::new(),
            customer_name: "Ada".to_string(),
            customer_email: None,
            customer_phone: None,
            start,
            end: start + chrono::TimeDelta::hours(hours),
            status: AppointmentStatus::Confirmed,
            previous_status: None,
            source: BookingSource::Dashboard,
            notes: None,
            created_at: utc(1, 0),
            confirmed_at: None,
            completed_at: None,
            cancellation: None,
            reminder_sent_at: None,
            series_id: None,
            series_position: None,
            history: Vec::new(),
        }
    }

    #[test]
    fn range_query_is_half_open_and_per_business() {
        let mut store = InMemoryStore::new();
        let a = business("A");
        let b = business("B");
        store.create_appointment(appointment(a.id, utc(3, 9), 1)).unwrap();
        store.create_appointment(appointment(a.id, utc(3, 10), 1)).unwrap();
        store.create_appointment(appointment(b.id, utc(3, 9), 1)).unwrap();

        let found = store.find_appointments_in_range(&a.id, utc(3, 10), utc(3, 12)).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].start, utc(3, 10));
    }

    #[test]
    fn duplicate_slug_is_rejected() {
        let mut store = InMemoryStore::new();
        store.save_business(business("Hair Studio")).unwrap();
        let result = store.save_business(business("Hair  Studio"));
        assert!(matches!(result, Err(BookingError::Validation(_))));
        assert!(store.find_business_by_slug("hair-studio").unwrap().is_some());
    }

    #[test]
    fn customer_email_lookup_is_case_insensitive_and_scoped() {
        let mut store = InMemoryStore::new();
        let a = business("A");
        let b = business("B");
        let customer = Customer::new(
            a.id,
            CustomerDetails {
                name: "Ada".to_string(),
                email: Some("Ada@Example.com".to_string()),
                phone: None,
            },
        );
        store.save_customer(customer.clone()).unwrap();

        let found = store.find_customer_by_email(&a.id, "ada@example.COM").unwrap();
        assert_eq!(found.map(|c| c.id), Some(customer.id));
        assert!(store.find_customer_by_email(&b.id, "ada@example.com").unwrap().is_none());
    }

    #[test]
    fn status_update_leaves_times_alone() {
        let mut store = InMemoryStore::new();
        let a = business("A");
        let original = appointment(a.id, utc(3, 9), 1);
        store.create_appointment(original.clone()).unwrap();

        let mut changed = original.clone();
        changed.status = AppointmentStatus::Cancelled;
        changed.start = utc(4, 9);
        store.update_appointment_status(&changed).unwrap();

        let stored = store.find_appointment(&original.id).unwrap().unwrap();
        assert_eq!(stored.status, AppointmentStatus::Cancelled);
        assert_eq!(stored.start, utc(3, 9));
    }

    #[test]
    fn update_of_missing_appointment_is_not_found() {
        let mut store = InMemoryStore::new();
        let ghost = appointment(BusinessId::new(), utc(3, 9), 1);
        let err = store.update_appointment_times(&ghost).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn failed_transaction_rolls_back_every_write() {
        let mut store = InMemoryStore::new();
        let a = business("A");
        let result: Result<(), BookingError> = store.transaction(|tx| {
            tx.create_appointment(appointment(a.id, utc(3, 9), 1))?;
            tx.create_appointment(appointment(a.id, utc(3, 11), 1))?;
            Err(BookingError::Conflict(Vec::new()))
        });
        assert!(result.is_err());
        assert_eq!(store.appointment_count(), 0);

        let kept = store.transaction(|tx| tx.create_appointment(appointment(a.id, utc(3, 9), 1)));
        assert!(kept.is_ok());
        assert_eq!(store.appointment_count(), 1);
    }

    #[test]
    fn series_members_are_sorted_by_start() {
        let mut store = InMemoryStore::new();
        let a = business("A");
        let series = SeriesId::new();
        for day in [5, 3, 4] {
            let mut appt = appointment(a.id, utc(day, 9), 1);
            appt.series_id = Some(series);
            store.create_appointment(appt).unwrap();
        }
        store.create_appointment(appointment(a.id, utc(2, 9), 1)).unwrap();

        let starts: Vec<_> = store
            .find_series(&series)
            .unwrap()
            .into_iter()
            .map(|a| a.start)
            .collect();
        assert_eq!(starts, vec![utc(3, 9), utc(4, 9), utc(5, 9)]);
    }
}
