use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::conflict::{detect_conflicts, validate_booking_time};
use super::model::{
    Appointment, AppointmentId, AppointmentStatus, AuditAction, AuditEntry, BookingSource,
    Business, BusinessId, Cancellation, CancellationSource, Customer, CustomerRef, SeriesId,
    Service, ServiceId,
};
use super::store::BookingRepository;
use super::time_window::TimeWindow;
use super::{load_appointment, load_bookable_service, load_business, occupied_between, BookingEngine};
use crate::error::BookingError;

#[derive(Debug, Clone)]
pub struct NewAppointment {
    pub business_id: BusinessId,
    pub service_id: ServiceId,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub customer: CustomerRef,
    pub notes: Option<String>,
    pub source: BookingSource,
    /// Staff override: book even when the time overlaps existing appointments.
    pub skip_conflict_check: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelOutcome {
    pub appointment: Appointment,
    /// False when the appointment was already cancelled.
    pub changed: bool,
}

impl<R: BookingRepository> BookingEngine<R> {
    pub fn create_appointment(
        &mut self,
        request: NewAppointment,
        now: DateTime<Utc>,
    ) -> Result<Appointment, BookingError> {
        let appointment = self.repo.transaction(|tx| {
            let business = load_business(tx, &request.business_id)?;
            let service = load_bookable_service(tx, &business, &request.service_id)?;
            let customer = resolve_customer(tx, &business, &request.customer)?;
            let session = Session {
                date: request.date,
                start_time: request.start_time,
                series: None,
            };
            let appointment = book_session(
                tx,
                &business,
                &service,
                &customer,
                &session,
                request.source,
                request.notes.clone(),
                request.skip_conflict_check,
                now,
            )?;
            record_bookings(tx, customer, 1, now)?;
            Ok(appointment)
        });

        match &appointment {
            Ok(a) => info!(appointment = %a.id, status = %a.status, start = %a.start, "appointment created"),
            Err(err) if err.is_recoverable() => debug!(%err, date = %request.date, "booking rejected"),
            Err(err) => warn!(%err, "booking failed"),
        }
        appointment
    }

    /// PENDING -> CONFIRMED.
    pub fn confirm_appointment(
        &mut self,
        id: &AppointmentId,
        now: DateTime<Utc>,
    ) -> Result<Appointment, BookingError> {
        self.change_status(id, |_, appt| {
            require_transition(appt, AppointmentStatus::Confirmed, "confirm")?;
            appt.record_transition(AppointmentStatus::Confirmed, AuditAction::Confirmed, None, now);
            appt.confirmed_at = Some(now);
            Ok(())
        })
    }

    /// Move a live appointment to a new local date and time. The appointment
    /// itself is left out of the conflict check.
    pub fn reschedule_appointment(
        &mut self,
        id: &AppointmentId,
        date: NaiveDate,
        start_time: NaiveTime,
        skip_conflict_check: bool,
        now: DateTime<Utc>,
    ) -> Result<Appointment, BookingError> {
        let result = self.repo.transaction(|tx| {
            let mut appt = load_appointment(tx, id)?;
            if appt.status.is_terminal() {
                return Err(invalid_transition(&appt, "reschedule"));
            }
            let business = load_business(tx, &appt.business_id)?;
            let service = load_bookable_service(tx, &business, &appt.service_id)?;
            let window = validate_booking_time(
                &business,
                &service,
                date,
                start_time,
                service.duration_minutes,
                &business.booking_rules,
                now,
            )?;
            if !skip_conflict_check {
                ensure_free(tx, &business, &service, date, &window, Some(appt.id))?;
            }

            appt.history.push(AuditEntry {
                at: now,
                action: AuditAction::Rescheduled {
                    from_start: appt.start,
                    from_end: appt.end,
                },
                from_status: Some(appt.status),
                to_status: appt.status,
                note: None,
            });
            appt.start = window.start;
            appt.end = window.end;
            tx.update_appointment_times(&appt)?;
            Ok(appt)
        });

        if let Ok(appt) = &result {
            info!(appointment = %appt.id, start = %appt.start, "appointment rescheduled");
        }
        result
    }

    /// Cancel a PENDING or CONFIRMED appointment. Cancelling an already
    /// cancelled appointment succeeds without changing it.
    pub fn cancel_appointment(
        &mut self,
        id: &AppointmentId,
        source: CancellationSource,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<CancelOutcome, BookingError> {
        self.repo.transaction(|tx| cancel_in(tx, id, source, reason, now))
    }

    /// CONFIRMED -> NO_SHOW; counts against the customer.
    pub fn mark_no_show(
        &mut self,
        id: &AppointmentId,
        now: DateTime<Utc>,
    ) -> Result<Appointment, BookingError> {
        self.change_status(id, |tx, appt| {
            require_transition(appt, AppointmentStatus::NoShow, "mark as no-show")?;
            appt.record_transition(AppointmentStatus::NoShow, AuditAction::NoShow, None, now);
            match tx.find_customer(&appt.customer_id)? {
                Some(mut customer) => {
                    customer.no_show_count += 1;
                    tx.save_customer(customer)?;
                }
                None => warn!(appointment = %appt.id, customer = %appt.customer_id, "no-show for unknown customer"),
            }
            Ok(())
        })
    }

    /// CONFIRMED -> COMPLETED.
    pub fn complete_appointment(
        &mut self,
        id: &AppointmentId,
        now: DateTime<Utc>,
    ) -> Result<Appointment, BookingError> {
        self.change_status(id, |_, appt| {
            require_transition(appt, AppointmentStatus::Completed, "complete")?;
            appt.record_transition(AppointmentStatus::Completed, AuditAction::Completed, None, now);
            appt.completed_at = Some(now);
            Ok(())
        })
    }

    pub fn mark_reminder_sent(
        &mut self,
        id: &AppointmentId,
        now: DateTime<Utc>,
    ) -> Result<Appointment, BookingError> {
        self.change_status(id, |_, appt| {
            if appt.status.is_terminal() {
                return Err(invalid_transition(appt, "send a reminder for"));
            }
            appt.reminder_sent_at = Some(now);
            appt.history.push(AuditEntry {
                at: now,
                action: AuditAction::ReminderSent,
                from_status: Some(appt.status),
                to_status: appt.status,
                note: None,
            });
            Ok(())
        })
    }

    fn change_status<F>(&mut self, id: &AppointmentId, apply: F) -> Result<Appointment, BookingError>
    where
        F: FnOnce(&mut R, &mut Appointment) -> Result<(), BookingError>,
    {
        let appt = self.repo.transaction(|tx| {
            let mut appt = load_appointment(tx, id)?;
            apply(tx, &mut appt)?;
            tx.update_appointment_status(&appt)?;
            Ok(appt)
        })?;
        info!(appointment = %appt.id, from = ?appt.previous_status, to = %appt.status, "appointment updated");
        Ok(appt)
    }
}

/// Where one appointment goes: a local date/time, optionally as a series member.
pub(crate) struct Session {
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub series: Option<(SeriesId, u32)>,
}

/// Validate, conflict-check and insert one appointment inside `tx`.
#[allow(clippy::too_many_arguments)]
pub(crate) fn book_session<R: BookingRepository>(
    tx: &mut R,
    business: &Business,
    service: &Service,
    customer: &Customer,
    session: &Session,
    source: BookingSource,
    notes: Option<String>,
    skip_conflict_check: bool,
    now: DateTime<Utc>,
) -> Result<Appointment, BookingError> {
    let rules = &business.booking_rules;
    let window = validate_booking_time(
        business,
        service,
        session.date,
        session.start_time,
        service.duration_minutes,
        rules,
        now,
    )?;
    if !skip_conflict_check {
        ensure_free(tx, business, service, session.date, &window, None)?;
    }

    let needs_approval = service.requires_approval || rules.require_approval;
    let status = match source {
        BookingSource::Public if needs_approval => AppointmentStatus::Pending,
        _ => AppointmentStatus::Confirmed,
    };

    let appointment = Appointment {
        id: AppointmentId::new(),
        business_id: business.id,
        service_id: service.id,
        customer_id: customer.id,
        customer_name: customer.name.clone(),
        customer_email: customer.email.clone(),
        customer_phone: customer.phone.clone(),
        start: window.start,
        end: window.end,
        status,
        previous_status: None,
        source,
        notes,
        created_at: now,
        confirmed_at: (status == AppointmentStatus::Confirmed).then_some(now),
        completed_at: None,
        cancellation: None,
        reminder_sent_at: None,
        series_id: session.series.map(|(id, _)| id),
        series_position: session.series.map(|(_, pos)| pos),
        history: vec![AuditEntry {
            at: now,
            action: AuditAction::Created,
            from_status: None,
            to_status: status,
            note: None,
        }],
    };
    tx.create_appointment(appointment.clone())?;
    Ok(appointment)
}

fn ensure_free<R: BookingRepository>(
    repo: &R,
    business: &Business,
    service: &Service,
    date: NaiveDate,
    window: &TimeWindow,
    exclude: Option<AppointmentId>,
) -> Result<(), BookingError> {
    let occupied = occupied_between(repo, business, date, date)?;
    let conflicts = detect_conflicts(
        window,
        service.buffer_minutes,
        &occupied,
        exclude,
        business.timezone,
    );
    if conflicts.is_empty() {
        Ok(())
    } else {
        Err(BookingError::Conflict(conflicts))
    }
}

pub(crate) fn cancel_in<R: BookingRepository>(
    tx: &mut R,
    id: &AppointmentId,
    source: CancellationSource,
    reason: Option<String>,
    now: DateTime<Utc>,
) -> Result<CancelOutcome, BookingError> {
    let mut appt = load_appointment(tx, id)?;
    if appt.status == AppointmentStatus::Cancelled {
        return Ok(CancelOutcome {
            appointment: appt,
            changed: false,
        });
    }
    require_transition(&appt, AppointmentStatus::Cancelled, "cancel")?;

    appt.record_transition(
        AppointmentStatus::Cancelled,
        AuditAction::Cancelled,
        reason.clone(),
        now,
    );
    appt.cancellation = Some(Cancellation {
        source,
        reason,
        cancelled_at: now,
    });
    tx.update_appointment_status(&appt)?;
    info!(appointment = %appt.id, from = ?appt.previous_status, "appointment cancelled");
    Ok(CancelOutcome {
        appointment: appt,
        changed: true,
    })
}

/// Existing customer by id, or the inline details matched by email within
/// the business. New customers are only persisted by `record_bookings`.
pub(crate) fn resolve_customer<R: BookingRepository>(
    repo: &R,
    business: &Business,
    customer: &CustomerRef,
) -> Result<Customer, BookingError> {
    match customer {
        CustomerRef::Existing(id) => repo
            .find_customer(id)?
            .filter(|c| c.business_id == business.id)
            .ok_or_else(|| BookingError::CustomerNotFound(id.to_string())),
        CustomerRef::Inline(details) => {
            if details.name.trim().is_empty() {
                return Err(BookingError::Validation("Customer name is required".to_string()));
            }
            let email = details
                .email
                .as_deref()
                .map(str::trim)
                .filter(|e| !e.is_empty());
            if let Some(email) = email {
                if let Some(existing) = repo.find_customer_by_email(&business.id, email)? {
                    return Ok(existing);
                }
            }
            Ok(Customer::new(business.id, details.clone()))
        }
    }
}

pub(crate) fn record_bookings<R: BookingRepository>(
    repo: &mut R,
    mut customer: Customer,
    count: u32,
    now: DateTime<Utc>,
) -> Result<(), BookingError> {
    if count == 0 {
        return Ok(());
    }
    customer.total_bookings += count;
    customer.last_booking_at = Some(now);
    repo.save_customer(customer)
}

fn require_transition(
    appt: &Appointment,
    next: AppointmentStatus,
    action: &'static str,
) -> Result<(), BookingError> {
    if appt.status.can_transition_to(next) {
        Ok(())
    } else {
        Err(invalid_transition(appt, action))
    }
}

fn invalid_transition(appt: &Appointment, action: &'static str) -> BookingError {
    BookingError::InvalidTransition {
        id: appt.id.to_string(),
        from: appt.status,
        action,
    }
}
