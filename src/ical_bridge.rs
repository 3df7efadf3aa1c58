use icalendar::{Calendar as IcalCalendar, Component, EventLike, EventStatus};

use crate::booking::model::{Appointment, AppointmentStatus, Business};

/// An appointment paired with the name of its service.
pub struct ExportEntry<'a> {
    pub appointment: &'a Appointment,
    pub service_name: &'a str,
}

/// Render appointments as a VCALENDAR. CANCELLED and NO_SHOW entries are skipped.
pub fn appointments_to_ical(business: &Business, entries: &[ExportEntry<'_>]) -> String {
    let mut cal = IcalCalendar::new();
    cal.name(&business.name);
    cal.timezone(business.timezone.name());

    for entry in entries {
        let appt = entry.appointment;
        let status = match appt.status {
            AppointmentStatus::Pending => EventStatus::Tentative,
            AppointmentStatus::Confirmed | AppointmentStatus::Completed => EventStatus::Confirmed,
            AppointmentStatus::Cancelled | AppointmentStatus::NoShow => continue,
        };

        let mut ical_event = icalendar::Event::new();
        ical_event.uid(&appt.id.to_string());
        ical_event.summary(&format!("{}: {}", entry.service_name, appt.customer_name));
        ical_event.starts(appt.start);
        ical_event.ends(appt.end);
        ical_event.status(status);
        if let Some(notes) = &appt.notes {
            ical_event.description(notes);
        }
        if let Some(series) = &appt.series_id {
            ical_event.add_property("X-SLOTKEEPER-SERIES", series.to_string());
        }

        cal.push(ical_event.done());
    }

    cal.to_string()
}
