use chrono::NaiveDate;
use thiserror::Error;

use crate::booking::conflict::ConflictInfo;
use crate::booking::model::AppointmentStatus;
use crate::booking::series::SessionFailure;

#[derive(Debug, Error)]
pub enum BookingError {
    #[error("Business not found: {0}")]
    BusinessNotFound(String),

    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    #[error("Appointment not found: {0}")]
    AppointmentNotFound(String),

    #[error("Customer not found: {0}")]
    CustomerNotFound(String),

    #[error("Closed on {date}: {reason}")]
    Closed { date: NaiveDate, reason: String },

    #[error("Too soon to book: {0}")]
    TooSoon(String),

    #[error("{date} is more than {max_days} days in advance")]
    TooFarAdvance { date: NaiveDate, max_days: u32 },

    #[error("Time slot conflicts with {} existing appointment(s)", .0.len())]
    Conflict(Vec<ConflictInfo>),

    #[error("Cannot {action} appointment {id} in status {from}")]
    InvalidTransition {
        id: String,
        from: AppointmentStatus,
        action: &'static str,
    },

    /// All-or-nothing series with at least one unbookable session.
    #[error("Multi-day booking rejected: {} session(s) unavailable", .0.len())]
    SeriesRejected(Vec<SessionFailure>),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Store error: {0}")]
    Store(String),
}

impl BookingError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            BookingError::BusinessNotFound(_)
                | BookingError::ServiceNotFound(_)
                | BookingError::AppointmentNotFound(_)
                | BookingError::CustomerNotFound(_)
        )
    }

    /// Outcomes the caller can fix by picking another time.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            BookingError::Closed { .. }
                | BookingError::TooSoon(_)
                | BookingError::TooFarAdvance { .. }
                | BookingError::Conflict(_)
                | BookingError::SeriesRejected(_)
        )
    }
}
