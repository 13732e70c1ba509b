//! Post-record notifications.
//!
//! Delivery transports (SMTP, SMS gateways) live outside this crate behind
//! [`Notifier`]. A failed delivery is logged and never touches the ledger.

use crate::ledger::AttendanceEvent;
use rollcall_core::Identity;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("notification to {recipient} failed: {reason}")]
    Delivery { recipient: String, reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

impl Notification {
    /// Attendance confirmation for a freshly recorded event. `None` when the
    /// identity has no contact.
    pub fn attendance_recorded(identity: &Identity, event: &AttendanceEvent) -> Option<Self> {
        let recipient = identity.contact()?.to_string();
        Some(Self {
            recipient,
            subject: "Attendance Recorded".to_string(),
            body: format!(
                "Attendance recorded for:\nName: {}\nRoll No: {}\nDepartment: {}\nDate: {}\nTime: {}",
                identity.display_name(),
                identity.external_reference(),
                identity.group(),
                event.day.format("%Y-%m-%d"),
                event.time_of_day.format("%H:%M:%S"),
            ),
        })
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Writes notifications to the log instead of delivering them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        tracing::info!(
            recipient = %notification.recipient,
            subject = %notification.subject,
            "notification"
        );
        Ok(())
    }
}

/// Drops every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, _notification: &Notification) -> Result<(), NotifyError> {
        Ok(())
    }
}
