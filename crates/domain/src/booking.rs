//! Booking state machine and QR code generation.

use chrono::{DateTime, Utc};
use common::RecordId;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::error::DomainError;

/// Upper bound on participants for a single booking.
pub const MAX_PARTICIPANTS: u32 = 50;

/// The status of a booking.
///
/// State transitions:
/// ```text
/// Confirmed ──┬──► Attended
///             └──► Cancelled
/// ```
/// `NoShow` is set outside these sagas and, like the other
/// non-confirmed states, absorbs every further event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    #[default]
    Confirmed,
    Attended,
    Cancelled,
    NoShow,
}

impl BookingStatus {
    /// Returns true if the booking can be checked in.
    pub fn can_check_in(&self) -> bool {
        matches!(self, BookingStatus::Confirmed)
    }

    /// Returns true if the booking can be cancelled.
    pub fn can_cancel(&self) -> bool {
        matches!(self, BookingStatus::Confirmed)
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, BookingStatus::Confirmed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Attended => "attended",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::NoShow => "no_show",
        }
    }

    /// The error raised when an event hits a status that does not accept it.
    fn rejection(&self, event: &str) -> DomainError {
        match self {
            BookingStatus::Attended => {
                DomainError::already_attended(format!("cannot {event}: booking already attended"))
            }
            BookingStatus::Cancelled => {
                DomainError::booking_cancelled(format!("cannot {event}: booking was cancelled"))
            }
            BookingStatus::NoShow | BookingStatus::Confirmed => {
                DomainError::validation(format!("cannot {event} a booking in status {self}"))
            }
        }
        .with_detail(json!({ "status": self.as_str(), "event": event }))
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Admission code printed on a booking.
///
/// Format: `QR-<millis since epoch, hex>-<8 random hex chars>`. Collisions are
/// not impossible; the datastore's unique constraint decides.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QrCode(String);

impl QrCode {
    pub fn generate(now: DateTime<Utc>) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!(
            "QR-{:X}-{}",
            now.timestamp_millis(),
            suffix[..8].to_uppercase()
        ))
    }

    /// Wraps a code received from a scanner; no format check is applied
    /// because the lookup itself is the validation.
    pub fn from_scan(code: impl Into<String>) -> Self {
        Self(code.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for QrCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Participant count as submitted: storefront forms send strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParticipantsInput {
    Number(u64),
    Text(String),
}

impl From<u32> for ParticipantsInput {
    fn from(n: u32) -> Self {
        ParticipantsInput::Number(u64::from(n))
    }
}

impl From<&str> for ParticipantsInput {
    fn from(s: &str) -> Self {
        ParticipantsInput::Text(s.to_string())
    }
}

/// A validated participant count in `1..=MAX_PARTICIPANTS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantCount(u32);

impl ParticipantCount {
    pub fn new(count: u64) -> Result<Self, DomainError> {
        match u32::try_from(count) {
            Ok(n) if (1..=MAX_PARTICIPANTS).contains(&n) => Ok(Self(n)),
            _ => Err(DomainError::validation(format!(
                "number of participants must be between 1 and {MAX_PARTICIPANTS}, got {count}"
            ))),
        }
    }

    pub fn parse(input: &ParticipantsInput) -> Result<Self, DomainError> {
        match input {
            ParticipantsInput::Number(n) => Self::new(*n),
            ParticipantsInput::Text(text) => {
                let n = text.trim().parse::<u64>().map_err(|_| {
                    DomainError::validation(format!(
                        "number of participants is not a number: {text:?}"
                    ))
                })?;
                Self::new(n)
            }
        }
    }

    pub fn get(&self) -> u32 {
        self.0
    }
}

/// Validated input for a new booking.
#[derive(Debug, Clone, PartialEq)]
pub struct NewBooking {
    pub experience_id: String,
    pub user_id: String,
    pub participants: ParticipantCount,
    pub scheduled_visit_time: Option<DateTime<Utc>>,
}

impl NewBooking {
    pub fn parse(
        experience_id: &str,
        user_id: &str,
        participants: &ParticipantsInput,
        scheduled_visit_time: Option<DateTime<Utc>>,
    ) -> Result<Self, DomainError> {
        if experience_id.trim().is_empty() {
            return Err(DomainError::validation("experience id is required"));
        }
        if user_id.trim().is_empty() {
            return Err(DomainError::validation("user id is required"));
        }
        Ok(Self {
            experience_id: experience_id.trim().to_string(),
            user_id: user_id.trim().to_string(),
            participants: ParticipantCount::parse(participants)?,
            scheduled_visit_time,
        })
    }
}

/// A booking row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: RecordId,
    pub experience_id: String,
    pub user_id: String,
    pub number_of_participants: ParticipantCount,
    pub status: BookingStatus,
    pub qr_code: QrCode,
    pub scheduled_visit_time: Option<DateTime<Utc>>,
    pub attended_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Booking {
    /// A confirmed booking carrying the given code.
    pub fn confirmed(input: NewBooking, qr_code: QrCode, now: DateTime<Utc>) -> Self {
        Self {
            id: RecordId::new(),
            experience_id: input.experience_id,
            user_id: input.user_id,
            number_of_participants: input.participants,
            status: BookingStatus::Confirmed,
            qr_code,
            scheduled_visit_time: input.scheduled_visit_time,
            attended_at: None,
            cancelled_at: None,
            cancellation_reason: None,
            created_at: now,
        }
    }

    /// Returns the attended version of this booking, or the error for the
    /// current status. `self` is never modified.
    pub fn check_in(&self, now: DateTime<Utc>) -> Result<Booking, DomainError> {
        if !self.status.can_check_in() {
            return Err(self.status.rejection("check in"));
        }
        Ok(Booking {
            status: BookingStatus::Attended,
            attended_at: Some(now),
            ..self.clone()
        })
    }

    /// Returns the cancelled version of this booking, or the error for the
    /// current status.
    pub fn cancel(&self, reason: Option<String>, now: DateTime<Utc>) -> Result<Booking, DomainError> {
        if !self.status.can_cancel() {
            return Err(self.status.rejection("cancel"));
        }
        Ok(Booking {
            status: BookingStatus::Cancelled,
            cancelled_at: Some(now),
            cancellation_reason: reason,
            ..self.clone()
        })
    }
}
