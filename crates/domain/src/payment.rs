//! Payment sub-resource of a booking.

use chrono::{DateTime, Utc};
use common::RecordId;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::DomainError;

pub const DEFAULT_CURRENCY: &str = "EUR";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Onsite,
    CreditCard,
}

/// Payment lifecycle.
///
/// ```text
/// Pending ──► Completed ──► Refunded
/// ```
/// `PartiallyRefunded` and `Failed` are written by the payment processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Completed,
    Refunded,
    PartiallyRefunded,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::PartiallyRefunded => "partially_refunded",
            PaymentStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payment requested together with a booking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub method: PaymentMethod,
    pub amount_cents: i64,
    #[serde(default)]
    pub currency: Option<String>,
}

impl PaymentRequest {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.amount_cents < 0 {
            return Err(DomainError::validation(format!(
                "payment amount must not be negative, got {}",
                self.amount_cents
            )));
        }
        if let Some(currency) = &self.currency
            && (currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()))
        {
            return Err(DomainError::validation(format!(
                "currency must be a 3-letter code, got {currency:?}"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: RecordId,
    pub booking_id: RecordId,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub amount_cents: i64,
    pub currency: String,
    pub paid_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Payment {
    /// A pending payment for a booking.
    pub fn pending(booking_id: RecordId, request: &PaymentRequest, now: DateTime<Utc>) -> Self {
        Self {
            id: RecordId::new(),
            booking_id,
            method: request.method,
            status: PaymentStatus::Pending,
            amount_cents: request.amount_cents,
            currency: request
                .currency
                .as_deref()
                .unwrap_or(DEFAULT_CURRENCY)
                .to_uppercase(),
            paid_at: None,
            refunded_at: None,
            created_at: now,
        }
    }

    /// Only a pending payment may be completed.
    pub fn complete(&self, now: DateTime<Utc>) -> Result<Payment, DomainError> {
        if self.status != PaymentStatus::Pending {
            return Err(self.rejection("complete", PaymentStatus::Pending));
        }
        Ok(Payment {
            status: PaymentStatus::Completed,
            paid_at: Some(now),
            ..self.clone()
        })
    }

    /// Only a completed payment may be refunded.
    pub fn refund(&self, now: DateTime<Utc>) -> Result<Payment, DomainError> {
        if self.status != PaymentStatus::Completed {
            return Err(self.rejection("refund", PaymentStatus::Completed));
        }
        Ok(Payment {
            status: PaymentStatus::Refunded,
            refunded_at: Some(now),
            ..self.clone()
        })
    }

    /// Onsite payments are settled at the door on check-in.
    pub fn settles_at_check_in(&self) -> bool {
        self.method == PaymentMethod::Onsite && self.status == PaymentStatus::Pending
    }

    /// Card payments already taken must be refunded when the booking is cancelled.
    pub fn needs_refund_on_cancel(&self) -> bool {
        self.method == PaymentMethod::CreditCard && self.status == PaymentStatus::Completed
    }

    fn rejection(&self, action: &str, expected: PaymentStatus) -> DomainError {
        DomainError::validation(format!(
            "cannot {action} payment {}: status is {}, expected {expected}",
            self.id, self.status
        ))
        .with_detail(json!({
            "payment_id": self.id.to_string(),
            "status": self.status.as_str(),
        }))
    }
}
