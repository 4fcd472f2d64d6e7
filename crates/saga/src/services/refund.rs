//! Refund hook invoked when a paid booking is cancelled.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::RecordId;
use domain::{Booking, Payment};
use serde::{Deserialize, Serialize};

use crate::error::ActivityFailure;

/// A refund asked for by the booking saga.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefundRequest {
    pub payment_id: RecordId,
    pub booking_id: RecordId,
    pub amount_cents: i64,
    pub currency: String,
    pub reason: Option<String>,
}

impl RefundRequest {
    pub fn for_cancellation(payment: &Payment, booking: &Booking) -> Self {
        Self {
            payment_id: payment.id,
            booking_id: booking.id,
            amount_cents: payment.amount_cents,
            currency: payment.currency.clone(),
            reason: booking.cancellation_reason.clone(),
        }
    }
}

/// Receives refund requests. Failures never fail the cancellation.
#[async_trait]
pub trait RefundHook: Send + Sync {
    async fn request_refund(&self, request: &RefundRequest) -> Result<(), ActivityFailure>;
}

#[derive(Debug, Default)]
struct InMemoryRefundState {
    requests: Vec<RefundRequest>,
    fail: bool,
}

/// Refund hook that logs and remembers each request.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRefundHook {
    state: Arc<RwLock<InMemoryRefundState>>,
}

impl InMemoryRefundHook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the hook to fail every request.
    pub fn set_fail(&self, fail: bool) {
        self.state.write().unwrap().fail = fail;
    }

    /// Returns the requests received so far.
    pub fn requests(&self) -> Vec<RefundRequest> {
        self.state.read().unwrap().requests.clone()
    }
}

#[async_trait]
impl RefundHook for InMemoryRefundHook {
    async fn request_refund(&self, request: &RefundRequest) -> Result<(), ActivityFailure> {
        let mut state = self.state.write().unwrap();
        if state.fail {
            return Err(ActivityFailure::provider(503, "refund service unavailable"));
        }
        tracing::info!(
            payment_id = %request.payment_id,
            booking_id = %request.booking_id,
            amount_cents = request.amount_cents,
            currency = %request.currency,
            "refund requested"
        );
        state.requests.push(request.clone());
        Ok(())
    }
}
