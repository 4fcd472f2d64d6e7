//! Booking lifecycle: creation with QR code and payment, check-in, cancel.

use chrono::{DateTime, Utc};
use common::RecordId;
use domain::{
    Booking, DomainError, NewBooking, ParticipantsInput, Payment, PaymentRequest, QrCode,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::correlation::{self, BOOKING_CANCEL, BOOKING_CHECK_IN, BOOKING_CREATE};
use crate::error::ActivityFailure;
use crate::executor::WorkflowExecutor;
use crate::services::{BookingStore, PaymentStore, RefundHook, RefundRequest};

/// Input of [`BookingSaga::create_booking`].
///
/// Accepts both `snake_case` and the storefront's `camelCase` field names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateBookingRequest {
    #[serde(alias = "experienceId")]
    pub experience_id: String,
    #[serde(alias = "userId")]
    pub user_id: String,
    #[serde(alias = "numberOfParticipants")]
    pub number_of_participants: ParticipantsInput,
    #[serde(default, alias = "scheduledVisitTime")]
    pub scheduled_visit_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub payment: Option<PaymentRequest>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingConfirmation {
    pub booking: Booking,
    pub payment: Option<Payment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckInResult {
    pub booking: Booking,
    /// The onsite payment settled at the door, if any.
    pub settled_payment: Option<Payment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancellationResult {
    pub booking: Booking,
    /// A completed card payment must be refunded.
    pub refund_required: bool,
    /// The refund hook accepted the request.
    pub refund_requested: bool,
}

/// Inserts a confirmed booking, drawing a second QR code if the first one
/// collides.
async fn insert_with_fresh_code<D: BookingStore>(
    store: &D,
    input: &NewBooking,
) -> Result<Booking, ActivityFailure> {
    let now = Utc::now();
    let first = Booking::confirmed(input.clone(), QrCode::generate(now), now);
    match store.insert_booking(first).await {
        Err(ActivityFailure::UniqueViolation(constraint)) => {
            tracing::warn!(%constraint, "QR code collision, drawing a new code");
            let now = Utc::now();
            store
                .insert_booking(Booking::confirmed(input.clone(), QrCode::generate(now), now))
                .await
        }
        other => other,
    }
}

/// Applies a status transition with a compare-and-set on the stored status.
///
/// When another saga moved the booking first, the transition is checked
/// again against the stored row so the caller gets the graph error for the
/// state that actually won.
async fn transition<D: BookingStore>(
    store: &D,
    booking: &Booking,
    apply: impl Fn(&Booking) -> Result<Booking, DomainError>,
) -> Result<Booking, ActivityFailure> {
    let next = apply(booking)?;
    let target = next.status;
    if let Some(updated) = store.update_booking(next, booking.status).await? {
        return Ok(updated);
    }

    let current = store
        .find_booking(booking.id)
        .await?
        .ok_or_else(|| ActivityFailure::row_not_found("booking", booking.id))?;
    // Our own earlier attempt committed before its response was lost.
    if current.status == target {
        return Ok(current);
    }
    tracing::warn!(
        booking_id = %booking.id,
        status = current.status.as_str(),
        "booking status changed concurrently"
    );
    apply(&current)?;
    Err(DomainError::workflow(format!(
        "booking {} changed while being updated",
        booking.id
    ))
    .into())
}

async fn settle_onsite_payment<D: PaymentStore>(
    store: &D,
    booking_id: RecordId,
) -> Result<Option<Payment>, ActivityFailure> {
    match store.find_payment_for_booking(booking_id).await? {
        Some(payment) if payment.settles_at_check_in() => {
            let completed = payment.complete(Utc::now())?;
            store.update_payment(completed).await.map(Some)
        }
        _ => Ok(None),
    }
}

/// Drives bookings through `confirmed → attended | cancelled`.
#[derive(Debug, Clone)]
pub struct BookingSaga<D, R> {
    executor: WorkflowExecutor,
    store: D,
    refunds: R,
}

impl<D, R> BookingSaga<D, R>
where
    D: BookingStore + PaymentStore + Clone + 'static,
    R: RefundHook + Clone + 'static,
{
    pub fn new(executor: WorkflowExecutor, store: D, refunds: R) -> Self {
        Self {
            executor,
            store,
            refunds,
        }
    }

    pub fn executor(&self) -> &WorkflowExecutor {
        &self.executor
    }

    /// Creates a confirmed booking with a fresh QR code and, when
    /// requested, a pending payment. A failed payment insert deletes the
    /// booking again.
    #[tracing::instrument(
        skip(self, request),
        fields(user_id = %request.user_id, experience_id = %request.experience_id)
    )]
    pub async fn create_booking(
        &self,
        request: CreateBookingRequest,
    ) -> Result<BookingConfirmation, DomainError> {
        let input = NewBooking::parse(
            &request.experience_id,
            &request.user_id,
            &request.number_of_participants,
            request.scheduled_visit_time,
        )?;
        if let Some(payment) = &request.payment {
            payment.validate()?;
        }
        let key = correlation::booking_create_key(&input.user_id, &input.experience_id);
        let recorded = request.clone();
        let store = self.store.clone();

        self.executor
            .execute_with_input(BOOKING_CREATE, key, &recorded, move |ctx| async move {
                let policies = ctx.policies().clone();

                let booking: Booking = ctx
                    .activity("insert_booking", &policies.datastore, || {
                        insert_with_fresh_code(&store, &input)
                    })
                    .await?;
                {
                    let store = store.clone();
                    let booking_id = booking.id;
                    ctx.compensate("delete booking", move || {
                        let store = store.clone();
                        async move { BookingStore::delete_booking(&store, booking_id).await.map(|_| ()) }
                    });
                }

                let payment = match &request.payment {
                    Some(payment_request) => {
                        let payment: Payment = ctx
                            .activity("insert_payment", &policies.datastore, || {
                                store.insert_payment(Payment::pending(
                                    booking.id,
                                    payment_request,
                                    Utc::now(),
                                ))
                            })
                            .await?;
                        Some(payment)
                    }
                    None => None,
                };

                tracing::info!(booking_id = %booking.id, qr_code = %booking.qr_code, "booking confirmed");
                Ok(BookingConfirmation { booking, payment })
            })
            .await
    }

    /// Marks the booking carrying `qr_code` as attended.
    ///
    /// A pending onsite payment is completed afterwards; if that fails the
    /// check-in still succeeds.
    #[tracing::instrument(skip(self))]
    pub async fn check_in_with_qr_code(&self, qr_code: &str) -> Result<CheckInResult, DomainError> {
        let code = QrCode::from_scan(qr_code);
        if code.as_str().is_empty() {
            return Err(DomainError::invalid_qr_code(code.as_str()));
        }
        let key = correlation::booking_check_in_key(code.as_str());
        let store = self.store.clone();

        self.executor
            .execute(BOOKING_CHECK_IN, key, move |ctx| async move {
                let policies = ctx.policies().clone();

                let found: Option<Booking> = ctx
                    .activity("find_booking_by_qr", &policies.datastore, || {
                        store.find_booking_by_qr(code.as_str())
                    })
                    .await?;
                let booking = found.ok_or_else(|| DomainError::invalid_qr_code(code.as_str()))?;

                let attended: Booking = ctx
                    .activity("mark_attended", &policies.datastore, || {
                        transition(&store, &booking, |b| b.check_in(Utc::now()))
                    })
                    .await?;

                let settled = ctx
                    .activity("settle_onsite_payment", &policies.datastore, || {
                        settle_onsite_payment(&store, attended.id)
                    })
                    .await;
                let settled_payment = match settled {
                    Ok(payment) => payment,
                    Err(e) => {
                        tracing::warn!(booking_id = %attended.id, error = %e, "onsite payment was not completed");
                        None
                    }
                };

                tracing::info!(booking_id = %attended.id, "booking checked in");
                Ok(CheckInResult {
                    booking: attended,
                    settled_payment,
                })
            })
            .await
    }

    /// Cancels a confirmed booking.
    ///
    /// A completed card payment sets `refund_required` and is handed to the
    /// refund hook; a failing hook does not fail the cancellation.
    #[tracing::instrument(skip(self, reason), fields(booking_id = %booking_id))]
    pub async fn cancel_booking(
        &self,
        booking_id: RecordId,
        reason: Option<String>,
    ) -> Result<CancellationResult, DomainError> {
        let key = correlation::booking_cancel_key(booking_id);
        let recorded = json!({ "reason": &reason });
        let store = self.store.clone();
        let refunds = self.refunds.clone();

        self.executor
            .execute_with_input(BOOKING_CANCEL, key, &recorded, move |ctx| async move {
                let policies = ctx.policies().clone();

                let found: Option<Booking> = ctx
                    .activity("find_booking", &policies.datastore, || {
                        store.find_booking(booking_id)
                    })
                    .await?;
                let booking = found.ok_or_else(|| DomainError::not_found("booking", booking_id))?;

                let payment: Option<Payment> = ctx
                    .activity("find_payment", &policies.datastore, || {
                        store.find_payment_for_booking(booking_id)
                    })
                    .await?;

                let cancelled: Booking = ctx
                    .activity("mark_cancelled", &policies.datastore, || {
                        transition(&store, &booking, |b| b.cancel(reason.clone(), Utc::now()))
                    })
                    .await?;

                let refundable = payment.filter(Payment::needs_refund_on_cancel);
                let refund_required = refundable.is_some();
                let mut refund_requested = false;
                if let Some(payment) = refundable {
                    let request = RefundRequest::for_cancellation(&payment, &cancelled);
                    match ctx
                        .activity("request_refund", &policies.provider, || {
                            refunds.request_refund(&request)
                        })
                        .await
                    {
                        Ok(()) => refund_requested = true,
                        Err(e) => {
                            tracing::warn!(payment_id = %payment.id, error = %e, "refund request failed");
                        }
                    }
                }

                tracing::info!(refund_required, "booking cancelled");
                Ok(CancellationResult {
                    booking: cancelled,
                    refund_required,
                    refund_requested,
                })
            })
            .await
    }

    /// Bookings made by a user, straight from the datastore.
    pub async fn bookings_for_user(&self, user_id: &str) -> Result<Vec<Booking>, DomainError> {
        Ok(self.store.list_bookings_for_user(user_id).await?)
    }
}
