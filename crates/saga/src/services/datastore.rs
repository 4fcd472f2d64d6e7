//! Relational datastore contracts and an in-memory implementation.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::RecordId;
use domain::{Booking, BookingStatus, Brand, LocalUser, Payment, normalize_email};

use super::FaultInjector;
use crate::error::ActivityFailure;

/// Local end-user records.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Inserts a user. Email is unique among live users.
    async fn insert_user(&self, user: LocalUser) -> Result<LocalUser, ActivityFailure>;

    async fn find_user(&self, id: RecordId) -> Result<Option<LocalUser>, ActivityFailure>;

    /// Finds the user with this email that is not deleted.
    async fn find_live_user_by_email(
        &self,
        email: &str,
    ) -> Result<Option<LocalUser>, ActivityFailure>;

    /// Replaces a user row.
    async fn update_user(&self, user: LocalUser) -> Result<LocalUser, ActivityFailure>;

    /// Sets `deleted_at`; rows are never removed.
    async fn mark_user_deleted(
        &self,
        id: RecordId,
        at: DateTime<Utc>,
    ) -> Result<LocalUser, ActivityFailure>;
}

/// Booking rows. QR codes are unique.
#[async_trait]
pub trait BookingStore: Send + Sync {
    async fn insert_booking(&self, booking: Booking) -> Result<Booking, ActivityFailure>;

    async fn find_booking(&self, id: RecordId) -> Result<Option<Booking>, ActivityFailure>;

    async fn find_booking_by_qr(&self, qr_code: &str) -> Result<Option<Booking>, ActivityFailure>;

    async fn list_bookings_for_user(&self, user_id: &str) -> Result<Vec<Booking>, ActivityFailure>;

    /// Replaces the booking row only while its stored status is still
    /// `expected`. Returns `None` when the row has moved on; a missing row
    /// is `RowNotFound`.
    async fn update_booking(
        &self,
        booking: Booking,
        expected: BookingStatus,
    ) -> Result<Option<Booking>, ActivityFailure>;

    /// Returns false if no such booking existed.
    async fn delete_booking(&self, id: RecordId) -> Result<bool, ActivityFailure>;
}

/// Payment rows, at most one per booking.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn insert_payment(&self, payment: Payment) -> Result<Payment, ActivityFailure>;

    async fn find_payment_for_booking(
        &self,
        booking_id: RecordId,
    ) -> Result<Option<Payment>, ActivityFailure>;

    async fn update_payment(&self, payment: Payment) -> Result<Payment, ActivityFailure>;

    async fn delete_payment(&self, id: RecordId) -> Result<bool, ActivityFailure>;
}

/// Brand rows.
#[async_trait]
pub trait BrandStore: Send + Sync {
    async fn count_active_brands(&self, organization_id: &str) -> Result<u32, ActivityFailure>;

    async fn list_brands(&self, organization_id: &str) -> Result<Vec<Brand>, ActivityFailure>;

    /// Inserts the brand unless the organization already has `limit`
    /// active brands, in which case nothing is written and `None` is
    /// returned. Count and insert are atomic.
    async fn insert_brand_within_limit(
        &self,
        brand: Brand,
        limit: u32,
    ) -> Result<Option<Brand>, ActivityFailure>;

    async fn delete_brand(&self, id: RecordId) -> Result<bool, ActivityFailure>;
}

/// Datastore operations, for failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    InsertUser,
    FindUser,
    FindUserByEmail,
    UpdateUser,
    MarkUserDeleted,
    InsertBooking,
    FindBooking,
    FindBookingByQr,
    ListBookings,
    UpdateBooking,
    DeleteBooking,
    InsertPayment,
    FindPayment,
    UpdatePayment,
    DeletePayment,
    CountBrands,
    ListBrands,
    InsertBrand,
    DeleteBrand,
}

#[derive(Debug, Default)]
struct InMemoryDatastoreState {
    users: Vec<LocalUser>,
    bookings: Vec<Booking>,
    payments: Vec<Payment>,
    brands: Vec<Brand>,
    faults: FaultInjector<StoreOp>,
}

/// In-memory datastore for testing.
///
/// Enforces the same constraints as the relational schema: unique live
/// user emails, unique QR codes, one payment per booking.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDatastore {
    state: Arc<RwLock<InMemoryDatastoreState>>,
}

impl InMemoryDatastore {
    /// Creates a new, empty datastore.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call to `op` fail with `failure`.
    pub fn set_failure(&self, op: StoreOp, failure: ActivityFailure) {
        self.state.write().unwrap().faults.fail(op, failure);
    }

    /// Makes the next `times` calls to `op` fail with `failure`.
    pub fn set_transient_failure(&self, op: StoreOp, failure: ActivityFailure, times: u32) {
        self.state
            .write()
            .unwrap()
            .faults
            .fail_times(op, failure, times);
    }

    pub fn clear_failure(&self, op: StoreOp) {
        self.state.write().unwrap().faults.clear(op);
    }

    /// Number of calls made to `op`, failed ones included.
    pub fn calls(&self, op: StoreOp) -> usize {
        self.state.read().unwrap().faults.calls(op)
    }

    /// Returns the number of user rows, deleted ones included.
    pub fn user_count(&self) -> usize {
        self.state.read().unwrap().users.len()
    }

    /// Returns the number of live user rows with this email.
    pub fn live_users_with_email(&self, email: &str) -> usize {
        let email = normalize_email(email);
        self.state
            .read()
            .unwrap()
            .users
            .iter()
            .filter(|u| u.email == email && !u.is_deleted())
            .count()
    }

    pub fn user(&self, id: RecordId) -> Option<LocalUser> {
        self.state
            .read()
            .unwrap()
            .users
            .iter()
            .find(|u| u.id == id)
            .cloned()
    }

    pub fn booking_count(&self) -> usize {
        self.state.read().unwrap().bookings.len()
    }

    pub fn booking(&self, id: RecordId) -> Option<Booking> {
        self.state
            .read()
            .unwrap()
            .bookings
            .iter()
            .find(|b| b.id == id)
            .cloned()
    }

    pub fn payment_count(&self) -> usize {
        self.state.read().unwrap().payments.len()
    }

    pub fn payment_for(&self, booking_id: RecordId) -> Option<Payment> {
        self.state
            .read()
            .unwrap()
            .payments
            .iter()
            .find(|p| p.booking_id == booking_id)
            .cloned()
    }

    pub fn brand_count(&self, organization_id: &str) -> usize {
        self.state
            .read()
            .unwrap()
            .brands
            .iter()
            .filter(|b| b.organization_id == organization_id)
            .count()
    }
}

#[async_trait]
impl UserStore for InMemoryDatastore {
    async fn insert_user(&self, user: LocalUser) -> Result<LocalUser, ActivityFailure> {
        let mut state = self.state.write().unwrap();
        state.faults.enter(StoreOp::InsertUser)?;

        let taken = state
            .users
            .iter()
            .any(|u| u.email == user.email && !u.is_deleted());
        if taken {
            return Err(ActivityFailure::UniqueViolation("users_live_email_key".into()));
        }
        state.users.push(user.clone());
        Ok(user)
    }

    async fn find_user(&self, id: RecordId) -> Result<Option<LocalUser>, ActivityFailure> {
        let mut state = self.state.write().unwrap();
        state.faults.enter(StoreOp::FindUser)?;
        Ok(state.users.iter().find(|u| u.id == id).cloned())
    }

    async fn find_live_user_by_email(
        &self,
        email: &str,
    ) -> Result<Option<LocalUser>, ActivityFailure> {
        let mut state = self.state.write().unwrap();
        state.faults.enter(StoreOp::FindUserByEmail)?;
        let email = normalize_email(email);
        Ok(state
            .users
            .iter()
            .find(|u| u.email == email && !u.is_deleted())
            .cloned())
    }

    async fn update_user(&self, user: LocalUser) -> Result<LocalUser, ActivityFailure> {
        let mut state = self.state.write().unwrap();
        state.faults.enter(StoreOp::UpdateUser)?;
        let row = state
            .users
            .iter_mut()
            .find(|u| u.id == user.id)
            .ok_or_else(|| ActivityFailure::row_not_found("user", user.id))?;
        *row = user.clone();
        Ok(user)
    }

    async fn mark_user_deleted(
        &self,
        id: RecordId,
        at: DateTime<Utc>,
    ) -> Result<LocalUser, ActivityFailure> {
        let mut state = self.state.write().unwrap();
        state.faults.enter(StoreOp::MarkUserDeleted)?;
        let row = state
            .users
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or_else(|| ActivityFailure::row_not_found("user", id))?;
        if row.deleted_at.is_none() {
            row.deleted_at = Some(at);
        }
        Ok(row.clone())
    }
}

#[async_trait]
impl BookingStore for InMemoryDatastore {
    async fn insert_booking(&self, booking: Booking) -> Result<Booking, ActivityFailure> {
        let mut state = self.state.write().unwrap();
        state.faults.enter(StoreOp::InsertBooking)?;

        if state.bookings.iter().any(|b| b.qr_code == booking.qr_code) {
            return Err(ActivityFailure::UniqueViolation("bookings_qr_code_key".into()));
        }
        state.bookings.push(booking.clone());
        Ok(booking)
    }

    async fn find_booking(&self, id: RecordId) -> Result<Option<Booking>, ActivityFailure> {
        let mut state = self.state.write().unwrap();
        state.faults.enter(StoreOp::FindBooking)?;
        Ok(state.bookings.iter().find(|b| b.id == id).cloned())
    }

    async fn find_booking_by_qr(&self, qr_code: &str) -> Result<Option<Booking>, ActivityFailure> {
        let mut state = self.state.write().unwrap();
        state.faults.enter(StoreOp::FindBookingByQr)?;
        Ok(state
            .bookings
            .iter()
            .find(|b| b.qr_code.as_str() == qr_code)
            .cloned())
    }

    async fn list_bookings_for_user(&self, user_id: &str) -> Result<Vec<Booking>, ActivityFailure> {
        let mut state = self.state.write().unwrap();
        state.faults.enter(StoreOp::ListBookings)?;
        Ok(state
            .bookings
            .iter()
            .filter(|b| b.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn update_booking(
        &self,
        booking: Booking,
        expected: BookingStatus,
    ) -> Result<Option<Booking>, ActivityFailure> {
        let mut state = self.state.write().unwrap();
        state.faults.enter(StoreOp::UpdateBooking)?;
        let row = state
            .bookings
            .iter_mut()
            .find(|b| b.id == booking.id)
            .ok_or_else(|| ActivityFailure::row_not_found("booking", booking.id))?;
        if row.status != expected {
            return Ok(None);
        }
        *row = booking.clone();
        Ok(Some(booking))
    }

    async fn delete_booking(&self, id: RecordId) -> Result<bool, ActivityFailure> {
        let mut state = self.state.write().unwrap();
        state.faults.enter(StoreOp::DeleteBooking)?;
        let before = state.bookings.len();
        state.bookings.retain(|b| b.id != id);
        Ok(state.bookings.len() < before)
    }
}

#[async_trait]
impl PaymentStore for InMemoryDatastore {
    async fn insert_payment(&self, payment: Payment) -> Result<Payment, ActivityFailure> {
        let mut state = self.state.write().unwrap();
        state.faults.enter(StoreOp::InsertPayment)?;

        if state
            .payments
            .iter()
            .any(|p| p.booking_id == payment.booking_id)
        {
            return Err(ActivityFailure::UniqueViolation("payments_booking_id_key".into()));
        }
        state.payments.push(payment.clone());
        Ok(payment)
    }

    async fn find_payment_for_booking(
        &self,
        booking_id: RecordId,
    ) -> Result<Option<Payment>, ActivityFailure> {
        let mut state = self.state.write().unwrap();
        state.faults.enter(StoreOp::FindPayment)?;
        Ok(state
            .payments
            .iter()
            .find(|p| p.booking_id == booking_id)
            .cloned())
    }

    async fn update_payment(&self, payment: Payment) -> Result<Payment, ActivityFailure> {
        let mut state = self.state.write().unwrap();
        state.faults.enter(StoreOp::UpdatePayment)?;
        let row = state
            .payments
            .iter_mut()
            .find(|p| p.id == payment.id)
            .ok_or_else(|| ActivityFailure::row_not_found("payment", payment.id))?;
        *row = payment.clone();
        Ok(payment)
    }

    async fn delete_payment(&self, id: RecordId) -> Result<bool, ActivityFailure> {
        let mut state = self.state.write().unwrap();
        state.faults.enter(StoreOp::DeletePayment)?;
        let before = state.payments.len();
        state.payments.retain(|p| p.id != id);
        Ok(state.payments.len() < before)
    }
}

#[async_trait]
impl BrandStore for InMemoryDatastore {
    async fn count_active_brands(&self, organization_id: &str) -> Result<u32, ActivityFailure> {
        let mut state = self.state.write().unwrap();
        state.faults.enter(StoreOp::CountBrands)?;
        let count = state
            .brands
            .iter()
            .filter(|b| b.organization_id == organization_id && b.is_active)
            .count();
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    async fn list_brands(&self, organization_id: &str) -> Result<Vec<Brand>, ActivityFailure> {
        let mut state = self.state.write().unwrap();
        state.faults.enter(StoreOp::ListBrands)?;
        Ok(state
            .brands
            .iter()
            .filter(|b| b.organization_id == organization_id)
            .cloned()
            .collect())
    }

    async fn insert_brand_within_limit(
        &self,
        brand: Brand,
        limit: u32,
    ) -> Result<Option<Brand>, ActivityFailure> {
        let mut state = self.state.write().unwrap();
        state.faults.enter(StoreOp::InsertBrand)?;

        let active = state
            .brands
            .iter()
            .filter(|b| b.organization_id == brand.organization_id && b.is_active)
            .count();
        if active >= limit as usize {
            return Ok(None);
        }
        state.brands.push(brand.clone());
        Ok(Some(brand))
    }

    async fn delete_brand(&self, id: RecordId) -> Result<bool, ActivityFailure> {
        let mut state = self.state.write().unwrap();
        state.faults.enter(StoreOp::DeleteBrand)?;
        let before = state.brands.len();
        state.brands.retain(|b| b.id != id);
        Ok(state.brands.len() < before)
    }
}
