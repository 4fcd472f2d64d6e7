//! Domain layer for the saga orchestration core.
//!
//! This crate provides:
//! - The closed [`DomainError`] taxonomy every saga reports with
//! - End-user identity types (provider profile and local record)
//! - The booking state machine and QR codes
//! - Payments coupled to bookings
//! - Brands, organizations and plan limits

pub mod booking;
pub mod brand;
pub mod error;
pub mod identity;
pub mod payment;

pub use booking::{
    Booking, BookingStatus, MAX_PARTICIPANTS, NewBooking, ParticipantCount, ParticipantsInput,
    QrCode,
};
pub use brand::{Brand, NewBrand, NewOrganization, Organization, OrganizationPatch, PlanType};
pub use error::{DomainError, ErrorKind, RECONCILIATION_FLAG};
pub use identity::{
    EndUserIdentity, LocalUser, LocalUserPatch, PlatformSettings, ProfileInput, ProfilePatch,
    ProviderProfile, normalize_email, validate_email,
};
pub use payment::{Payment, PaymentMethod, PaymentRequest, PaymentStatus};
