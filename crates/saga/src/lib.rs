//! Durable saga orchestration for the end-user, booking and brand
//! workflows.
//!
//! A saga is a sequence of activities run through a [`SagaContext`]. Each
//! completed activity is recorded by the [`WorkflowExecutor`] so an
//! interrupted execution can be rejoined without repeating side effects;
//! each side effect may register an undo action on the execution's
//! [`CompensationStack`], which is drained newest-first when a later step
//! fails, the execution is cancelled, or its deadline passes.
//!
//! The business workflows are:
//! 1. [`IdentitySaga`]: end users across the identity provider and the local table
//! 2. [`BookingSaga`]: booking creation, check-in by QR code, cancellation
//! 3. [`BrandSaga`]: brand provisioning under the organization's plan limit

pub mod activity;
pub mod booking;
pub mod brand;
pub mod compensation;
pub mod config;
pub mod context;
pub mod correlation;
pub mod error;
pub mod executor;
pub mod identity;
pub mod services;

pub use activity::{ActivityPolicies, ActivityPolicy};
pub use booking::{
    BookingConfirmation, BookingSaga, CancellationResult, CheckInResult, CreateBookingRequest,
};
pub use brand::BrandSaga;
pub use compensation::{Compensation, CompensationReport, CompensationStack};
pub use config::SagaConfig;
pub use context::{Interruption, SagaContext};
pub use correlation::{DUPLICATE_IN_FLIGHT, DuplicatePolicy, InFlightRegistry, Operation};
pub use error::ActivityFailure;
pub use executor::WorkflowExecutor;
pub use identity::{CreateEndUser, IdentitySaga, UpdateEndUser};
pub use services::{
    BookingStore, BrandStore, IdentityProvider, InMemoryDatastore, InMemoryIdentityProvider,
    InMemoryOrganizationDirectory, InMemoryRefundHook, OrganizationDirectory, PaymentStore,
    RefundHook, RefundRequest, UserStore,
};
