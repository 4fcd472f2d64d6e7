//! HTTP handlers, one module per resource.

pub mod bookings;
pub mod brands;
pub mod executions;
pub mod health;
pub mod metrics;
pub mod users;

use common::{ExecutionId, RecordId};
use domain::DomainError;
use saga::{
    BookingSaga, BrandSaga, IdentitySaga, InMemoryDatastore, InMemoryIdentityProvider,
    InMemoryOrganizationDirectory, InMemoryRefundHook, WorkflowExecutor,
};

use crate::error::ApiError;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub executor: WorkflowExecutor,
    pub identity: IdentitySaga<InMemoryIdentityProvider, InMemoryDatastore>,
    pub bookings: BookingSaga<InMemoryDatastore, InMemoryRefundHook>,
    pub brands: BrandSaga<InMemoryDatastore, InMemoryOrganizationDirectory>,
}

fn parse_record_id(id: &str) -> Result<RecordId, ApiError> {
    RecordId::parse(id)
        .ok_or_else(|| DomainError::validation(format!("invalid id: {id:?}")).into())
}

fn parse_execution_id(id: &str) -> Result<ExecutionId, ApiError> {
    ExecutionId::parse(id)
        .ok_or_else(|| DomainError::validation(format!("invalid execution id: {id:?}")).into())
}
