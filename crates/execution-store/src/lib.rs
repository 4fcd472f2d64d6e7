//! Durable storage for workflow executions.
//!
//! Each execution is a row keyed by [`ExecutionId`] and tagged with the
//! [`CorrelationKey`] of the business operation it runs. Completed activity
//! results are appended to an ordered step log so an interrupted saga can be
//! replayed without calling its collaborators again.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod record;
pub mod store;

pub use common::{CorrelationKey, ExecutionId};
pub use error::{ExecutionStoreError, Result};
pub use memory::InMemoryExecutionStore;
pub use postgres::PostgresExecutionStore;
pub use record::{ExecutionOutcome, ExecutionRecord, ExecutionStatus, StepRecord};
pub use store::{ExecutionStore, ExecutionStoreExt};
