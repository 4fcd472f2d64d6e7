//! Collaborator contracts and in-memory implementations.
//!
//! Each collaborator is an `async_trait` with an in-memory implementation
//! for tests and local runs. The in-memory versions can be told to fail
//! specific operations so compensation paths can be exercised.

pub mod datastore;
pub mod directory;
pub mod identity;
pub mod refund;

use std::collections::HashMap;
use std::hash::Hash;

pub use datastore::{BookingStore, BrandStore, InMemoryDatastore, PaymentStore, StoreOp, UserStore};
pub use directory::{DirectoryOp, InMemoryOrganizationDirectory, OrganizationDirectory};
pub use identity::{IdentityOp, IdentityProvider, InMemoryIdentityProvider};
pub use refund::{InMemoryRefundHook, RefundHook, RefundRequest};

use crate::error::ActivityFailure;

#[derive(Debug, Clone)]
struct Fault {
    failure: ActivityFailure,
    remaining: Option<u32>,
}

/// Per-operation call counters and injected failures.
#[derive(Debug)]
pub(crate) struct FaultInjector<Op> {
    faults: HashMap<Op, Fault>,
    calls: HashMap<Op, usize>,
}

impl<Op> Default for FaultInjector<Op> {
    fn default() -> Self {
        Self {
            faults: HashMap::new(),
            calls: HashMap::new(),
        }
    }
}

impl<Op: Copy + Eq + Hash> FaultInjector<Op> {
    /// Fails every call to `op` until cleared.
    pub fn fail(&mut self, op: Op, failure: ActivityFailure) {
        self.faults.insert(
            op,
            Fault {
                failure,
                remaining: None,
            },
        );
    }

    /// Fails the next `times` calls to `op`.
    pub fn fail_times(&mut self, op: Op, failure: ActivityFailure, times: u32) {
        self.faults.insert(
            op,
            Fault {
                failure,
                remaining: Some(times),
            },
        );
    }

    pub fn clear(&mut self, op: Op) {
        self.faults.remove(&op);
    }

    pub fn calls(&self, op: Op) -> usize {
        self.calls.get(&op).copied().unwrap_or(0)
    }

    /// Counts a call to `op` and returns the injected failure, if any.
    pub fn enter(&mut self, op: Op) -> Result<(), ActivityFailure> {
        *self.calls.entry(op).or_default() += 1;

        let Some(fault) = self.faults.get_mut(&op) else {
            return Ok(());
        };
        let (failure, exhausted) = match fault.remaining.as_mut() {
            None => (Some(fault.failure.clone()), false),
            Some(0) => (None, true),
            Some(n) => {
                *n -= 1;
                (Some(fault.failure.clone()), *n == 0)
            }
        };
        if exhausted {
            self.faults.remove(&op);
        }
        failure.map_or(Ok(()), Err)
    }
}
