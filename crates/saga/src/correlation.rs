//! Correlation keys and the in-flight duplicate policy.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use common::{CorrelationKey, ExecutionId};
use domain::{DomainError, normalize_email};
use serde_json::json;
use tokio::sync::watch;

/// Detail `reason` of the error returned for a rejected duplicate.
pub const DUPLICATE_IN_FLIGHT: &str = "duplicate_in_flight";

/// What to do when an execution with the same key is already running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicatePolicy {
    /// Refuse the second invocation while the first is in flight.
    RejectDuplicate,
    /// Let every invocation run as its own execution.
    AllowDuplicate,
}

/// A business operation: its name, key prefix and duplicate policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operation {
    pub name: &'static str,
    pub key_prefix: &'static str,
    pub policy: DuplicatePolicy,
}

impl Operation {
    pub const fn new(name: &'static str, key_prefix: &'static str, policy: DuplicatePolicy) -> Self {
        Self {
            name,
            key_prefix,
            policy,
        }
    }

    /// Key for one invocation of this operation.
    pub fn key(&self, identity: impl std::fmt::Display) -> CorrelationKey {
        CorrelationKey::new(self.key_prefix, identity)
    }
}

pub const USER_CREATE: Operation =
    Operation::new("user.create", "user-create", DuplicatePolicy::RejectDuplicate);
pub const USER_UPDATE: Operation =
    Operation::new("user.update", "user-update", DuplicatePolicy::RejectDuplicate);
pub const USER_DELETE: Operation =
    Operation::new("user.delete", "user-delete", DuplicatePolicy::RejectDuplicate);
pub const BOOKING_CREATE: Operation =
    Operation::new("booking.create", "booking-create", DuplicatePolicy::AllowDuplicate);
pub const BOOKING_CHECK_IN: Operation =
    Operation::new("booking.check_in", "booking-checkin", DuplicatePolicy::RejectDuplicate);
pub const BOOKING_CANCEL: Operation =
    Operation::new("booking.cancel", "booking-cancel", DuplicatePolicy::RejectDuplicate);
pub const BRAND_CREATE: Operation =
    Operation::new("brand.create", "brand-create", DuplicatePolicy::RejectDuplicate);

/// `user-create-{email}`, with the email trimmed and lower-cased.
pub fn user_create_key(email: &str) -> CorrelationKey {
    USER_CREATE.key(normalize_email(email))
}

pub fn user_update_key(user_id: impl std::fmt::Display) -> CorrelationKey {
    USER_UPDATE.key(user_id)
}

pub fn user_delete_key(user_id: impl std::fmt::Display) -> CorrelationKey {
    USER_DELETE.key(user_id)
}

/// `booking-create-{userId}-{experienceId}`
pub fn booking_create_key(user_id: &str, experience_id: &str) -> CorrelationKey {
    BOOKING_CREATE.key(format!("{user_id}-{experience_id}"))
}

pub fn booking_check_in_key(qr_code: &str) -> CorrelationKey {
    BOOKING_CHECK_IN.key(qr_code)
}

pub fn booking_cancel_key(booking_id: impl std::fmt::Display) -> CorrelationKey {
    BOOKING_CANCEL.key(booking_id)
}

pub fn brand_create_key(organization_id: &str) -> CorrelationKey {
    BRAND_CREATE.key(organization_id)
}

/// The error returned when a duplicate invocation is refused.
pub fn duplicate_in_flight(key: &CorrelationKey, running: ExecutionId) -> DomainError {
    DomainError::workflow(format!("operation {key} is already in flight"))
        .with_detail(json!({
            "reason": DUPLICATE_IN_FLIGHT,
            "correlation_key": key.as_str(),
            "execution_id": running.to_string(),
        }))
        .with_non_retryable(false)
}

#[derive(Debug)]
struct InFlightEntry {
    execution_id: ExecutionId,
    cancel: watch::Sender<bool>,
}

type Live = HashMap<CorrelationKey, Vec<InFlightEntry>>;

/// Executions live in this process, by correlation key.
///
/// Holds keys and cancellation handles only; execution state lives in the
/// execution store.
#[derive(Debug, Clone, Default)]
pub struct InFlightRegistry {
    live: Arc<Mutex<Live>>,
}

impl InFlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Live> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a new execution for `key`, applying `policy`.
    ///
    /// The returned claim releases the key when dropped.
    pub fn claim(
        &self,
        key: &CorrelationKey,
        policy: DuplicatePolicy,
    ) -> Result<InFlightClaim, DomainError> {
        let mut live = self.lock();
        let entries = live.entry(key.clone()).or_default();

        if policy == DuplicatePolicy::RejectDuplicate
            && let Some(running) = entries.first()
        {
            return Err(duplicate_in_flight(key, running.execution_id));
        }

        let execution_id = ExecutionId::new();
        let (cancel, cancelled) = watch::channel(false);
        entries.push(InFlightEntry {
            execution_id,
            cancel,
        });

        Ok(InFlightClaim {
            registry: self.clone(),
            key: key.clone(),
            execution_id,
            cancelled,
        })
    }

    /// Asks a live execution to stop at its next activity boundary.
    ///
    /// Returns false if no such execution is live in this process.
    pub fn cancel(&self, execution_id: ExecutionId) -> bool {
        let live = self.lock();
        live.values()
            .flatten()
            .find(|e| e.execution_id == execution_id)
            .map(|e| e.cancel.send(true).is_ok())
            .unwrap_or(false)
    }

    pub fn is_live(&self, execution_id: ExecutionId) -> bool {
        self.lock()
            .values()
            .flatten()
            .any(|e| e.execution_id == execution_id)
    }

    /// Number of executions currently live.
    pub fn live_count(&self) -> usize {
        self.lock().values().map(Vec::len).sum()
    }

    fn rebind(&self, key: &CorrelationKey, from: ExecutionId, to: ExecutionId) {
        let mut live = self.lock();
        if let Some(entry) = live
            .get_mut(key)
            .and_then(|entries| entries.iter_mut().find(|e| e.execution_id == from))
        {
            entry.execution_id = to;
        }
    }

    fn release(&self, key: &CorrelationKey, execution_id: ExecutionId) {
        let mut live = self.lock();
        if let Some(entries) = live.get_mut(key) {
            entries.retain(|e| e.execution_id != execution_id);
            if entries.is_empty() {
                live.remove(key);
            }
        }
    }
}

/// A registered execution. Dropping it releases the key.
#[derive(Debug)]
pub struct InFlightClaim {
    registry: InFlightRegistry,
    key: CorrelationKey,
    execution_id: ExecutionId,
    cancelled: watch::Receiver<bool>,
}

impl InFlightClaim {
    pub fn execution_id(&self) -> ExecutionId {
        self.execution_id
    }

    pub fn key(&self) -> &CorrelationKey {
        &self.key
    }

    /// Receiver that flips to `true` when cancellation is requested.
    pub fn cancellation(&self) -> watch::Receiver<bool> {
        self.cancelled.clone()
    }

    /// Points the claim at an existing execution being rejoined.
    pub fn rebind(&mut self, execution_id: ExecutionId) {
        self.registry.rebind(&self.key, self.execution_id, execution_id);
        self.execution_id = execution_id;
    }
}

impl Drop for InFlightClaim {
    fn drop(&mut self) {
        self.registry.release(&self.key, self.execution_id);
    }
}

#[cfg(test)]
mod tests {
    use domain::ErrorKind;

    use super::*;

    #[test]
    fn test_key_formats() {
        assert_eq!(user_create_key("  A@X.com ").as_str(), "user-create-a@x.com");
        assert_eq!(user_update_key("u-1").as_str(), "user-update-u-1");
        assert_eq!(user_delete_key("u-1").as_str(), "user-delete-u-1");
        assert_eq!(booking_create_key("u1", "e1").as_str(), "booking-create-u1-e1");
        assert_eq!(booking_check_in_key("QR-1").as_str(), "booking-checkin-QR-1");
        assert_eq!(booking_cancel_key("b-1").as_str(), "booking-cancel-b-1");
        assert_eq!(brand_create_key("org-1").as_str(), "brand-create-org-1");
    }

    #[test]
    fn test_default_policies() {
        for op in [USER_CREATE, USER_UPDATE, USER_DELETE, BOOKING_CHECK_IN, BOOKING_CANCEL, BRAND_CREATE] {
            assert_eq!(op.policy, DuplicatePolicy::RejectDuplicate, "{}", op.name);
        }
        assert_eq!(BOOKING_CREATE.policy, DuplicatePolicy::AllowDuplicate);
    }

    #[test]
    fn test_reject_duplicate_while_in_flight() {
        let registry = InFlightRegistry::new();
        let key = brand_create_key("org-1");

        let first = registry.claim(&key, DuplicatePolicy::RejectDuplicate).unwrap();
        let err = registry
            .claim(&key, DuplicatePolicy::RejectDuplicate)
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::WorkflowError);
        assert!(err.is_retryable());
        assert_eq!(err.detail_str("reason"), Some(DUPLICATE_IN_FLIGHT));
        assert_eq!(err.detail_str("correlation_key"), Some("brand-create-org-1"));
        assert_eq!(
            err.detail_str("execution_id"),
            Some(first.execution_id().to_string().as_str())
        );

        drop(first);
        assert!(registry.claim(&key, DuplicatePolicy::RejectDuplicate).is_ok());
    }

    #[test]
    fn test_allow_duplicate_runs_independently() {
        let registry = InFlightRegistry::new();
        let key = booking_create_key("u1", "e1");

        let a = registry.claim(&key, DuplicatePolicy::AllowDuplicate).unwrap();
        let b = registry.claim(&key, DuplicatePolicy::AllowDuplicate).unwrap();
        assert_ne!(a.execution_id(), b.execution_id());
        assert_eq!(registry.live_count(), 2);

        drop(a);
        assert_eq!(registry.live_count(), 1);
        drop(b);
        assert_eq!(registry.live_count(), 0);
    }

    #[test]
    fn test_cancel_signals_receiver() {
        let registry = InFlightRegistry::new();
        let claim = registry
            .claim(&booking_cancel_key("b-1"), DuplicatePolicy::RejectDuplicate)
            .unwrap();
        let receiver = claim.cancellation();

        assert!(!*receiver.borrow());
        assert!(registry.cancel(claim.execution_id()));
        assert!(*receiver.borrow());
        assert!(!registry.cancel(ExecutionId::new()));
    }

    #[test]
    fn test_rebind_moves_registration() {
        let registry = InFlightRegistry::new();
        let mut claim = registry
            .claim(&user_delete_key("u-1"), DuplicatePolicy::RejectDuplicate)
            .unwrap();
        let provisional = claim.execution_id();
        let adopted = ExecutionId::new();

        claim.rebind(adopted);
        assert!(registry.is_live(adopted));
        assert!(!registry.is_live(provisional));

        drop(claim);
        assert!(!registry.is_live(adopted));
    }
}
