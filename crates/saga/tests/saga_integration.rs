//! Integration tests for the end-user, booking and brand sagas.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use common::{ExecutionId, RecordId};
use domain::{
    Booking, BookingStatus, ErrorKind, Payment, NewBrand, PaymentMethod, PaymentRequest, PlanType, PlatformSettings,
    ProfileInput, ProfilePatch,
};
use execution_store::{
    ExecutionRecord, ExecutionStatus, ExecutionStore, InMemoryExecutionStore, StepRecord,
};
use saga::correlation::{self, DuplicatePolicy, Operation};
use saga::services::{IdentityOp, StoreOp};
use saga::{
    ActivityFailure, BookingSaga, BookingStore, BrandSaga, CreateBookingRequest, CreateEndUser,
    IdentityProvider, IdentitySaga, InMemoryDatastore, InMemoryIdentityProvider,
    InMemoryOrganizationDirectory, InMemoryRefundHook, PaymentStore, SagaConfig, UpdateEndUser,
    WorkflowExecutor,
};
use serde_json::json;
use tokio::sync::{Barrier, Notify, oneshot};

struct TestHarness {
    executor: WorkflowExecutor,
    executions: InMemoryExecutionStore,
    identity: IdentitySaga<InMemoryIdentityProvider, InMemoryDatastore>,
    bookings: BookingSaga<InMemoryDatastore, InMemoryRefundHook>,
    brands: BrandSaga<InMemoryDatastore, InMemoryOrganizationDirectory>,
    provider: InMemoryIdentityProvider,
    datastore: InMemoryDatastore,
}

impl TestHarness {
    fn new() -> Self {
        Self::with_config(SagaConfig::default())
    }

    fn with_config(config: SagaConfig) -> Self {
        let config =
            config.with_retry_intervals(Duration::from_millis(1), Duration::from_millis(5));
        let executions = InMemoryExecutionStore::new();
        let executor = WorkflowExecutor::new(Arc::new(executions.clone()), config);
        let provider = InMemoryIdentityProvider::new();
        let datastore = InMemoryDatastore::new();

        Self {
            identity: IdentitySaga::new(executor.clone(), provider.clone(), datastore.clone()),
            bookings: BookingSaga::new(
                executor.clone(),
                datastore.clone(),
                InMemoryRefundHook::new(),
            ),
            brands: BrandSaga::new(
                executor.clone(),
                datastore.clone(),
                InMemoryOrganizationDirectory::new(),
            ),
            executor,
            executions,
            provider,
            datastore,
        }
    }

    async fn confirmed_booking(&self) -> RecordId {
        self.bookings
            .create_booking(booking_request())
            .await
            .unwrap()
            .booking
            .id
    }
}

fn end_user(email: &str) -> CreateEndUser {
    CreateEndUser {
        profile: ProfileInput::new(email).with_name("Ada", "Lovelace"),
        settings: PlatformSettings::default(),
    }
}

fn booking_request() -> CreateBookingRequest {
    serde_json::from_value(json!({
        "experienceId": "e1",
        "userId": "u1",
        "numberOfParticipants": "2",
    }))
    .unwrap()
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_failed_create_leaves_no_identity_behind() {
    let h = TestHarness::new();
    h.datastore
        .set_failure(StoreOp::InsertUser, ActivityFailure::Datastore("connection reset".into()));

    let err = h.identity.create_end_user(end_user("a@x.com")).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::DatabaseError);
    assert!(!h.provider.has_email("a@x.com"));
    assert_eq!(h.provider.identity_count(), 0);
    assert_eq!(h.datastore.live_users_with_email("a@x.com"), 0);

    let records = h
        .executor
        .executions_for(&correlation::user_create_key("a@x.com"))
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, ExecutionStatus::Failed);
    assert_eq!(records[0].compensated, vec!["delete provider identity".to_string()]);
    assert_eq!(records[0].error.as_ref().unwrap()["kind"], "DATABASE_ERROR");
}

#[tokio::test]
async fn test_create_is_idempotent_by_email() {
    let h = TestHarness::new();

    let first = h.identity.create_end_user(end_user("a@x.com")).await.unwrap();
    let second = h.identity.create_end_user(end_user(" A@X.com")).await.unwrap();

    assert_eq!(first.user.id, second.user.id);
    assert_eq!(first.profile.id, second.profile.id);
    assert_eq!(h.provider.calls(IdentityOp::Create), 1);
    assert_eq!(h.datastore.user_count(), 1);
}

#[tokio::test]
async fn test_provider_conflict_creates_no_local_row() {
    let h = TestHarness::new();
    h.provider
        .create(&ProfileInput::new("a@x.com"))
        .await
        .unwrap();

    let err = h.identity.create_end_user(end_user("a@x.com")).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    assert_eq!(h.datastore.live_users_with_email("a@x.com"), 0);
    assert_eq!(h.provider.calls(IdentityOp::Delete), 0);
}

#[tokio::test]
async fn test_transient_provider_failures_are_retried() {
    let h = TestHarness::with_config(SagaConfig::default().with_max_attempts(3));
    h.provider.set_transient_failure(
        IdentityOp::Create,
        ActivityFailure::provider(503, "service unavailable"),
        2,
    );

    let identity = h.identity.create_end_user(end_user("a@x.com")).await.unwrap();

    assert_eq!(h.provider.calls(IdentityOp::Create), 3);
    assert!(h.provider.has_email(&identity.profile.email));
}

#[tokio::test]
async fn test_not_found_from_provider_is_not_retried() {
    let h = TestHarness::with_config(SagaConfig::default().with_max_attempts(3));
    h.provider
        .set_failure(IdentityOp::Create, ActivityFailure::provider(404, "tenant not found"));

    let err = h.identity.create_end_user(end_user("a@x.com")).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(h.provider.calls(IdentityOp::Create), 1);
}

#[tokio::test]
async fn test_update_restores_provider_when_local_update_fails() {
    let h = TestHarness::new();
    let identity = h.identity.create_end_user(end_user("a@x.com")).await.unwrap();
    h.datastore
        .set_failure(StoreOp::UpdateUser, ActivityFailure::Datastore("timeout".into()));

    let update = UpdateEndUser {
        profile: ProfilePatch {
            first_name: Some("Grace".into()),
            ..Default::default()
        },
        local: domain::LocalUserPatch {
            settings: Some(PlatformSettings {
                locale: Some("fr-FR".into()),
                ..Default::default()
            }),
        },
    };
    let err = h
        .identity
        .update_end_user(identity.user.id, update)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::DatabaseError);
    let profile = h.provider.get(&identity.profile.id).await.unwrap();
    assert_eq!(profile.first_name.as_deref(), Some("Ada"));
    assert_eq!(h.datastore.user(identity.user.id).unwrap().settings.locale, None);
}

#[tokio::test]
async fn test_update_returns_fresh_state() {
    let h = TestHarness::new();
    let identity = h.identity.create_end_user(end_user("a@x.com")).await.unwrap();

    let update = UpdateEndUser {
        profile: ProfilePatch {
            phone: Some("+33 1 23 45 67 89".into()),
            ..Default::default()
        },
        local: domain::LocalUserPatch {
            settings: Some(PlatformSettings {
                marketing_opt_in: true,
                ..Default::default()
            }),
        },
    };
    let updated = h
        .identity
        .update_end_user(identity.user.id, update)
        .await
        .unwrap();

    assert_eq!(updated.profile.phone.as_deref(), Some("+33 1 23 45 67 89"));
    assert!(updated.user.settings.marketing_opt_in);
    assert!(updated.user.last_synced_at >= identity.user.last_synced_at);
}

#[tokio::test]
async fn test_delete_with_failing_local_step_needs_reconciliation() {
    let h = TestHarness::new();
    let identity = h.identity.create_end_user(end_user("a@x.com")).await.unwrap();
    h.datastore.set_failure(
        StoreOp::MarkUserDeleted,
        ActivityFailure::Datastore("read-only replica".into()),
    );

    let err = h.identity.delete_end_user(identity.user.id).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::WorkflowError);
    assert!(err.requires_reconciliation());
    assert_eq!(err.detail_str("provider_id"), Some(identity.profile.id.as_str()));
    let local_id = identity.user.id.to_string();
    assert_eq!(err.detail_str("local_id"), Some(local_id.as_str()));
    assert!(!h.provider.has_email("a@x.com"));
    assert_eq!(h.datastore.live_users_with_email("a@x.com"), 1);
}

#[tokio::test]
async fn test_delete_marks_local_record() {
    let h = TestHarness::new();
    let identity = h.identity.create_end_user(end_user("a@x.com")).await.unwrap();

    let deleted = h.identity.delete_end_user(identity.user.id).await.unwrap();

    assert!(deleted.is_deleted());
    assert_eq!(h.datastore.user_count(), 1);
    assert_eq!(h.provider.identity_count(), 0);

    let again = h.identity.delete_end_user(identity.user.id).await.unwrap_err();
    assert_eq!(again.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_rejoined_execution_replays_recorded_steps() {
    let h = TestHarness::new();
    let profile = h
        .provider
        .create(&ProfileInput::new("replay@x.com"))
        .await
        .unwrap();

    let key = correlation::user_create_key("replay@x.com");
    let execution_id = ExecutionId::new();
    h.executions
        .create_execution(
            ExecutionRecord::start(execution_id, key.clone(), "user.create")
                .with_input(serde_json::to_value(end_user("replay@x.com")).unwrap()),
        )
        .await
        .unwrap();
    h.executions
        .append_step(StepRecord::new(execution_id, key.clone(), 0, "find_local_user", json!(null)))
        .await
        .unwrap();
    h.executions
        .append_step(StepRecord::new(
            execution_id,
            key.clone(),
            1,
            "create_provider_identity",
            serde_json::to_value(&profile).unwrap(),
        ))
        .await
        .unwrap();

    let identity = h.identity.create_end_user(end_user("replay@x.com")).await.unwrap();

    assert_eq!(identity.profile.id, profile.id);
    assert_eq!(h.provider.calls(IdentityOp::Create), 1);
    assert_eq!(h.datastore.calls(StoreOp::FindUserByEmail), 0);
    assert_eq!(h.datastore.calls(StoreOp::InsertUser), 1);

    let record = h.executor.get_execution(execution_id).await.unwrap().unwrap();
    assert_eq!(record.status, ExecutionStatus::Completed);
    assert_eq!(h.executions.load_steps(execution_id).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_lost_create_response_adopts_provider_identity() {
    let h = TestHarness::with_config(SagaConfig::default().with_max_attempts(3));
    h.provider.lose_create_responses(1);

    let identity = h.identity.create_end_user(end_user("lost@x.com")).await.unwrap();

    assert_eq!(h.provider.identity_count(), 1);
    assert_eq!(h.provider.calls(IdentityOp::Create), 1);
    assert_eq!(h.provider.calls(IdentityOp::FindByEmail), 1);
    assert_eq!(identity.user.provider_id, identity.profile.id);
    assert_eq!(h.datastore.live_users_with_email("lost@x.com"), 1);
}

#[tokio::test]
async fn test_adopted_provider_identity_is_compensated() {
    let h = TestHarness::with_config(SagaConfig::default().with_max_attempts(3));
    h.provider.lose_create_responses(1);
    h.datastore
        .set_failure(StoreOp::InsertUser, ActivityFailure::Datastore("connection reset".into()));

    let err = h.identity.create_end_user(end_user("lost@x.com")).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::DatabaseError);
    assert_eq!(h.provider.identity_count(), 0);
    assert_eq!(h.provider.calls(IdentityOp::Delete), 1);
    assert_eq!(h.datastore.live_users_with_email("lost@x.com"), 0);
}

#[tokio::test]
async fn test_stale_execution_with_other_input_is_not_rejoined() {
    let h = TestHarness::new();
    let identity = h.identity.create_end_user(end_user("stale@x.com")).await.unwrap();
    let user_id = identity.user.id;

    // An interrupted update that already loaded its snapshots
    let stale = UpdateEndUser {
        profile: ProfilePatch {
            first_name: Some("Grace".into()),
            ..ProfilePatch::default()
        },
        ..UpdateEndUser::default()
    };
    let key = correlation::user_update_key(user_id);
    let execution_id = ExecutionId::new();
    h.executions
        .create_execution(
            ExecutionRecord::start(execution_id, key.clone(), "user.update")
                .with_input(serde_json::to_value(&stale).unwrap()),
        )
        .await
        .unwrap();
    h.executions
        .append_step(StepRecord::new(
            execution_id,
            key.clone(),
            0,
            "load_local_user",
            serde_json::to_value(&identity.user).unwrap(),
        ))
        .await
        .unwrap();

    let fresh = UpdateEndUser {
        profile: ProfilePatch {
            first_name: Some("Ada".into()),
            last_name: Some("Byron".into()),
            ..ProfilePatch::default()
        },
        ..UpdateEndUser::default()
    };
    let err = h.identity.update_end_user(user_id, fresh).await.unwrap_err();

    assert_eq!(err.detail_str("reason"), Some(correlation::DUPLICATE_IN_FLIGHT));
    assert!(err.is_retryable());
    assert_eq!(h.provider.calls(IdentityOp::Update), 0);
    let profile = h.provider.get(&identity.profile.id).await.unwrap();
    assert_eq!(profile.last_name.as_deref(), Some("Lovelace"));
    let record = h.executor.get_execution(execution_id).await.unwrap().unwrap();
    assert_eq!(record.status, ExecutionStatus::Running);
    assert_eq!(h.executions.load_steps(execution_id).await.unwrap().len(), 1);
}

// ---------------------------------------------------------------------------
// Bookings
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_create_booking_from_storefront_input() {
    let h = TestHarness::new();

    let confirmation = h.bookings.create_booking(booking_request()).await.unwrap();

    let booking = confirmation.booking;
    assert_eq!(booking.status, BookingStatus::Confirmed);
    assert_eq!(booking.number_of_participants.get(), 2);
    assert!(!booking.qr_code.as_str().is_empty());
    assert!(confirmation.payment.is_none());
}

#[tokio::test]
async fn test_qr_codes_are_unique_across_bookings() {
    let h = TestHarness::new();
    let mut codes = HashSet::new();
    for _ in 0..25 {
        let confirmation = h.bookings.create_booking(booking_request()).await.unwrap();
        codes.insert(confirmation.booking.qr_code);
    }
    assert_eq!(codes.len(), 25);
    assert_eq!(h.datastore.booking_count(), 25);
}

#[tokio::test]
async fn test_unknown_qr_code() {
    let h = TestHarness::new();
    let err = h.bookings.check_in_with_qr_code("BAD_CODE").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidQrCode);
    assert_eq!(err.detail_str("qr_code"), Some("BAD_CODE"));
}

#[tokio::test]
async fn test_cancel_after_attendance_is_rejected() {
    let h = TestHarness::new();
    let booking_id = h.confirmed_booking().await;
    let qr = h.datastore.booking(booking_id).unwrap().qr_code;
    h.bookings.check_in_with_qr_code(qr.as_str()).await.unwrap();

    let err = h.bookings.cancel_booking(booking_id, None).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::AlreadyAttended);
    assert_eq!(
        h.datastore.booking(booking_id).unwrap().status,
        BookingStatus::Attended
    );
}

#[tokio::test]
async fn test_invalid_transitions_leave_status_unchanged() {
    let h = TestHarness::new();

    let cases = [
        (BookingStatus::Attended, "check_in", ErrorKind::AlreadyAttended),
        (BookingStatus::Attended, "cancel", ErrorKind::AlreadyAttended),
        (BookingStatus::Cancelled, "check_in", ErrorKind::BookingCancelled),
        (BookingStatus::Cancelled, "cancel", ErrorKind::BookingCancelled),
        (BookingStatus::NoShow, "check_in", ErrorKind::ValidationError),
        (BookingStatus::NoShow, "cancel", ErrorKind::ValidationError),
    ];

    for (status, event, kind) in cases {
        let booking_id = h.confirmed_booking().await;
        let mut booking = h.datastore.booking(booking_id).unwrap();
        booking.status = status;
        h.datastore
            .update_booking(booking.clone(), BookingStatus::Confirmed)
            .await
            .unwrap();

        let err = match event {
            "check_in" => h
                .bookings
                .check_in_with_qr_code(booking.qr_code.as_str())
                .await
                .unwrap_err(),
            _ => h.bookings.cancel_booking(booking_id, None).await.unwrap_err(),
        };

        assert_eq!(err.kind(), kind, "{status} + {event}");
        assert_eq!(err.detail_str("status"), Some(status.as_str()));
        assert_eq!(h.datastore.booking(booking_id).unwrap().status, status);
    }
}

#[tokio::test]
async fn test_check_in_survives_payment_failure() {
    let h = TestHarness::new();
    let mut request = booking_request();
    request.payment = Some(PaymentRequest {
        method: PaymentMethod::Onsite,
        amount_cents: 3000,
        currency: None,
    });
    let confirmation = h.bookings.create_booking(request).await.unwrap();
    h.datastore
        .set_failure(StoreOp::UpdatePayment, ActivityFailure::Datastore("deadlock".into()));

    let result = h
        .bookings
        .check_in_with_qr_code(confirmation.booking.qr_code.as_str())
        .await
        .unwrap();

    assert_eq!(result.booking.status, BookingStatus::Attended);
    assert!(result.settled_payment.is_none());
    let payment = h
        .datastore
        .find_payment_for_booking(confirmation.booking.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payment.status, domain::PaymentStatus::Pending);
}

/// Datastore whose first two booking reads wait for each other, so two
/// sagas both see the row before either writes it.
#[derive(Clone)]
struct LockstepReads {
    inner: InMemoryDatastore,
    barrier: Arc<Barrier>,
    reads: Arc<AtomicUsize>,
}

impl LockstepReads {
    fn new(inner: InMemoryDatastore) -> Self {
        Self {
            inner,
            barrier: Arc::new(Barrier::new(2)),
            reads: Arc::new(AtomicUsize::new(0)),
        }
    }

    async fn meet(&self) {
        if self.reads.fetch_add(1, Ordering::SeqCst) < 2 {
            self.barrier.wait().await;
        }
    }
}

#[async_trait]
impl BookingStore for LockstepReads {
    async fn insert_booking(&self, booking: Booking) -> Result<Booking, ActivityFailure> {
        self.inner.insert_booking(booking).await
    }

    async fn find_booking(&self, id: RecordId) -> Result<Option<Booking>, ActivityFailure> {
        self.meet().await;
        self.inner.find_booking(id).await
    }

    async fn find_booking_by_qr(&self, qr_code: &str) -> Result<Option<Booking>, ActivityFailure> {
        self.meet().await;
        self.inner.find_booking_by_qr(qr_code).await
    }

    async fn list_bookings_for_user(&self, user_id: &str) -> Result<Vec<Booking>, ActivityFailure> {
        self.inner.list_bookings_for_user(user_id).await
    }

    async fn update_booking(
        &self,
        booking: Booking,
        expected: BookingStatus,
    ) -> Result<Option<Booking>, ActivityFailure> {
        self.inner.update_booking(booking, expected).await
    }

    async fn delete_booking(&self, id: RecordId) -> Result<bool, ActivityFailure> {
        self.inner.delete_booking(id).await
    }
}

#[async_trait]
impl PaymentStore for LockstepReads {
    async fn insert_payment(&self, payment: Payment) -> Result<Payment, ActivityFailure> {
        self.inner.insert_payment(payment).await
    }

    async fn find_payment_for_booking(
        &self,
        booking_id: RecordId,
    ) -> Result<Option<Payment>, ActivityFailure> {
        self.inner.find_payment_for_booking(booking_id).await
    }

    async fn update_payment(&self, payment: Payment) -> Result<Payment, ActivityFailure> {
        self.inner.update_payment(payment).await
    }

    async fn delete_payment(&self, id: RecordId) -> Result<bool, ActivityFailure> {
        self.inner.delete_payment(id).await
    }
}

#[tokio::test]
async fn test_concurrent_check_in_and_cancel_have_one_winner() {
    let h = TestHarness::new();
    let booking_id = h.confirmed_booking().await;
    let qr = h.datastore.booking(booking_id).unwrap().qr_code;

    let racing = BookingSaga::new(
        h.executor.clone(),
        LockstepReads::new(h.datastore.clone()),
        InMemoryRefundHook::new(),
    );
    let (checked_in, cancelled) = tokio::join!(
        racing.check_in_with_qr_code(qr.as_str()),
        racing.cancel_booking(booking_id, Some("changed plans".into())),
    );

    let stored = h.datastore.booking(booking_id).unwrap().status;
    match (checked_in, cancelled) {
        (Ok(result), Err(err)) => {
            assert_eq!(result.booking.status, BookingStatus::Attended);
            assert_eq!(err.kind(), ErrorKind::AlreadyAttended);
            assert_eq!(stored, BookingStatus::Attended);
        }
        (Err(err), Ok(result)) => {
            assert_eq!(result.booking.status, BookingStatus::Cancelled);
            assert_eq!(err.kind(), ErrorKind::BookingCancelled);
            assert_eq!(stored, BookingStatus::Cancelled);
        }
        (checked_in, cancelled) => {
            panic!("expected exactly one winner, got {checked_in:?} and {cancelled:?}")
        }
    }
}

#[tokio::test]
async fn test_concurrent_bookings_for_same_key_are_allowed() {
    let h = TestHarness::new();
    let (a, b) = tokio::join!(
        h.bookings.create_booking(booking_request()),
        h.bookings.create_booking(booking_request()),
    );
    assert_ne!(a.unwrap().booking.id, b.unwrap().booking.id);
}

// ---------------------------------------------------------------------------
// Brands
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_brand_limit_on_standard_plan() {
    let h = TestHarness::new();
    let request = NewBrand {
        organization_id: "org-1".into(),
        name: "Acme".into(),
        plan_type: PlanType::Standard,
        requested_by: None,
    };
    h.brands.create_brand(request.clone()).await.unwrap();

    let err = h
        .brands
        .create_brand(NewBrand {
            name: "Acme Outlet".into(),
            ..request
        })
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::LimitReached);
    assert_eq!(h.datastore.brand_count("org-1"), 1);
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

const PARKED: Operation = Operation::new("test.parked", "test-parked", DuplicatePolicy::RejectDuplicate);

/// Starts a saga that completes one step, registers its undo, then waits
/// for `release` before attempting a second step.
fn park(
    h: &TestHarness,
    release: Arc<Notify>,
) -> (
    tokio::task::JoinHandle<Result<u32, domain::DomainError>>,
    oneshot::Receiver<ExecutionId>,
    InMemoryDatastore,
) {
    let (started_tx, started_rx) = oneshot::channel();
    let executor = h.executor.clone();
    let undo_log = InMemoryDatastore::new();
    let undo_store = undo_log.clone();

    let handle = tokio::spawn(async move {
        executor
            .execute(PARKED, PARKED.key("one"), move |ctx| async move {
                let booking = ctx
                    .activity("first", &ctx.policies().datastore, || async {
                        Ok(RecordId::new())
                    })
                    .await?;
                ctx.compensate("undo first", move || {
                    let store = undo_store.clone();
                    async move { store.delete_booking(booking).await.map(|_| ()) }
                });
                let _ = started_tx.send(ctx.execution_id());
                release.notified().await;
                ctx.activity("second", &ctx.policies().datastore, || async { Ok(2u32) })
                    .await
            })
            .await
    });
    (handle, started_rx, undo_log)
}

#[tokio::test]
async fn test_cancellation_drains_compensations() {
    let h = TestHarness::new();
    let release = Arc::new(Notify::new());
    let (handle, started, undo_log) = park(&h, release.clone());

    let execution_id = started.await.unwrap();
    assert!(h.executor.cancel(execution_id));
    release.notify_one();

    let err = handle.await.unwrap().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::WorkflowError);
    assert_eq!(err.detail_str("reason"), Some("cancelled"));
    assert_eq!(undo_log.calls(StoreOp::DeleteBooking), 1);

    let record = h.executor.get_execution(execution_id).await.unwrap().unwrap();
    assert_eq!(record.status, ExecutionStatus::Cancelled);
    assert_eq!(record.compensated, vec!["undo first".to_string()]);
    assert_eq!(h.executor.live_executions(), 0);
}

#[tokio::test]
async fn test_duplicate_in_flight_is_rejected() {
    let h = TestHarness::new();
    let release = Arc::new(Notify::new());
    let (handle, started, _) = park(&h, release.clone());
    let running = started.await.unwrap();

    let err = h
        .executor
        .execute(PARKED, PARKED.key("one"), |_ctx| async { Ok(0u32) })
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::WorkflowError);
    assert!(err.is_retryable());
    assert_eq!(err.detail_str("reason"), Some(correlation::DUPLICATE_IN_FLIGHT));
    let running = running.to_string();
    assert_eq!(err.detail_str("execution_id"), Some(running.as_str()));

    release.notify_one();
    assert_eq!(handle.await.unwrap().unwrap(), 2);
}
