//! End-user identity lifecycle across the identity provider and the local
//! user table.
//!
//! ```text
//! none ──► provider-created ──► local-created ──► done
//!   ▲              │                  │
//!   └── delete ◄───┘   mark deleted ◄─┘   (compensations, newest first)
//! ```

use chrono::Utc;
use common::RecordId;
use domain::{
    DomainError, EndUserIdentity, LocalUser, LocalUserPatch, PlatformSettings, ProfileInput,
    ProfilePatch, ProviderProfile, normalize_email,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::correlation::{self, USER_CREATE, USER_DELETE, USER_UPDATE};
use crate::error::ActivityFailure;
use crate::executor::WorkflowExecutor;
use crate::services::{IdentityProvider, UserStore};

/// Input of [`IdentitySaga::create_end_user`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateEndUser {
    #[serde(flatten)]
    pub profile: ProfileInput,
    #[serde(default)]
    pub settings: PlatformSettings,
}

/// Input of [`IdentitySaga::update_end_user`]. At least one side must change.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateEndUser {
    #[serde(default)]
    pub profile: ProfilePatch,
    #[serde(default, flatten)]
    pub local: LocalUserPatch,
}

/// Provider deletes that find nothing count as done.
async fn delete_identity<P: IdentityProvider>(provider: &P, id: &str) -> Result<(), ActivityFailure> {
    match provider.delete(id).await {
        Err(ActivityFailure::Provider { status: 404, .. }) => Ok(()),
        other => other,
    }
}

/// Creates the provider identity. Retries look the email up first: an
/// earlier attempt may have created the identity before its response was
/// lost, and that identity is adopted instead of conflicting with it.
async fn create_or_adopt<P: IdentityProvider>(
    provider: &P,
    profile: &ProfileInput,
    retry: bool,
) -> Result<ProviderProfile, ActivityFailure> {
    if retry && let Some(existing) = provider.find_by_email(&profile.email).await? {
        tracing::warn!(
            provider_id = %existing.id,
            "adopting provider identity created by an earlier attempt"
        );
        return Ok(existing);
    }
    provider.create(profile).await
}

async fn load_live_user<S: UserStore>(store: &S, id: RecordId) -> Result<LocalUser, ActivityFailure> {
    store
        .find_user(id)
        .await?
        .filter(|user| !user.is_deleted())
        .ok_or_else(|| ActivityFailure::row_not_found("user", id))
}

/// Keeps the provider identity and the local user record consistent.
#[derive(Debug, Clone)]
pub struct IdentitySaga<P, S> {
    executor: WorkflowExecutor,
    provider: P,
    store: S,
}

impl<P, S> IdentitySaga<P, S>
where
    P: IdentityProvider + Clone + 'static,
    S: UserStore + Clone + 'static,
{
    pub fn new(executor: WorkflowExecutor, provider: P, store: S) -> Self {
        Self {
            executor,
            provider,
            store,
        }
    }

    pub fn executor(&self) -> &WorkflowExecutor {
        &self.executor
    }

    /// Creates the provider identity and the local record linked to it.
    ///
    /// Returns the existing pair unchanged when a live local record already
    /// has this email. If the local insert fails, the provider identity is
    /// deleted again before the error is returned.
    #[tracing::instrument(skip(self, request), fields(email = %normalize_email(&request.profile.email)))]
    pub async fn create_end_user(
        &self,
        request: CreateEndUser,
    ) -> Result<EndUserIdentity, DomainError> {
        request.profile.validate()?;
        let key = correlation::user_create_key(&request.profile.email);
        let input = request.clone();
        let provider = self.provider.clone();
        let store = self.store.clone();

        self.executor
            .execute_with_input(USER_CREATE, key, &input, move |ctx| async move {
                let email = normalize_email(&request.profile.email);
                let policies = ctx.policies().clone();

                let existing: Option<LocalUser> = ctx
                    .activity("find_local_user", &policies.datastore, || {
                        store.find_live_user_by_email(&email)
                    })
                    .await?;
                if let Some(user) = existing {
                    let profile: ProviderProfile = ctx
                        .activity("load_provider_profile", &policies.provider, || {
                            provider.get(&user.provider_id)
                        })
                        .await?;
                    tracing::info!(user_id = %user.id, "end user already exists");
                    return Ok(EndUserIdentity { user, profile });
                }

                let mut retry = false;
                let profile: ProviderProfile = ctx
                    .activity("create_provider_identity", &policies.provider, || {
                        let attempt = create_or_adopt(&provider, &request.profile, retry);
                        retry = true;
                        attempt
                    })
                    .await?;
                {
                    let provider = provider.clone();
                    let provider_id = profile.id.clone();
                    ctx.compensate("delete provider identity", move || {
                        let provider = provider.clone();
                        let provider_id = provider_id.clone();
                        async move { delete_identity(&provider, &provider_id).await }
                    });
                }

                let user: LocalUser = ctx
                    .activity("create_local_user", &policies.datastore, || {
                        store.insert_user(LocalUser::link(
                            &profile,
                            request.settings.clone(),
                            Utc::now(),
                        ))
                    })
                    .await?;
                {
                    let store = store.clone();
                    let user_id = user.id;
                    ctx.compensate("mark local record deleted", move || {
                        let store = store.clone();
                        async move {
                            store.mark_user_deleted(user_id, Utc::now()).await.map(|_| ())
                        }
                    });
                }

                tracing::info!(user_id = %user.id, provider_id = %profile.id, "end user created");
                Ok(EndUserIdentity { user, profile })
            })
            .await
    }

    /// Applies a profile patch at the provider and/or a settings change
    /// locally, restoring both snapshots if either side fails.
    #[tracing::instrument(skip(self, request), fields(user_id = %user_id))]
    pub async fn update_end_user(
        &self,
        user_id: RecordId,
        request: UpdateEndUser,
    ) -> Result<EndUserIdentity, DomainError> {
        if request.profile.is_empty() && request.local.is_empty() {
            return Err(DomainError::validation("update changes nothing"));
        }
        let key = correlation::user_update_key(user_id);
        let input = request.clone();
        let provider = self.provider.clone();
        let store = self.store.clone();

        self.executor
            .execute_with_input(USER_UPDATE, key, &input, move |ctx| async move {
                let policies = ctx.policies().clone();

                let user_snapshot: LocalUser = ctx
                    .activity("load_local_user", &policies.datastore, || {
                        load_live_user(&store, user_id)
                    })
                    .await?;
                let provider_id = user_snapshot.provider_id.clone();
                let profile_snapshot: ProviderProfile = ctx
                    .activity("load_provider_profile", &policies.provider, || {
                        provider.get(&provider_id)
                    })
                    .await?;

                if !request.profile.is_empty() {
                    let _: ProviderProfile = ctx
                        .activity("update_provider_profile", &policies.provider, || {
                            provider.update(&provider_id, &request.profile)
                        })
                        .await?;
                    let provider = provider.clone();
                    let provider_id = provider_id.clone();
                    let restore = ProfilePatch::restoring(&profile_snapshot);
                    ctx.compensate("restore provider profile to snapshot", move || {
                        let provider = provider.clone();
                        let provider_id = provider_id.clone();
                        let restore = restore.clone();
                        async move { provider.update(&provider_id, &restore).await.map(|_| ()) }
                    });
                }

                if let Some(settings) = &request.local.settings {
                    let _: LocalUser = ctx
                        .activity("update_local_user", &policies.datastore, || {
                            store.update_user(LocalUser {
                                settings: settings.clone(),
                                last_synced_at: Utc::now(),
                                ..user_snapshot.clone()
                            })
                        })
                        .await?;
                    let store = store.clone();
                    let snapshot = user_snapshot.clone();
                    ctx.compensate("restore local record to snapshot", move || {
                        let store = store.clone();
                        let snapshot = snapshot.clone();
                        async move { store.update_user(snapshot).await.map(|_| ()) }
                    });
                }

                let user: LocalUser = ctx
                    .activity("reload_local_user", &policies.datastore, || {
                        load_live_user(&store, user_id)
                    })
                    .await?;
                let profile: ProviderProfile = ctx
                    .activity("reload_provider_profile", &policies.provider, || {
                        provider.get(&provider_id)
                    })
                    .await?;

                tracing::info!("end user updated");
                Ok(EndUserIdentity { user, profile })
            })
            .await
    }

    /// Deletes the provider identity, then marks the local record deleted.
    ///
    /// A provider identity cannot be recreated, so nothing is compensated.
    /// If the local step fails after the provider delete succeeded, the
    /// error is tagged for manual reconciliation.
    #[tracing::instrument(skip(self), fields(user_id = %user_id))]
    pub async fn delete_end_user(&self, user_id: RecordId) -> Result<LocalUser, DomainError> {
        let key = correlation::user_delete_key(user_id);
        let provider = self.provider.clone();
        let store = self.store.clone();

        self.executor
            .execute(USER_DELETE, key, move |ctx| async move {
                let policies = ctx.policies().clone();

                let user: LocalUser = ctx
                    .activity("load_local_user", &policies.datastore, || {
                        load_live_user(&store, user_id)
                    })
                    .await?;

                ctx.activity("delete_provider_identity", &policies.provider, || {
                    delete_identity(&provider, &user.provider_id)
                })
                .await?;

                let deleted = ctx
                    .activity("mark_local_user_deleted", &policies.datastore, || {
                        store.mark_user_deleted(user_id, Utc::now())
                    })
                    .await;

                match deleted {
                    Ok(deleted) => {
                        tracing::info!(provider_id = %user.provider_id, "end user deleted");
                        Ok(deleted)
                    }
                    Err(cause) => Err(DomainError::reconciliation_required(
                        format!(
                            "identity {} was deleted at the provider but local user {} was not: {}",
                            user.provider_id,
                            user.id,
                            cause.message()
                        ),
                        json!({
                            "provider_id": user.provider_id,
                            "local_id": user.id.to_string(),
                            "cause": cause.kind().as_str(),
                        }),
                    )),
                }
            })
            .await
    }
}
