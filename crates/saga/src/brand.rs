//! Brand provisioning under the organization's plan limit.

use chrono::Utc;
use domain::{Brand, DomainError, NewBrand};
use serde_json::json;

use crate::correlation::{self, BRAND_CREATE};
use crate::executor::WorkflowExecutor;
use crate::services::{BrandStore, OrganizationDirectory};

fn limit_reached(brand: &NewBrand, limit: u32, active: u32) -> DomainError {
    DomainError::limit_reached(format!(
        "organization {} already has {active} active brand(s); the {} plan allows {limit}",
        brand.organization_id, brand.plan_type
    ))
    .with_detail(json!({
        "organization_id": brand.organization_id,
        "plan_type": brand.plan_type.as_str(),
        "limit": limit,
        "active": active,
    }))
}

#[derive(Debug, Clone)]
pub struct BrandSaga<D, O> {
    executor: WorkflowExecutor,
    store: D,
    directory: O,
}

impl<D, O> BrandSaga<D, O>
where
    D: BrandStore + Clone + 'static,
    O: OrganizationDirectory + Clone + 'static,
{
    pub fn new(executor: WorkflowExecutor, store: D, directory: O) -> Self {
        Self {
            executor,
            store,
            directory,
        }
    }

    pub fn executor(&self) -> &WorkflowExecutor {
        &self.executor
    }

    /// Creates a brand unless the organization is at its plan limit.
    ///
    /// When `requested_by` is set, that user must be a member of the
    /// organization. The first brand of an organization becomes its default.
    #[tracing::instrument(
        skip(self, request),
        fields(organization_id = %request.organization_id, plan_type = %request.plan_type)
    )]
    pub async fn create_brand(&self, request: NewBrand) -> Result<Brand, DomainError> {
        request.validate()?;
        let key = correlation::brand_create_key(&request.organization_id);
        let input = request.clone();
        let store = self.store.clone();
        let directory = self.directory.clone();

        self.executor
            .execute_with_input(BRAND_CREATE, key, &input, move |ctx| async move {
                let policies = ctx.policies().clone();
                let organization_id = request.organization_id.as_str();

                if let Some(user_id) = request.requested_by.as_deref() {
                    let member: bool = ctx
                        .activity("check_membership", &policies.provider, || {
                            directory.check_membership(user_id, organization_id)
                        })
                        .await?;
                    if !member {
                        return Err(DomainError::insufficient_permissions(format!(
                            "user {user_id} is not a member of organization {organization_id}"
                        ))
                        .with_detail(json!({
                            "user_id": user_id,
                            "organization_id": organization_id,
                        })));
                    }
                }

                let limit = request.plan_type.brand_limit();
                let active: u32 = ctx
                    .activity("count_active_brands", &policies.datastore, || {
                        store.count_active_brands(organization_id)
                    })
                    .await?;
                if active >= limit {
                    return Err(limit_reached(&request, limit, active));
                }

                let inserted: Option<Brand> = ctx
                    .activity("insert_brand", &policies.datastore, || {
                        store.insert_brand_within_limit(
                            request.clone().into_brand(active, Utc::now()),
                            limit,
                        )
                    })
                    .await?;
                let brand = inserted.ok_or_else(|| limit_reached(&request, limit, limit))?;
                // Last step: this undo only drains if a later step is added
                // and fails.
                {
                    let store = store.clone();
                    let brand_id = brand.id;
                    ctx.compensate("delete brand", move || {
                        let store = store.clone();
                        async move { store.delete_brand(brand_id).await.map(|_| ()) }
                    });
                }

                tracing::info!(brand_id = %brand.id, is_default = brand.is_default, "brand created");
                Ok(brand)
            })
            .await
    }

    /// Brands of an organization, straight from the datastore.
    pub async fn brands_for_organization(
        &self,
        organization_id: &str,
    ) -> Result<Vec<Brand>, DomainError> {
        Ok(self.store.list_brands(organization_id).await?)
    }
}
