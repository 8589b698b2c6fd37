use crate::{
    auth::AuthUser,
    db::with_transaction,
    entities::{product_supplier, supplier},
    errors::ServiceError,
    services::{contains_ci, fetch_page, non_blank, Page, PageRequest},
};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, ModelTrait,
    QueryFilter, QueryOrder, Set,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListSuppliersQuery {
    /// Matches name, contact or email
    pub search: Option<String>,
    pub active: Option<bool>,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateSupplierRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(length(max = 200))]
    pub contact_name: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
    #[validate(length(max = 50))]
    pub phone: Option<String>,
    #[validate(length(max = 1000))]
    pub address: Option<String>,
    #[validate(length(max = 4000))]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct UpdateSupplierRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: Option<String>,
    #[validate(length(max = 200))]
    pub contact_name: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
    #[validate(length(max = 50))]
    pub phone: Option<String>,
    #[validate(length(max = 1000))]
    pub address: Option<String>,
    #[validate(length(max = 4000))]
    pub notes: Option<String>,
    pub active: Option<bool>,
}

#[derive(Clone)]
pub struct SupplierService {
    db: Arc<DatabaseConnection>,
}

impl SupplierService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn list_suppliers(
        &self,
        caller: &AuthUser,
        query: ListSuppliersQuery,
        page: PageRequest,
    ) -> Result<Page<supplier::Model>, ServiceError> {
        let mut select = supplier::Entity::find()
            .filter(supplier::Column::CompanyId.eq(caller.company_id))
            .order_by_asc(supplier::Column::Name);

        if let Some(active) = query.active {
            select = select.filter(supplier::Column::Active.eq(active));
        }
        if let Some(term) = non_blank(query.search) {
            select = select.filter(
                Condition::any()
                    .add(contains_ci(supplier::Column::Name, &term))
                    .add(contains_ci(supplier::Column::ContactName, &term))
                    .add(contains_ci(supplier::Column::Email, &term)),
            );
        }

        fetch_page(self.db.as_ref(), select, page).await
    }

    pub async fn get_supplier(
        &self,
        caller: &AuthUser,
        id: Uuid,
    ) -> Result<supplier::Model, ServiceError> {
        supplier::Entity::find_by_id(id)
            .filter(supplier::Column::CompanyId.eq(caller.company_id))
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| ServiceError::not_found("Supplier", id))
    }

    #[instrument(skip(self, input), fields(company_id = %caller.company_id))]
    pub async fn create_supplier(
        &self,
        caller: &AuthUser,
        input: CreateSupplierRequest,
    ) -> Result<supplier::Model, ServiceError> {
        let created = supplier::ActiveModel {
            id: Set(Uuid::new_v4()),
            company_id: Set(caller.company_id),
            name: Set(input.name.trim().to_string()),
            contact_name: Set(non_blank(input.contact_name)),
            email: Set(non_blank(input.email)),
            phone: Set(non_blank(input.phone)),
            address: Set(non_blank(input.address)),
            notes: Set(non_blank(input.notes)),
            active: Set(true),
            ..Default::default()
        }
        .insert(self.db.as_ref())
        .await?;

        info!(supplier_id = %created.id, "Supplier created");
        Ok(created)
    }

    #[instrument(skip(self, input), fields(company_id = %caller.company_id))]
    pub async fn update_supplier(
        &self,
        caller: &AuthUser,
        id: Uuid,
        input: UpdateSupplierRequest,
    ) -> Result<supplier::Model, ServiceError> {
        let mut active: supplier::ActiveModel = self.get_supplier(caller, id).await?.into();

        if let Some(name) = input.name {
            active.name = Set(name.trim().to_string());
        }
        if input.contact_name.is_some() {
            active.contact_name = Set(non_blank(input.contact_name));
        }
        if input.email.is_some() {
            active.email = Set(non_blank(input.email));
        }
        if input.phone.is_some() {
            active.phone = Set(non_blank(input.phone));
        }
        if input.address.is_some() {
            active.address = Set(non_blank(input.address));
        }
        if input.notes.is_some() {
            active.notes = Set(non_blank(input.notes));
        }
        if let Some(flag) = input.active {
            active.active = Set(flag);
        }

        let updated = active.update(self.db.as_ref()).await?;
        info!(supplier_id = %id, "Supplier updated");
        Ok(updated)
    }

    /// Deletes the supplier together with its product links.
    #[instrument(skip(self), fields(company_id = %caller.company_id))]
    pub async fn delete_supplier(&self, caller: &AuthUser, id: Uuid) -> Result<(), ServiceError> {
        let existing = self.get_supplier(caller, id).await?;

        let unlinked = with_transaction(&self.db, move |txn| {
            Box::pin(async move {
                let unlinked = product_supplier::Entity::delete_many()
                    .filter(product_supplier::Column::SupplierId.eq(existing.id))
                    .exec(txn)
                    .await?
                    .rows_affected;
                existing.delete(txn).await?;
                Ok(unlinked)
            })
        })
        .await?;

        info!(supplier_id = %id, unlinked, "Supplier deleted");
        Ok(())
    }
}
