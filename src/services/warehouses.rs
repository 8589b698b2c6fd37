use crate::{
    auth::AuthUser,
    db::with_transaction,
    entities::{inventory_item, order, stock_movement, warehouse},
    errors::ServiceError,
    services::{contains_ci, fetch_page, non_blank, Page, PageRequest},
};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, ModelTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListWarehousesQuery {
    /// Matches name or code
    pub search: Option<String>,
    pub active: Option<bool>,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateWarehouseRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    /// Short code, unique within the company
    #[validate(length(min = 1, max = 32))]
    pub code: String,
    #[validate(length(max = 1000))]
    pub address: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct UpdateWarehouseRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: Option<String>,
    #[validate(length(min = 1, max = 32))]
    pub code: Option<String>,
    #[validate(length(max = 1000))]
    pub address: Option<String>,
    pub active: Option<bool>,
}

#[derive(Clone)]
pub struct WarehouseService {
    db: Arc<DatabaseConnection>,
}

impl WarehouseService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn list_warehouses(
        &self,
        caller: &AuthUser,
        query: ListWarehousesQuery,
        page: PageRequest,
    ) -> Result<Page<warehouse::Model>, ServiceError> {
        let mut select = warehouse::Entity::find()
            .filter(warehouse::Column::CompanyId.eq(caller.company_id))
            .order_by_asc(warehouse::Column::Code);

        if let Some(active) = query.active {
            select = select.filter(warehouse::Column::Active.eq(active));
        }
        if let Some(term) = non_blank(query.search) {
            select = select.filter(
                Condition::any()
                    .add(contains_ci(warehouse::Column::Name, &term))
                    .add(contains_ci(warehouse::Column::Code, &term)),
            );
        }

        fetch_page(self.db.as_ref(), select, page).await
    }

    pub async fn get_warehouse(
        &self,
        caller: &AuthUser,
        id: Uuid,
    ) -> Result<warehouse::Model, ServiceError> {
        warehouse::Entity::find_by_id(id)
            .filter(warehouse::Column::CompanyId.eq(caller.company_id))
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| ServiceError::not_found("Warehouse", id))
    }

    async fn ensure_code_free(
        &self,
        company_id: Uuid,
        code: &str,
        except: Option<Uuid>,
    ) -> Result<(), ServiceError> {
        let mut select = warehouse::Entity::find()
            .filter(warehouse::Column::CompanyId.eq(company_id))
            .filter(warehouse::Column::Code.eq(code));
        if let Some(id) = except {
            select = select.filter(warehouse::Column::Id.ne(id));
        }
        if select.one(self.db.as_ref()).await?.is_some() {
            return Err(ServiceError::Conflict(format!(
                "warehouse with code {} already exists",
                code
            )));
        }
        Ok(())
    }

    #[instrument(skip(self, input), fields(company_id = %caller.company_id))]
    pub async fn create_warehouse(
        &self,
        caller: &AuthUser,
        input: CreateWarehouseRequest,
    ) -> Result<warehouse::Model, ServiceError> {
        let code = normalize_code(&input.code)?;
        self.ensure_code_free(caller.company_id, &code, None).await?;

        let created = warehouse::ActiveModel {
            id: Set(Uuid::new_v4()),
            company_id: Set(caller.company_id),
            name: Set(input.name.trim().to_string()),
            code: Set(code),
            address: Set(non_blank(input.address)),
            active: Set(true),
            ..Default::default()
        }
        .insert(self.db.as_ref())
        .await?;

        info!(warehouse_id = %created.id, code = %created.code, "Warehouse created");
        Ok(created)
    }

    #[instrument(skip(self, input), fields(company_id = %caller.company_id))]
    pub async fn update_warehouse(
        &self,
        caller: &AuthUser,
        id: Uuid,
        input: UpdateWarehouseRequest,
    ) -> Result<warehouse::Model, ServiceError> {
        let mut active: warehouse::ActiveModel = self.get_warehouse(caller, id).await?.into();

        if let Some(name) = input.name {
            active.name = Set(name.trim().to_string());
        }
        if let Some(code) = input.code {
            let code = normalize_code(&code)?;
            self.ensure_code_free(caller.company_id, &code, Some(id))
                .await?;
            active.code = Set(code);
        }
        if input.address.is_some() {
            active.address = Set(non_blank(input.address));
        }
        if let Some(flag) = input.active {
            active.active = Set(flag);
        }

        let updated = active.update(self.db.as_ref()).await?;
        info!(warehouse_id = %id, "Warehouse updated");
        Ok(updated)
    }

    /// Deletes an unused warehouse. Warehouses holding stock or referenced by
    /// orders or movement history are kept and should be deactivated.
    #[instrument(skip(self), fields(company_id = %caller.company_id))]
    pub async fn delete_warehouse(&self, caller: &AuthUser, id: Uuid) -> Result<(), ServiceError> {
        let existing = self.get_warehouse(caller, id).await?;
        let db = self.db.as_ref();

        let stocked = inventory_item::Entity::find()
            .filter(inventory_item::Column::WarehouseId.eq(id))
            .filter(
                Condition::any()
                    .add(inventory_item::Column::Quantity.gt(0))
                    .add(inventory_item::Column::ReservedQuantity.gt(0)),
            )
            .count(db)
            .await?;
        if stocked > 0 {
            return Err(ServiceError::Conflict(
                "warehouse still holds stock".to_string(),
            ));
        }

        let orders = order::Entity::find()
            .filter(order::Column::WarehouseId.eq(id))
            .count(db)
            .await?;
        let movements = stock_movement::Entity::find()
            .filter(
                Condition::any()
                    .add(stock_movement::Column::FromWarehouseId.eq(id))
                    .add(stock_movement::Column::ToWarehouseId.eq(id)),
            )
            .count(db)
            .await?;
        if orders > 0 || movements > 0 {
            return Err(ServiceError::Conflict(
                "warehouse has order or movement history; deactivate it instead".to_string(),
            ));
        }

        with_transaction(&self.db, move |txn| {
            Box::pin(async move {
                inventory_item::Entity::delete_many()
                    .filter(inventory_item::Column::WarehouseId.eq(existing.id))
                    .exec(txn)
                    .await?;
                existing.delete(txn).await?;
                Ok(())
            })
        })
        .await?;

        info!(warehouse_id = %id, "Warehouse deleted");
        Ok(())
    }
}

fn normalize_code(code: &str) -> Result<String, ServiceError> {
    let code = code.trim().to_uppercase();
    if code.is_empty() || code.chars().any(char::is_whitespace) {
        return Err(ServiceError::ValidationError(
            "warehouse code must be non-empty and contain no spaces".to_string(),
        ));
    }
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_uppercased_and_checked() {
        assert_eq!(normalize_code(" wh-1 ").unwrap(), "WH-1");
        assert!(normalize_code("   ").is_err());
        assert!(normalize_code("main hall").is_err());
    }
}
