use crate::{
    auth::AuthUser,
    db::with_transaction,
    entities::{inventory_item, order_item, product, product_supplier, stock_movement, supplier},
    errors::ServiceError,
    events::{Event, EventSender},
    services::{contains_ci, fetch_page, non_blank, Page, PageRequest},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, ModelTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::{Validate, ValidationError};

fn validate_non_negative(value: &Decimal) -> Result<(), ValidationError> {
    if *value >= Decimal::ZERO {
        Ok(())
    } else {
        let mut err = ValidationError::new("range");
        err.message = Some("Amount must not be negative".into());
        Err(err)
    }
}

fn validate_currency(currency: &str) -> Result<(), ValidationError> {
    if currency.len() == 3 && currency.chars().all(|c| c.is_ascii_alphabetic()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("currency");
        err.message = Some("Currency must be a 3-letter ISO code".into());
        Err(err)
    }
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListProductsQuery {
    /// Matches name or SKU
    pub search: Option<String>,
    pub category: Option<String>,
    pub active: Option<bool>,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateProductRequest {
    #[validate(length(min = 1, max = 64))]
    pub sku: String,
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(length(max = 4000))]
    pub description: Option<String>,
    #[validate(length(max = 100))]
    pub category: Option<String>,
    #[validate(custom = "validate_non_negative")]
    #[schema(value_type = String, example = "12.50")]
    pub price: Decimal,
    #[validate(custom = "validate_non_negative")]
    #[schema(value_type = Option<String>)]
    pub cost_price: Option<Decimal>,
    /// Defaults to the configured currency
    #[validate(custom = "validate_currency")]
    pub currency: Option<String>,
    #[validate(range(min = 0))]
    pub reorder_point: Option<i32>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct UpdateProductRequest {
    #[validate(length(min = 1, max = 64))]
    pub sku: Option<String>,
    #[validate(length(min = 1, max = 200))]
    pub name: Option<String>,
    #[validate(length(max = 4000))]
    pub description: Option<String>,
    #[validate(length(max = 100))]
    pub category: Option<String>,
    #[validate(custom = "validate_non_negative")]
    #[schema(value_type = Option<String>)]
    pub price: Option<Decimal>,
    #[validate(custom = "validate_non_negative")]
    #[schema(value_type = Option<String>)]
    pub cost_price: Option<Decimal>,
    #[validate(custom = "validate_currency")]
    pub currency: Option<String>,
    #[validate(range(min = 0))]
    pub reorder_point: Option<i32>,
    pub active: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct SupplierRefInput {
    pub supplier_id: Uuid,
    #[validate(length(min = 1, max = 64))]
    pub supplier_sku: Option<String>,
    #[validate(custom = "validate_non_negative")]
    #[schema(value_type = Option<String>)]
    pub unit_cost: Option<Decimal>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct ReplaceSuppliersRequest {
    #[validate]
    pub suppliers: Vec<SupplierRefInput>,
}

/// A supplier a product can be sourced from.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SupplierRef {
    pub supplier_id: Uuid,
    pub supplier_name: String,
    pub supplier_sku: Option<String>,
    #[schema(value_type = Option<String>)]
    pub unit_cost: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ProductDetail {
    #[serde(flatten)]
    pub product: product::Model,
    pub suppliers: Vec<SupplierRef>,
}

#[derive(Clone)]
pub struct ProductService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
    default_currency: String,
}

impl ProductService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: EventSender,
        default_currency: impl Into<String>,
    ) -> Self {
        Self {
            db,
            event_sender,
            default_currency: default_currency.into(),
        }
    }

    pub async fn list_products(
        &self,
        caller: &AuthUser,
        query: ListProductsQuery,
        page: PageRequest,
    ) -> Result<Page<product::Model>, ServiceError> {
        let mut select = product::Entity::find()
            .filter(product::Column::CompanyId.eq(caller.company_id))
            .order_by_asc(product::Column::Sku);

        if let Some(category) = non_blank(query.category) {
            select = select.filter(product::Column::Category.eq(category));
        }
        if let Some(active) = query.active {
            select = select.filter(product::Column::Active.eq(active));
        }
        if let Some(term) = non_blank(query.search) {
            select = select.filter(
                Condition::any()
                    .add(contains_ci(product::Column::Name, &term))
                    .add(contains_ci(product::Column::Sku, &term)),
            );
        }

        fetch_page(self.db.as_ref(), select, page).await
    }

    /// Loads a product of the caller's company.
    pub async fn find_product(
        &self,
        caller: &AuthUser,
        id: Uuid,
    ) -> Result<product::Model, ServiceError> {
        product::Entity::find_by_id(id)
            .filter(product::Column::CompanyId.eq(caller.company_id))
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| ServiceError::not_found("Product", id))
    }

    pub async fn get_product(
        &self,
        caller: &AuthUser,
        id: Uuid,
    ) -> Result<ProductDetail, ServiceError> {
        let product = self.find_product(caller, id).await?;
        let suppliers = self.supplier_refs(product.id).await?;
        Ok(ProductDetail { product, suppliers })
    }

    async fn supplier_refs(&self, product_id: Uuid) -> Result<Vec<SupplierRef>, ServiceError> {
        let rows = product_supplier::Entity::find()
            .filter(product_supplier::Column::ProductId.eq(product_id))
            .find_also_related(supplier::Entity)
            .all(self.db.as_ref())
            .await?;

        let mut refs: Vec<SupplierRef> = rows
            .into_iter()
            .filter_map(|(link, supplier)| {
                supplier.map(|supplier| SupplierRef {
                    supplier_id: link.supplier_id,
                    supplier_name: supplier.name,
                    supplier_sku: link.supplier_sku,
                    unit_cost: link.unit_cost,
                })
            })
            .collect();
        refs.sort_by(|a, b| a.supplier_name.cmp(&b.supplier_name));
        Ok(refs)
    }

    async fn ensure_sku_free(
        &self,
        company_id: Uuid,
        sku: &str,
        except: Option<Uuid>,
    ) -> Result<(), ServiceError> {
        let mut select = product::Entity::find()
            .filter(product::Column::CompanyId.eq(company_id))
            .filter(product::Column::Sku.eq(sku));
        if let Some(id) = except {
            select = select.filter(product::Column::Id.ne(id));
        }
        if select.one(self.db.as_ref()).await?.is_some() {
            return Err(ServiceError::Conflict(format!(
                "product with SKU {} already exists",
                sku
            )));
        }
        Ok(())
    }

    #[instrument(skip(self, input), fields(company_id = %caller.company_id, sku = %input.sku))]
    pub async fn create_product(
        &self,
        caller: &AuthUser,
        input: CreateProductRequest,
    ) -> Result<product::Model, ServiceError> {
        let sku = normalize_sku(&input.sku)?;
        self.ensure_sku_free(caller.company_id, &sku, None).await?;

        let currency = input
            .currency
            .map(|c| c.to_uppercase())
            .unwrap_or_else(|| self.default_currency.clone());

        let created = product::ActiveModel {
            id: Set(Uuid::new_v4()),
            company_id: Set(caller.company_id),
            sku: Set(sku),
            name: Set(input.name.trim().to_string()),
            description: Set(non_blank(input.description)),
            category: Set(non_blank(input.category)),
            price: Set(input.price),
            cost_price: Set(input.cost_price),
            currency: Set(currency),
            reorder_point: Set(input.reorder_point.unwrap_or(0)),
            active: Set(true),
            ..Default::default()
        }
        .insert(self.db.as_ref())
        .await?;

        info!(product_id = %created.id, "Product created");
        self.event_sender
            .send_or_log(Event::ProductCreated {
                company_id: caller.company_id,
                product_id: created.id,
            })
            .await;
        Ok(created)
    }

    #[instrument(skip(self, input), fields(company_id = %caller.company_id))]
    pub async fn update_product(
        &self,
        caller: &AuthUser,
        id: Uuid,
        input: UpdateProductRequest,
    ) -> Result<product::Model, ServiceError> {
        let existing = self.find_product(caller, id).await?;
        let mut active: product::ActiveModel = existing.clone().into();

        if let Some(sku) = input.sku {
            let sku = normalize_sku(&sku)?;
            if sku != existing.sku {
                self.ensure_sku_free(caller.company_id, &sku, Some(id)).await?;
                active.sku = Set(sku);
            }
        }
        if let Some(name) = input.name {
            active.name = Set(name.trim().to_string());
        }
        if input.description.is_some() {
            active.description = Set(non_blank(input.description));
        }
        if input.category.is_some() {
            active.category = Set(non_blank(input.category));
        }
        if let Some(price) = input.price {
            active.price = Set(price);
        }
        if input.cost_price.is_some() {
            active.cost_price = Set(input.cost_price);
        }
        if let Some(currency) = input.currency {
            active.currency = Set(currency.to_uppercase());
        }
        if let Some(reorder_point) = input.reorder_point {
            active.reorder_point = Set(reorder_point);
        }
        if let Some(flag) = input.active {
            active.active = Set(flag);
        }

        let updated = active.update(self.db.as_ref()).await?;
        info!(product_id = %id, "Product updated");
        self.event_sender
            .send_or_log(Event::ProductUpdated {
                company_id: caller.company_id,
                product_id: id,
            })
            .await;
        Ok(updated)
    }

    /// Deletes a product with no stock and no history. Empty inventory rows
    /// and supplier links go with it.
    #[instrument(skip(self), fields(company_id = %caller.company_id))]
    pub async fn delete_product(&self, caller: &AuthUser, id: Uuid) -> Result<(), ServiceError> {
        let existing = self.find_product(caller, id).await?;
        let db = self.db.as_ref();

        let on_hand = inventory_item::Entity::find()
            .filter(inventory_item::Column::ProductId.eq(id))
            .filter(
                Condition::any()
                    .add(inventory_item::Column::Quantity.gt(0))
                    .add(inventory_item::Column::ReservedQuantity.gt(0)),
            )
            .count(db)
            .await?;
        if on_hand > 0 {
            return Err(ServiceError::Conflict(
                "product still has inventory on hand".to_string(),
            ));
        }

        let movements = stock_movement::Entity::find()
            .filter(stock_movement::Column::ProductId.eq(id))
            .count(db)
            .await?;
        let order_lines = order_item::Entity::find()
            .filter(order_item::Column::ProductId.eq(id))
            .count(db)
            .await?;
        if movements > 0 || order_lines > 0 {
            return Err(ServiceError::Conflict(
                "product has movement or order history; deactivate it instead".to_string(),
            ));
        }

        with_transaction(&self.db, move |txn| {
            Box::pin(async move {
                inventory_item::Entity::delete_many()
                    .filter(inventory_item::Column::ProductId.eq(existing.id))
                    .exec(txn)
                    .await?;
                product_supplier::Entity::delete_many()
                    .filter(product_supplier::Column::ProductId.eq(existing.id))
                    .exec(txn)
                    .await?;
                existing.delete(txn).await?;
                Ok(())
            })
        })
        .await?;

        info!(product_id = %id, "Product deleted");
        self.event_sender
            .send_or_log(Event::ProductDeleted {
                company_id: caller.company_id,
                product_id: id,
            })
            .await;
        Ok(())
    }

    /// Replaces every supplier link of a product.
    #[instrument(skip(self, input), fields(company_id = %caller.company_id))]
    pub async fn replace_suppliers(
        &self,
        caller: &AuthUser,
        id: Uuid,
        input: ReplaceSuppliersRequest,
    ) -> Result<ProductDetail, ServiceError> {
        let product = self.find_product(caller, id).await?;

        let mut seen = HashSet::new();
        for entry in &input.suppliers {
            if !seen.insert(entry.supplier_id) {
                return Err(ServiceError::ValidationError(format!(
                    "supplier {} listed more than once",
                    entry.supplier_id
                )));
            }
        }

        let ids: Vec<Uuid> = seen.into_iter().collect();
        let owned: HashMap<Uuid, supplier::Model> = supplier::Entity::find()
            .filter(supplier::Column::CompanyId.eq(caller.company_id))
            .filter(supplier::Column::Id.is_in(ids.clone()))
            .all(self.db.as_ref())
            .await?
            .into_iter()
            .map(|s| (s.id, s))
            .collect();
        if let Some(missing) = ids.iter().find(|id| !owned.contains_key(id)) {
            return Err(ServiceError::not_found("Supplier", missing));
        }

        let product_id = product.id;
        let links = input.suppliers;
        let linked = with_transaction(&self.db, move |txn| {
            Box::pin(async move {
                product_supplier::Entity::delete_many()
                    .filter(product_supplier::Column::ProductId.eq(product_id))
                    .exec(txn)
                    .await?;
                let now = Utc::now();
                let count = links.len();
                for link in links {
                    product_supplier::ActiveModel {
                        product_id: Set(product_id),
                        supplier_id: Set(link.supplier_id),
                        supplier_sku: Set(non_blank(link.supplier_sku)),
                        unit_cost: Set(link.unit_cost),
                        created_at: Set(now),
                    }
                    .insert(txn)
                    .await?;
                }
                Ok(count)
            })
        })
        .await?;

        info!(product_id = %id, linked, "Product suppliers replaced");
        self.event_sender
            .send_or_log(Event::ProductUpdated {
                company_id: caller.company_id,
                product_id: id,
            })
            .await;

        let suppliers = self.supplier_refs(product.id).await?;
        Ok(ProductDetail { product, suppliers })
    }
}

fn normalize_sku(sku: &str) -> Result<String, ServiceError> {
    let sku = sku.trim();
    if sku.is_empty() {
        return Err(ServiceError::ValidationError(
            "sku must not be blank".to_string(),
        ));
    }
    Ok(sku.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn request(price: Decimal, currency: Option<&str>) -> CreateProductRequest {
        CreateProductRequest {
            sku: "WID-001".into(),
            name: "Widget".into(),
            description: None,
            category: None,
            price,
            cost_price: None,
            currency: currency.map(String::from),
            reorder_point: None,
        }
    }

    #[test]
    fn negative_prices_are_rejected() {
        assert!(request(dec!(0), None).validate().is_ok());
        assert!(request(dec!(9.99), Some("EUR")).validate().is_ok());
        assert!(request(dec!(-0.01), None).validate().is_err());
    }

    #[test]
    fn currency_must_be_iso_code() {
        assert!(request(dec!(1), Some("EURO")).validate().is_err());
        assert!(request(dec!(1), Some("E1R")).validate().is_err());
    }

    #[test]
    fn blank_sku_is_rejected() {
        assert!(normalize_sku("  ").is_err());
        assert_eq!(normalize_sku(" A-1 ").unwrap(), "A-1");
    }
}
