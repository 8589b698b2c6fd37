use crate::{
    auth::AuthUser,
    db::with_transaction,
    entities::{inventory_item, order_allocation, product, stock_movement, MovementType},
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        fetch_page, non_blank,
        stock_movements::{
            self as ledger, owned_product, owned_warehouse, record_movement, NewMovement,
        },
        Page, PageRequest,
    },
};
use chrono::{NaiveDate, Utc};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, JoinType,
    ModelTrait, QueryFilter, QueryOrder, QuerySelect, RelationTrait, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListInventoryQuery {
    pub warehouse_id: Option<Uuid>,
    pub product_id: Option<Uuid>,
    /// Only rows whose available quantity is at or below the product's reorder point
    pub low_stock: Option<bool>,
    /// Only lots expiring on or before this date
    pub expiring_before: Option<NaiveDate>,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateInventoryItemRequest {
    pub product_id: Uuid,
    pub warehouse_id: Uuid,
    #[validate(length(min = 1, max = 64))]
    pub lot_number: Option<String>,
    pub expiry_date: Option<NaiveDate>,
    /// Opening balance, recorded as an inbound movement when positive
    #[validate(range(min = 0))]
    pub quantity: Option<i32>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct UpdateInventoryItemRequest {
    #[validate(length(min = 1, max = 64))]
    pub lot_number: Option<String>,
    pub expiry_date: Option<NaiveDate>,
}

/// Either a signed `delta` or an absolute `set`, never both.
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct AdjustInventoryRequest {
    pub delta: Option<i32>,
    #[validate(range(min = 0))]
    pub set: Option<i32>,
    #[validate(length(min = 1, max = 2000))]
    pub reason: String,
    #[validate(length(max = 128))]
    pub reference: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct ReservationRequest {
    #[validate(range(min = 1))]
    pub quantity: i32,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct InventoryItemView {
    #[serde(flatten)]
    pub item: inventory_item::Model,
    pub available_quantity: i32,
}

impl From<inventory_item::Model> for InventoryItemView {
    fn from(item: inventory_item::Model) -> Self {
        Self {
            available_quantity: item.available(),
            item,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AdjustmentResult {
    pub item: InventoryItemView,
    pub movement: stock_movement::Model,
}

impl AdjustInventoryRequest {
    /// Resolves the requested change against the current count.
    pub fn target_quantity(&self, current: i32) -> Result<i32, ServiceError> {
        match (self.delta, self.set) {
            (Some(_), Some(_)) => Err(ServiceError::ValidationError(
                "provide either delta or set, not both".to_string(),
            )),
            (None, None) => Err(ServiceError::ValidationError(
                "provide a delta or a set quantity".to_string(),
            )),
            (Some(delta), None) => current.checked_add(delta).ok_or_else(|| {
                ServiceError::ValidationError("adjustment overflows the quantity".to_string())
            }),
            (None, Some(set)) => Ok(set),
        }
    }
}

#[derive(Clone)]
pub struct InventoryService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

impl InventoryService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    pub async fn list_inventory(
        &self,
        caller: &AuthUser,
        query: ListInventoryQuery,
        page: PageRequest,
    ) -> Result<Page<InventoryItemView>, ServiceError> {
        let mut select = inventory_item::Entity::find()
            .filter(inventory_item::Column::CompanyId.eq(caller.company_id))
            .order_by_asc(inventory_item::Column::WarehouseId)
            .order_by_asc(inventory_item::Column::ProductId)
            .order_by_asc(inventory_item::Column::LotNumber);

        if let Some(warehouse_id) = query.warehouse_id {
            select = select.filter(inventory_item::Column::WarehouseId.eq(warehouse_id));
        }
        if let Some(product_id) = query.product_id {
            select = select.filter(inventory_item::Column::ProductId.eq(product_id));
        }
        if let Some(date) = query.expiring_before {
            select = select.filter(inventory_item::Column::ExpiryDate.lte(date));
        }
        if query.low_stock == Some(true) {
            select = select
                .join(JoinType::InnerJoin, inventory_item::Relation::Product.def())
                .filter(
                    Expr::expr(
                        Expr::col((inventory_item::Entity, inventory_item::Column::Quantity))
                            .sub(Expr::col((
                                inventory_item::Entity,
                                inventory_item::Column::ReservedQuantity,
                            ))),
                    )
                    .lte(Expr::col((product::Entity, product::Column::ReorderPoint))),
                );
        }

        let page = fetch_page(self.db.as_ref(), select, page).await?;
        Ok(page.map(InventoryItemView::from))
    }

    async fn find_item(
        &self,
        caller: &AuthUser,
        id: Uuid,
    ) -> Result<inventory_item::Model, ServiceError> {
        inventory_item::Entity::find_by_id(id)
            .filter(inventory_item::Column::CompanyId.eq(caller.company_id))
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| ServiceError::not_found("Inventory item", id))
    }

    pub async fn get_item(
        &self,
        caller: &AuthUser,
        id: Uuid,
    ) -> Result<InventoryItemView, ServiceError> {
        Ok(self.find_item(caller, id).await?.into())
    }

    async fn ensure_slot_free(
        &self,
        company_id: Uuid,
        product_id: Uuid,
        warehouse_id: Uuid,
        lot_number: Option<&str>,
        except: Option<Uuid>,
    ) -> Result<(), ServiceError> {
        let existing = ledger::find_item(
            self.db.as_ref(),
            company_id,
            product_id,
            warehouse_id,
            lot_number,
        )
        .await?;
        match existing {
            Some(item) if Some(item.id) != except => Err(ServiceError::Conflict(format!(
                "inventory for this product, warehouse and lot already exists ({})",
                item.id
            ))),
            _ => Ok(()),
        }
    }

    /// Opens a stock row. A positive opening quantity is booked as an inbound movement.
    #[instrument(skip(self, input), fields(company_id = %caller.company_id))]
    pub async fn create_item(
        &self,
        caller: &AuthUser,
        input: CreateInventoryItemRequest,
    ) -> Result<InventoryItemView, ServiceError> {
        let company_id = caller.company_id;
        let db = self.db.as_ref();
        owned_product(db, company_id, input.product_id).await?;
        owned_warehouse(db, company_id, input.warehouse_id).await?;

        let lot = non_blank(input.lot_number);
        self.ensure_slot_free(
            company_id,
            input.product_id,
            input.warehouse_id,
            lot.as_deref(),
            None,
        )
        .await?;

        let opening = input.quantity.unwrap_or(0);
        let processed_by = caller.user_id;
        let (item, movement) = with_transaction(&self.db, move |txn| {
            Box::pin(async move {
                let item = inventory_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    company_id: Set(company_id),
                    product_id: Set(input.product_id),
                    warehouse_id: Set(input.warehouse_id),
                    lot_number: Set(lot.clone()),
                    expiry_date: Set(input.expiry_date),
                    quantity: Set(opening),
                    reserved_quantity: Set(0),
                    ..Default::default()
                }
                .insert(txn)
                .await?;

                let movement = if opening > 0 {
                    Some(
                        record_movement(
                            txn,
                            NewMovement {
                                company_id,
                                product_id: item.product_id,
                                movement_type: MovementType::Inbound,
                                from_warehouse_id: None,
                                to_warehouse_id: Some(item.warehouse_id),
                                lot_number: lot,
                                quantity: opening,
                                quantity_before: 0,
                                quantity_after: opening,
                                destination_quantity_before: None,
                                destination_quantity_after: None,
                                reference: None,
                                reason: Some("opening balance".to_string()),
                                processed_by,
                            },
                        )
                        .await?,
                    )
                } else {
                    None
                };
                Ok((item, movement))
            })
        })
        .await?;

        info!(item_id = %item.id, quantity = item.quantity, "Inventory item created");
        if let Some(movement) = &movement {
            self.event_sender.send_or_log(Event::from(movement)).await;
        }
        Ok(item.into())
    }

    #[instrument(skip(self, input), fields(company_id = %caller.company_id))]
    pub async fn update_item(
        &self,
        caller: &AuthUser,
        id: Uuid,
        input: UpdateInventoryItemRequest,
    ) -> Result<InventoryItemView, ServiceError> {
        let existing = self.find_item(caller, id).await?;

        let lot = non_blank(input.lot_number);
        if lot.is_some() && lot != existing.lot_number {
            self.ensure_slot_free(
                caller.company_id,
                existing.product_id,
                existing.warehouse_id,
                lot.as_deref(),
                Some(id),
            )
            .await?;
        }

        let mut active: inventory_item::ActiveModel = existing.into();
        if lot.is_some() {
            active.lot_number = Set(lot);
        }
        if input.expiry_date.is_some() {
            active.expiry_date = Set(input.expiry_date);
        }
        let updated = active.update(self.db.as_ref()).await?;
        info!(item_id = %id, "Inventory item updated");
        Ok(updated.into())
    }

    /// Removes an empty stock row.
    #[instrument(skip(self), fields(company_id = %caller.company_id))]
    pub async fn delete_item(&self, caller: &AuthUser, id: Uuid) -> Result<(), ServiceError> {
        let existing = self.find_item(caller, id).await?;
        if existing.quantity != 0 || existing.reserved_quantity != 0 {
            return Err(ServiceError::Conflict(format!(
                "inventory item {} still holds {} units ({} reserved)",
                id, existing.quantity, existing.reserved_quantity
            )));
        }
        existing.delete(self.db.as_ref()).await?;
        info!(item_id = %id, "Inventory item deleted");
        Ok(())
    }

    /// Corrects the physical count of a stock row and records an adjustment
    /// movement. The count may never drop below zero or below what is reserved.
    #[instrument(skip(self, input), fields(company_id = %caller.company_id))]
    pub async fn adjust(
        &self,
        caller: &AuthUser,
        id: Uuid,
        input: AdjustInventoryRequest,
    ) -> Result<AdjustmentResult, ServiceError> {
        // existence and tenancy check outside the transaction
        self.find_item(caller, id).await?;

        let company_id = caller.company_id;
        let processed_by = caller.user_id;
        let (item, movement) = with_transaction(&self.db, move |txn| {
            Box::pin(async move {
                let current = inventory_item::Entity::find_by_id(id)
                    .filter(inventory_item::Column::CompanyId.eq(company_id))
                    .one(txn)
                    .await?
                    .ok_or_else(|| ServiceError::not_found("Inventory item", id))?;

                let target = input.target_quantity(current.quantity)?;
                if target < 0 {
                    return Err(ServiceError::InsufficientStock(format!(
                        "adjustment would leave {} units",
                        target
                    )));
                }
                if target < current.reserved_quantity {
                    return Err(ServiceError::InsufficientStock(format!(
                        "{} units are reserved; the count cannot drop to {}",
                        current.reserved_quantity, target
                    )));
                }
                let delta = target - current.quantity;
                if delta == 0 {
                    return Err(ServiceError::BadRequest(
                        "adjustment does not change the quantity".to_string(),
                    ));
                }

                let result = inventory_item::Entity::update_many()
                    .col_expr(inventory_item::Column::Quantity, Expr::value(target))
                    .col_expr(inventory_item::Column::UpdatedAt, Expr::value(Utc::now()))
                    .filter(inventory_item::Column::Id.eq(id))
                    .filter(inventory_item::Column::Quantity.eq(current.quantity))
                    .filter(inventory_item::Column::ReservedQuantity.lte(target))
                    .exec(txn)
                    .await?;
                if result.rows_affected != 1 {
                    return Err(ServiceError::Conflict(
                        "inventory changed while adjusting; retry".to_string(),
                    ));
                }

                let (from, to) = if delta < 0 {
                    (Some(current.warehouse_id), None)
                } else {
                    (None, Some(current.warehouse_id))
                };
                let movement = record_movement(
                    txn,
                    NewMovement {
                        company_id,
                        product_id: current.product_id,
                        movement_type: MovementType::Adjustment,
                        from_warehouse_id: from,
                        to_warehouse_id: to,
                        lot_number: current.lot_number.clone(),
                        quantity: delta.abs(),
                        quantity_before: current.quantity,
                        quantity_after: target,
                        destination_quantity_before: None,
                        destination_quantity_after: None,
                        reference: non_blank(input.reference),
                        reason: Some(input.reason.trim().to_string()),
                        processed_by,
                    },
                )
                .await?;

                let item = inventory_item::Entity::find_by_id(id)
                    .one(txn)
                    .await?
                    .ok_or_else(|| ServiceError::not_found("Inventory item", id))?;
                Ok((item, movement))
            })
        })
        .await?;

        info!(
            item_id = %id,
            before = movement.quantity_before,
            after = movement.quantity_after,
            "Inventory adjusted"
        );
        self.event_sender.send_or_log(Event::from(&movement)).await;
        Ok(AdjustmentResult {
            item: item.into(),
            movement,
        })
    }

    #[instrument(skip(self, input), fields(company_id = %caller.company_id))]
    pub async fn reserve(
        &self,
        caller: &AuthUser,
        id: Uuid,
        input: ReservationRequest,
    ) -> Result<InventoryItemView, ServiceError> {
        positive(input.quantity)?;
        self.find_item(caller, id).await?;
        let item = ledger::reserve(self.db.as_ref(), id, input.quantity).await?;

        info!(item_id = %id, quantity = input.quantity, "Inventory reserved");
        self.event_sender
            .send_or_log(Event::InventoryReserved {
                company_id: caller.company_id,
                item_id: id,
                quantity: input.quantity,
            })
            .await;
        Ok(item.into())
    }

    #[instrument(skip(self, input), fields(company_id = %caller.company_id))]
    pub async fn release(
        &self,
        caller: &AuthUser,
        id: Uuid,
        input: ReservationRequest,
    ) -> Result<InventoryItemView, ServiceError> {
        positive(input.quantity)?;
        self.find_item(caller, id).await?;
        let quantity = input.quantity;
        let item = with_transaction(&self.db, move |txn| {
            Box::pin(async move {
                // Units held by confirmed orders are released by those orders.
                let held: i64 = order_allocation::Entity::find()
                    .filter(order_allocation::Column::InventoryItemId.eq(id))
                    .all(txn)
                    .await?
                    .iter()
                    .map(|allocation| i64::from(allocation.quantity))
                    .sum();
                ledger::release(txn, id, quantity, held).await
            })
        })
        .await?;

        info!(item_id = %id, quantity = input.quantity, "Reservation released");
        self.event_sender
            .send_or_log(Event::InventoryReleased {
                company_id: caller.company_id,
                item_id: id,
                quantity: input.quantity,
            })
            .await;
        Ok(item.into())
    }
}

fn positive(quantity: i32) -> Result<(), ServiceError> {
    if quantity <= 0 {
        return Err(ServiceError::ValidationError(
            "quantity must be greater than zero".to_string(),
        ));
    }
    Ok(())
}
