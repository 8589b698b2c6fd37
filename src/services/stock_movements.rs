//! The stock ledger. Every quantity change goes through the helpers in this
//! module so that the non-negative and `reserved <= quantity` rules are
//! enforced by conditional updates, and every change leaves a movement row.

use crate::{
    auth::AuthUser,
    db::with_transaction,
    entities::{inventory_item, product, stock_movement, warehouse, MovementType},
    errors::ServiceError,
    events::{Event, EventSender},
    services::{fetch_page, non_blank, Page, PageRequest},
};
use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait,
    DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateStockMovementRequest {
    /// `inbound`, `outbound` or `transfer`
    pub movement_type: MovementType,
    pub product_id: Uuid,
    pub from_warehouse_id: Option<Uuid>,
    pub to_warehouse_id: Option<Uuid>,
    #[validate(range(min = 1))]
    pub quantity: i32,
    /// Lot the units belong to; absent means the un-lotted stock row
    #[validate(length(min = 1, max = 64))]
    pub lot_number: Option<String>,
    /// Expiry of newly received lots
    pub expiry_date: Option<NaiveDate>,
    #[validate(length(max = 128))]
    pub reference: Option<String>,
    #[validate(length(max = 2000))]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListStockMovementsQuery {
    pub product_id: Option<Uuid>,
    /// Matches either side of the movement
    pub warehouse_id: Option<Uuid>,
    pub movement_type: Option<MovementType>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

/// Ledger row to be written next to a quantity change.
#[derive(Debug, Clone)]
pub(crate) struct NewMovement {
    pub company_id: Uuid,
    pub product_id: Uuid,
    pub movement_type: MovementType,
    pub from_warehouse_id: Option<Uuid>,
    pub to_warehouse_id: Option<Uuid>,
    pub lot_number: Option<String>,
    pub quantity: i32,
    pub quantity_before: i32,
    pub quantity_after: i32,
    pub destination_quantity_before: Option<i32>,
    pub destination_quantity_after: Option<i32>,
    pub reference: Option<String>,
    pub reason: Option<String>,
    pub processed_by: Uuid,
}

impl From<&stock_movement::Model> for Event {
    fn from(movement: &stock_movement::Model) -> Self {
        Event::StockMoved {
            company_id: movement.company_id,
            movement_id: movement.id,
            movement_type: movement.movement_type,
            product_id: movement.product_id,
            quantity: movement.quantity,
        }
    }
}

pub(crate) async fn record_movement<C>(
    conn: &C,
    movement: NewMovement,
) -> Result<stock_movement::Model, ServiceError>
where
    C: ConnectionTrait,
{
    let model = stock_movement::ActiveModel {
        id: Set(Uuid::new_v4()),
        company_id: Set(movement.company_id),
        product_id: Set(movement.product_id),
        movement_type: Set(movement.movement_type),
        from_warehouse_id: Set(movement.from_warehouse_id),
        to_warehouse_id: Set(movement.to_warehouse_id),
        lot_number: Set(movement.lot_number),
        quantity: Set(movement.quantity),
        quantity_before: Set(movement.quantity_before),
        quantity_after: Set(movement.quantity_after),
        destination_quantity_before: Set(movement.destination_quantity_before),
        destination_quantity_after: Set(movement.destination_quantity_after),
        reference: Set(movement.reference),
        reason: Set(movement.reason),
        processed_by: Set(movement.processed_by),
        created_at: Set(Utc::now()),
    }
    .insert(conn)
    .await?;
    Ok(model)
}

pub(crate) async fn owned_product<C>(
    conn: &C,
    company_id: Uuid,
    id: Uuid,
) -> Result<product::Model, ServiceError>
where
    C: ConnectionTrait,
{
    product::Entity::find_by_id(id)
        .filter(product::Column::CompanyId.eq(company_id))
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::not_found("Product", id))
}

pub(crate) async fn owned_warehouse<C>(
    conn: &C,
    company_id: Uuid,
    id: Uuid,
) -> Result<warehouse::Model, ServiceError>
where
    C: ConnectionTrait,
{
    warehouse::Entity::find_by_id(id)
        .filter(warehouse::Column::CompanyId.eq(company_id))
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::not_found("Warehouse", id))
}

/// Finds the stock row of a product and lot in a warehouse.
pub(crate) async fn find_item<C>(
    conn: &C,
    company_id: Uuid,
    product_id: Uuid,
    warehouse_id: Uuid,
    lot_number: Option<&str>,
) -> Result<Option<inventory_item::Model>, ServiceError>
where
    C: ConnectionTrait,
{
    let lot = match lot_number {
        Some(lot) => inventory_item::Column::LotNumber.eq(lot),
        None => inventory_item::Column::LotNumber.is_null(),
    };
    let item = inventory_item::Entity::find()
        .filter(inventory_item::Column::CompanyId.eq(company_id))
        .filter(inventory_item::Column::ProductId.eq(product_id))
        .filter(inventory_item::Column::WarehouseId.eq(warehouse_id))
        .filter(lot)
        .one(conn)
        .await?;
    Ok(item)
}

/// Returns the stock row, creating an empty one when the lot is new to the warehouse.
pub(crate) async fn find_or_create_item<C>(
    conn: &C,
    company_id: Uuid,
    product_id: Uuid,
    warehouse_id: Uuid,
    lot_number: Option<&str>,
    expiry_date: Option<NaiveDate>,
) -> Result<inventory_item::Model, ServiceError>
where
    C: ConnectionTrait,
{
    if let Some(item) = find_item(conn, company_id, product_id, warehouse_id, lot_number).await? {
        return Ok(item);
    }
    let item = inventory_item::ActiveModel {
        id: Set(Uuid::new_v4()),
        company_id: Set(company_id),
        product_id: Set(product_id),
        warehouse_id: Set(warehouse_id),
        lot_number: Set(lot_number.map(str::to_string)),
        expiry_date: Set(expiry_date),
        quantity: Set(0),
        reserved_quantity: Set(0),
        ..Default::default()
    }
    .insert(conn)
    .await?;
    Ok(item)
}

async fn reload_item<C>(conn: &C, id: Uuid) -> Result<inventory_item::Model, ServiceError>
where
    C: ConnectionTrait,
{
    inventory_item::Entity::find_by_id(id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::not_found("Inventory item", id))
}

fn insufficient(item_id: Uuid, requested: i32) -> ServiceError {
    ServiceError::InsufficientStock(format!(
        "inventory item {} cannot supply {} units",
        item_id, requested
    ))
}

/// Adds units to a stock row.
pub(crate) async fn deposit<C>(
    conn: &C,
    item_id: Uuid,
    quantity: i32,
) -> Result<inventory_item::Model, ServiceError>
where
    C: ConnectionTrait,
{
    inventory_item::Entity::update_many()
        .col_expr(
            inventory_item::Column::Quantity,
            Expr::col(inventory_item::Column::Quantity).add(quantity),
        )
        .col_expr(inventory_item::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(inventory_item::Column::Id.eq(item_id))
        .exec(conn)
        .await?;
    reload_item(conn, item_id).await
}

/// Removes units from a stock row. Unreserved units are taken unless
/// `from_reserved` is set, in which case a reservation is consumed as well.
pub(crate) async fn withdraw<C>(
    conn: &C,
    item_id: Uuid,
    quantity: i32,
    from_reserved: bool,
) -> Result<inventory_item::Model, ServiceError>
where
    C: ConnectionTrait,
{
    let mut update = inventory_item::Entity::update_many()
        .col_expr(
            inventory_item::Column::Quantity,
            Expr::col(inventory_item::Column::Quantity).sub(quantity),
        )
        .col_expr(inventory_item::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(inventory_item::Column::Id.eq(item_id));

    update = if from_reserved {
        update
            .col_expr(
                inventory_item::Column::ReservedQuantity,
                Expr::col(inventory_item::Column::ReservedQuantity).sub(quantity),
            )
            .filter(inventory_item::Column::ReservedQuantity.gte(quantity))
            .filter(inventory_item::Column::Quantity.gte(quantity))
    } else {
        update.filter(available_at_least(quantity))
    };

    let result = update.exec(conn).await?;
    if result.rows_affected != 1 {
        return Err(insufficient(item_id, quantity));
    }
    reload_item(conn, item_id).await
}

/// Moves units from available to reserved.
pub(crate) async fn reserve<C>(
    conn: &C,
    item_id: Uuid,
    quantity: i32,
) -> Result<inventory_item::Model, ServiceError>
where
    C: ConnectionTrait,
{
    let result = inventory_item::Entity::update_many()
        .col_expr(
            inventory_item::Column::ReservedQuantity,
            Expr::col(inventory_item::Column::ReservedQuantity).add(quantity),
        )
        .col_expr(inventory_item::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(inventory_item::Column::Id.eq(item_id))
        .filter(available_at_least(quantity))
        .exec(conn)
        .await?;
    if result.rows_affected != 1 {
        return Err(insufficient(item_id, quantity));
    }
    reload_item(conn, item_id).await
}

/// Returns reserved units to available. At least `keep` units stay reserved.
pub(crate) async fn release<C>(
    conn: &C,
    item_id: Uuid,
    quantity: i32,
    keep: i64,
) -> Result<inventory_item::Model, ServiceError>
where
    C: ConnectionTrait,
{
    let result = inventory_item::Entity::update_many()
        .col_expr(
            inventory_item::Column::ReservedQuantity,
            Expr::col(inventory_item::Column::ReservedQuantity).sub(quantity),
        )
        .col_expr(inventory_item::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(inventory_item::Column::Id.eq(item_id))
        .filter(inventory_item::Column::ReservedQuantity.gte(i64::from(quantity) + keep))
        .exec(conn)
        .await?;
    if result.rows_affected != 1 {
        return Err(ServiceError::InsufficientStock(format!(
            "inventory item {} has fewer than {} releasable reserved units",
            item_id, quantity
        )));
    }
    reload_item(conn, item_id).await
}

fn available_at_least(quantity: i32) -> sea_orm::sea_query::SimpleExpr {
    Expr::expr(
        Expr::col(inventory_item::Column::Quantity)
            .sub(Expr::col(inventory_item::Column::ReservedQuantity)),
    )
    .gte(quantity)
}

/// Checks the warehouse fields against the movement type.
fn required_warehouses(
    input: &CreateStockMovementRequest,
) -> Result<(Option<Uuid>, Option<Uuid>), ServiceError> {
    let missing = |field: &str| {
        ServiceError::ValidationError(format!(
            "{} movements require {}",
            input.movement_type, field
        ))
    };
    match input.movement_type {
        MovementType::Inbound => {
            let to = input.to_warehouse_id.ok_or_else(|| missing("to_warehouse_id"))?;
            Ok((None, Some(to)))
        }
        MovementType::Outbound => {
            let from = input
                .from_warehouse_id
                .ok_or_else(|| missing("from_warehouse_id"))?;
            Ok((Some(from), None))
        }
        MovementType::Transfer => {
            let from = input
                .from_warehouse_id
                .ok_or_else(|| missing("from_warehouse_id"))?;
            let to = input.to_warehouse_id.ok_or_else(|| missing("to_warehouse_id"))?;
            if from == to {
                return Err(ServiceError::ValidationError(
                    "transfer source and destination must differ".to_string(),
                ));
            }
            Ok((Some(from), Some(to)))
        }
        MovementType::Adjustment => Err(ServiceError::BadRequest(
            "adjustments are recorded through the inventory adjust endpoint".to_string(),
        )),
    }
}

#[derive(Clone)]
pub struct StockMovementService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

impl StockMovementService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Applies an inbound, outbound or transfer movement. Both sides of a
    /// transfer are written in one transaction; a failure leaves neither changed.
    #[instrument(
        skip(self, input),
        fields(
            company_id = %caller.company_id,
            movement_type = %input.movement_type,
            product_id = %input.product_id,
            quantity = input.quantity
        )
    )]
    pub async fn create_movement(
        &self,
        caller: &AuthUser,
        input: CreateStockMovementRequest,
    ) -> Result<stock_movement::Model, ServiceError> {
        if input.quantity <= 0 {
            return Err(ServiceError::ValidationError(
                "quantity must be greater than zero".to_string(),
            ));
        }
        let (from, to) = required_warehouses(&input)?;

        let company_id = caller.company_id;
        let db = self.db.as_ref();
        owned_product(db, company_id, input.product_id).await?;
        if let Some(from) = from {
            owned_warehouse(db, company_id, from).await?;
        }
        if let Some(to) = to {
            let destination = owned_warehouse(db, company_id, to).await?;
            if !destination.active {
                return Err(ServiceError::InvalidOperation(format!(
                    "warehouse {} is inactive and cannot receive stock",
                    destination.code
                )));
            }
        }

        let processed_by = caller.user_id;
        let movement = with_transaction(&self.db, move |txn| {
            Box::pin(async move {
                let lot = non_blank(input.lot_number);
                let quantity = input.quantity;
                let mut row = NewMovement {
                    company_id,
                    product_id: input.product_id,
                    movement_type: input.movement_type,
                    from_warehouse_id: from,
                    to_warehouse_id: to,
                    lot_number: lot.clone(),
                    quantity,
                    quantity_before: 0,
                    quantity_after: 0,
                    destination_quantity_before: None,
                    destination_quantity_after: None,
                    reference: non_blank(input.reference),
                    reason: non_blank(input.reason),
                    processed_by,
                };

                let mut source_expiry = None;
                if let Some(from) = from {
                    let source =
                        find_item(txn, company_id, input.product_id, from, lot.as_deref())
                            .await?
                            .ok_or_else(|| {
                                ServiceError::InsufficientStock(format!(
                                    "no stock of product {} in warehouse {}",
                                    input.product_id, from
                                ))
                            })?;
                    source_expiry = source.expiry_date;
                    let after = withdraw(txn, source.id, quantity, false).await?;
                    row.quantity_before = after.quantity + quantity;
                    row.quantity_after = after.quantity;
                }

                if let Some(to) = to {
                    let expiry = input.expiry_date.or(source_expiry);
                    let destination = find_or_create_item(
                        txn,
                        company_id,
                        input.product_id,
                        to,
                        lot.as_deref(),
                        expiry,
                    )
                    .await?;
                    let after = deposit(txn, destination.id, quantity).await?;
                    if from.is_some() {
                        row.destination_quantity_before = Some(after.quantity - quantity);
                        row.destination_quantity_after = Some(after.quantity);
                    } else {
                        row.quantity_before = after.quantity - quantity;
                        row.quantity_after = after.quantity;
                    }
                }

                record_movement(txn, row).await
            })
        })
        .await?;

        info!(movement_id = %movement.id, "Stock movement recorded");
        self.event_sender.send_or_log(Event::from(&movement)).await;
        Ok(movement)
    }

    pub async fn list_movements(
        &self,
        caller: &AuthUser,
        query: ListStockMovementsQuery,
        page: PageRequest,
    ) -> Result<Page<stock_movement::Model>, ServiceError> {
        let mut select = stock_movement::Entity::find()
            .filter(stock_movement::Column::CompanyId.eq(caller.company_id))
            .order_by_desc(stock_movement::Column::CreatedAt);

        if let Some(product_id) = query.product_id {
            select = select.filter(stock_movement::Column::ProductId.eq(product_id));
        }
        if let Some(warehouse_id) = query.warehouse_id {
            select = select.filter(
                Condition::any()
                    .add(stock_movement::Column::FromWarehouseId.eq(warehouse_id))
                    .add(stock_movement::Column::ToWarehouseId.eq(warehouse_id)),
            );
        }
        if let Some(movement_type) = query.movement_type {
            select = select.filter(stock_movement::Column::MovementType.eq(movement_type));
        }
        if let Some(from) = query.from {
            select = select.filter(stock_movement::Column::CreatedAt.gte(from));
        }
        if let Some(to) = query.to {
            select = select.filter(stock_movement::Column::CreatedAt.lt(to));
        }

        fetch_page(self.db.as_ref(), select, page).await
    }

    pub async fn get_movement(
        &self,
        caller: &AuthUser,
        id: Uuid,
    ) -> Result<stock_movement::Model, ServiceError> {
        stock_movement::Entity::find_by_id(id)
            .filter(stock_movement::Column::CompanyId.eq(caller.company_id))
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| ServiceError::not_found("Stock movement", id))
    }
}
