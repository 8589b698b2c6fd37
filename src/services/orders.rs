use crate::{
    auth::AuthUser,
    db::with_transaction,
    entities::{
        inventory_item, order, order_allocation, order_item, product, stock_movement,
        MovementType, OrderStatus,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        contains_ci, fetch_page, non_blank,
        stock_movements::{owned_warehouse, record_movement, release, reserve, withdraw, NewMovement},
        Page, PageRequest,
    },
};
use chrono::{DateTime, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait,
    DatabaseConnection, DatabaseTransaction, EntityTrait, ModelTrait, QueryFilter, QueryOrder,
    Set,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::{Validate, ValidationError};

fn validate_non_negative(value: &Decimal) -> Result<(), ValidationError> {
    if *value >= Decimal::ZERO {
        Ok(())
    } else {
        let mut err = ValidationError::new("range");
        err.message = Some("Unit price must not be negative".into());
        Err(err)
    }
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListOrdersQuery {
    pub status: Option<OrderStatus>,
    pub warehouse_id: Option<Uuid>,
    /// Matches order number or customer name
    pub search: Option<String>,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct OrderLineInput {
    pub product_id: Uuid,
    #[validate(range(min = 1))]
    pub quantity: i32,
    /// Defaults to the product's price
    #[validate(custom = "validate_non_negative")]
    #[schema(value_type = Option<String>)]
    pub unit_price: Option<Decimal>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateOrderRequest {
    #[validate(length(min = 1, max = 200))]
    pub customer_name: String,
    #[validate(email)]
    pub customer_email: Option<String>,
    pub warehouse_id: Uuid,
    #[validate(length(max = 4000))]
    pub notes: Option<String>,
    #[validate]
    pub items: Vec<OrderLineInput>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct UpdateOrderRequest {
    #[validate(length(min = 1, max = 200))]
    pub customer_name: Option<String>,
    #[validate(email)]
    pub customer_email: Option<String>,
    #[validate(length(max = 4000))]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OrderDetail {
    #[serde(flatten)]
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
}

/// Order number of the form `ORD-YYYYMMDD-NNNNNN`.
pub fn generate_order_number(at: DateTime<Utc>) -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("ORD-{}-{:06}", at.format("%Y%m%d"), suffix)
}

/// Sums quantities per product, preserving first-seen order. A product whose
/// lines add up past `i32::MAX` units is rejected.
fn quantities_by_product<I>(lines: I) -> Result<Vec<(Uuid, i32)>, ServiceError>
where
    I: IntoIterator<Item = (Uuid, i32)>,
{
    let mut totals: Vec<(Uuid, i32)> = Vec::new();
    for (product_id, quantity) in lines {
        let position = match totals.iter().position(|(id, _)| *id == product_id) {
            Some(position) => position,
            None => {
                totals.push((product_id, 0));
                totals.len() - 1
            }
        };
        let entry = &mut totals[position].1;
        *entry = entry.checked_add(quantity).ok_or_else(|| {
            ServiceError::ValidationError(format!(
                "order lines for product {} exceed the largest orderable quantity",
                product_id
            ))
        })?;
    }
    Ok(totals)
}

fn overflow(what: &str) -> ServiceError {
    ServiceError::ValidationError(format!("{} is too large", what))
}

/// Stock rows of a product in a warehouse, earliest expiry first and
/// undated lots last.
async fn stock_rows<C>(
    conn: &C,
    company_id: Uuid,
    warehouse_id: Uuid,
    product_id: Uuid,
) -> Result<Vec<inventory_item::Model>, ServiceError>
where
    C: ConnectionTrait,
{
    let mut rows = inventory_item::Entity::find()
        .filter(inventory_item::Column::CompanyId.eq(company_id))
        .filter(inventory_item::Column::WarehouseId.eq(warehouse_id))
        .filter(inventory_item::Column::ProductId.eq(product_id))
        .order_by_asc(inventory_item::Column::CreatedAt)
        .all(conn)
        .await?;
    rows.sort_by_key(|row| (row.expiry_date.is_none(), row.expiry_date));
    Ok(rows)
}

#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
    default_currency: String,
}

impl OrderService {
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

    pub async fn list_orders(
        &self,
        caller: &AuthUser,
        query: ListOrdersQuery,
        page: PageRequest,
    ) -> Result<Page<order::Model>, ServiceError> {
        let mut select = order::Entity::find()
            .filter(order::Column::CompanyId.eq(caller.company_id))
            .order_by_desc(order::Column::CreatedAt);

        if let Some(status) = query.status {
            select = select.filter(order::Column::Status.eq(status));
        }
        if let Some(warehouse_id) = query.warehouse_id {
            select = select.filter(order::Column::WarehouseId.eq(warehouse_id));
        }
        if let Some(term) = non_blank(query.search) {
            select = select.filter(
                Condition::any()
                    .add(contains_ci(order::Column::OrderNumber, &term))
                    .add(contains_ci(order::Column::CustomerName, &term)),
            );
        }

        fetch_page(self.db.as_ref(), select, page).await
    }

    async fn find_order(&self, caller: &AuthUser, id: Uuid) -> Result<order::Model, ServiceError> {
        order::Entity::find_by_id(id)
            .filter(order::Column::CompanyId.eq(caller.company_id))
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| ServiceError::not_found("Order", id))
    }

    pub async fn get_order(&self, caller: &AuthUser, id: Uuid) -> Result<OrderDetail, ServiceError> {
        let order = self.find_order(caller, id).await?;
        let items = order
            .find_related(order_item::Entity)
            .all(self.db.as_ref())
            .await?;
        Ok(OrderDetail { order, items })
    }

    async fn unused_order_number(&self, company_id: Uuid) -> Result<String, ServiceError> {
        for _ in 0..5 {
            let candidate = generate_order_number(Utc::now());
            let taken = order::Entity::find()
                .filter(order::Column::CompanyId.eq(company_id))
                .filter(order::Column::OrderNumber.eq(candidate.as_str()))
                .one(self.db.as_ref())
                .await?
                .is_some();
            if !taken {
                return Ok(candidate);
            }
            warn!(order_number = %candidate, "Order number collision, retrying");
        }
        Err(ServiceError::InternalError(
            "could not allocate an order number".to_string(),
        ))
    }

    /// Creates a pending order. Prices default to the catalogue price and the
    /// totals are computed here.
    #[instrument(skip(self, input), fields(company_id = %caller.company_id))]
    pub async fn create_order(
        &self,
        caller: &AuthUser,
        input: CreateOrderRequest,
    ) -> Result<OrderDetail, ServiceError> {
        if input.items.is_empty() {
            return Err(ServiceError::ValidationError(
                "an order needs at least one line".to_string(),
            ));
        }
        quantities_by_product(input.items.iter().map(|line| (line.product_id, line.quantity)))?;
        let company_id = caller.company_id;
        let db = self.db.as_ref();

        let warehouse = owned_warehouse(db, company_id, input.warehouse_id).await?;
        if !warehouse.active {
            return Err(ServiceError::InvalidOperation(format!(
                "warehouse {} is inactive",
                warehouse.code
            )));
        }

        let product_ids: Vec<Uuid> = input.items.iter().map(|line| line.product_id).collect();
        let products: HashMap<Uuid, product::Model> = product::Entity::find()
            .filter(product::Column::CompanyId.eq(company_id))
            .filter(product::Column::Id.is_in(product_ids))
            .all(db)
            .await?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();

        let order_id = Uuid::new_v4();
        let mut lines = Vec::with_capacity(input.items.len());
        let mut total = Decimal::ZERO;
        for line in &input.items {
            if line.quantity <= 0 {
                return Err(ServiceError::ValidationError(
                    "line quantities must be greater than zero".to_string(),
                ));
            }
            let product = products
                .get(&line.product_id)
                .ok_or_else(|| ServiceError::not_found("Product", line.product_id))?;
            if !product.active {
                return Err(ServiceError::InvalidOperation(format!(
                    "product {} is inactive",
                    product.sku
                )));
            }
            let unit_price = line.unit_price.unwrap_or(product.price);
            let line_total = unit_price
                .checked_mul(Decimal::from(line.quantity))
                .ok_or_else(|| overflow("line total"))?;
            total = total
                .checked_add(line_total)
                .ok_or_else(|| overflow("order total"))?;
            lines.push(order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(line.product_id),
                quantity: Set(line.quantity),
                unit_price: Set(unit_price),
                line_total: Set(line_total),
            });
        }

        let order_number = self.unused_order_number(company_id).await?;
        let header = order::ActiveModel {
            id: Set(order_id),
            company_id: Set(company_id),
            order_number: Set(order_number),
            customer_name: Set(input.customer_name.trim().to_string()),
            customer_email: Set(non_blank(input.customer_email)),
            warehouse_id: Set(warehouse.id),
            status: Set(OrderStatus::Pending),
            total_amount: Set(total),
            currency: Set(self.default_currency.clone()),
            notes: Set(non_blank(input.notes)),
            created_by: Set(caller.user_id),
            confirmed_at: Set(None),
            fulfilled_at: Set(None),
            cancelled_at: Set(None),
            ..Default::default()
        };

        let detail = with_transaction(&self.db, move |txn| {
            Box::pin(async move {
                let order = header.insert(txn).await?;
                let mut items = Vec::with_capacity(lines.len());
                for line in lines {
                    items.push(line.insert(txn).await?);
                }
                Ok(OrderDetail { order, items })
            })
        })
        .await?;

        info!(
            order_id = %detail.order.id,
            order_number = %detail.order.order_number,
            total = %detail.order.total_amount,
            "Order created"
        );
        self.event_sender
            .send_or_log(Event::OrderCreated {
                company_id,
                order_id: detail.order.id,
            })
            .await;
        Ok(detail)
    }

    #[instrument(skip(self, input), fields(company_id = %caller.company_id))]
    pub async fn update_order(
        &self,
        caller: &AuthUser,
        id: Uuid,
        input: UpdateOrderRequest,
    ) -> Result<order::Model, ServiceError> {
        let existing = self.find_order(caller, id).await?;
        if existing.status != OrderStatus::Pending {
            return Err(ServiceError::InvalidOperation(format!(
                "order {} is {} and can no longer be edited",
                existing.order_number, existing.status
            )));
        }

        let mut active: order::ActiveModel = existing.into();
        if let Some(name) = input.customer_name {
            active.customer_name = Set(name.trim().to_string());
        }
        if input.customer_email.is_some() {
            active.customer_email = Set(non_blank(input.customer_email));
        }
        if input.notes.is_some() {
            active.notes = Set(non_blank(input.notes));
        }
        let updated = active.update(self.db.as_ref()).await?;
        info!(order_id = %id, "Order updated");
        Ok(updated)
    }

    /// Deletes a pending or cancelled order with its lines.
    #[instrument(skip(self), fields(company_id = %caller.company_id))]
    pub async fn delete_order(&self, caller: &AuthUser, id: Uuid) -> Result<(), ServiceError> {
        let existing = self.find_order(caller, id).await?;
        if !matches!(existing.status, OrderStatus::Pending | OrderStatus::Cancelled) {
            return Err(ServiceError::InvalidOperation(format!(
                "order {} is {}; only pending or cancelled orders can be deleted",
                existing.order_number, existing.status
            )));
        }

        with_transaction(&self.db, move |txn| {
            Box::pin(async move {
                order_item::Entity::delete_many()
                    .filter(order_item::Column::OrderId.eq(existing.id))
                    .exec(txn)
                    .await?;
                existing.delete(txn).await?;
                Ok(())
            })
        })
        .await?;
        info!(order_id = %id, "Order deleted");
        Ok(())
    }

    /// pending → confirmed, reserving every line in the order's warehouse.
    pub async fn confirm_order(&self, caller: &AuthUser, id: Uuid) -> Result<OrderDetail, ServiceError> {
        self.transition(caller, id, OrderStatus::Confirmed).await
    }

    /// confirmed → fulfilled, shipping the reserved units.
    pub async fn fulfill_order(&self, caller: &AuthUser, id: Uuid) -> Result<OrderDetail, ServiceError> {
        self.transition(caller, id, OrderStatus::Fulfilled).await
    }

    /// pending or confirmed → cancelled, releasing any reservation.
    pub async fn cancel_order(&self, caller: &AuthUser, id: Uuid) -> Result<OrderDetail, ServiceError> {
        self.transition(caller, id, OrderStatus::Cancelled).await
    }

    #[instrument(skip(self), fields(company_id = %caller.company_id, to = %next))]
    async fn transition(
        &self,
        caller: &AuthUser,
        id: Uuid,
        next: OrderStatus,
    ) -> Result<OrderDetail, ServiceError> {
        let current = self.find_order(caller, id).await?;
        ensure_transition(&current, next)?;
        let previous = current.status;

        let processed_by = caller.user_id;
        let (detail, movements) = with_transaction(&self.db, move |txn| {
            Box::pin(async move {
                let from = current.status;
                let now = Utc::now();
                let mut update = order::Entity::update_many()
                    .col_expr(order::Column::Status, Expr::value(next))
                    .col_expr(order::Column::UpdatedAt, Expr::value(now))
                    .filter(order::Column::Id.eq(current.id))
                    .filter(order::Column::Status.eq(from));
                update = match next {
                    OrderStatus::Confirmed => {
                        update.col_expr(order::Column::ConfirmedAt, Expr::value(now))
                    }
                    OrderStatus::Fulfilled => {
                        update.col_expr(order::Column::FulfilledAt, Expr::value(now))
                    }
                    OrderStatus::Cancelled => {
                        update.col_expr(order::Column::CancelledAt, Expr::value(now))
                    }
                    OrderStatus::Pending => update,
                };
                if update.exec(txn).await?.rows_affected != 1 {
                    return Err(ServiceError::Conflict(format!(
                        "order {} changed status concurrently",
                        current.order_number
                    )));
                }

                let items = current.find_related(order_item::Entity).all(txn).await?;
                let movements = match (from, next) {
                    (OrderStatus::Pending, OrderStatus::Confirmed) => {
                        reserve_lines(txn, &current, &items).await?;
                        Vec::new()
                    }
                    (OrderStatus::Confirmed, OrderStatus::Fulfilled) => {
                        ship_lines(txn, &current, processed_by).await?
                    }
                    (OrderStatus::Confirmed, OrderStatus::Cancelled) => {
                        release_lines(txn, &current).await?;
                        Vec::new()
                    }
                    _ => Vec::new(),
                };

                let order = order::Entity::find_by_id(current.id)
                    .one(txn)
                    .await?
                    .ok_or_else(|| ServiceError::not_found("Order", current.id))?;
                Ok((OrderDetail { order, items }, movements))
            })
        })
        .await?;

        info!(
            order_id = %id,
            order_number = %detail.order.order_number,
            status = %detail.order.status,
            "Order status changed"
        );
        for movement in &movements {
            self.event_sender.send_or_log(Event::from(movement)).await;
        }
        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                company_id: caller.company_id,
                order_id: id,
                from: previous,
                to: next,
                at: detail.order.updated_at,
            })
            .await;
        Ok(detail)
    }
}

fn ensure_transition(order: &order::Model, next: OrderStatus) -> Result<(), ServiceError> {
    if order.status.can_transition_to(next) {
        Ok(())
    } else {
        Err(ServiceError::InvalidOperation(format!(
            "order {} cannot move from {} to {}",
            order.order_number, order.status, next
        )))
    }
}

/// Reserves every line against the order's warehouse, earliest expiry first,
/// and records which rows supplied the units.
async fn reserve_lines(
    txn: &DatabaseTransaction,
    order: &order::Model,
    items: &[order_item::Model],
) -> Result<(), ServiceError> {
    let wanted = quantities_by_product(items.iter().map(|item| (item.product_id, item.quantity)))?;
    for (product_id, quantity) in wanted {
        let mut remaining = quantity;
        for row in stock_rows(txn, order.company_id, order.warehouse_id, product_id).await? {
            let take = row.available().min(remaining);
            if take > 0 {
                reserve(txn, row.id, take).await?;
                order_allocation::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    order_id: Set(order.id),
                    inventory_item_id: Set(row.id),
                    product_id: Set(product_id),
                    quantity: Set(take),
                }
                .insert(txn)
                .await?;
                remaining -= take;
            }
            if remaining == 0 {
                break;
            }
        }
        if remaining > 0 {
            return Err(ServiceError::InsufficientStock(format!(
                "product {} is short by {} units in the order's warehouse",
                product_id, remaining
            )));
        }
    }
    Ok(())
}

/// Allocations made when the order was confirmed, removed from the table.
async fn take_allocations(
    txn: &DatabaseTransaction,
    order: &order::Model,
) -> Result<Vec<order_allocation::Model>, ServiceError> {
    let allocations = order_allocation::Entity::find()
        .filter(order_allocation::Column::OrderId.eq(order.id))
        .all(txn)
        .await?;
    order_allocation::Entity::delete_many()
        .filter(order_allocation::Column::OrderId.eq(order.id))
        .exec(txn)
        .await?;
    Ok(allocations)
}

async fn release_lines(txn: &DatabaseTransaction, order: &order::Model) -> Result<(), ServiceError> {
    for allocation in take_allocations(txn, order).await? {
        release(txn, allocation.inventory_item_id, allocation.quantity, 0).await?;
    }
    Ok(())
}

/// Ships exactly the units this order reserved, one outbound movement per
/// stock row.
async fn ship_lines(
    txn: &DatabaseTransaction,
    order: &order::Model,
    processed_by: Uuid,
) -> Result<Vec<stock_movement::Model>, ServiceError> {
    let mut movements = Vec::new();
    for allocation in take_allocations(txn, order).await? {
        let after = withdraw(txn, allocation.inventory_item_id, allocation.quantity, true).await?;
        movements.push(
            record_movement(
                txn,
                NewMovement {
                    company_id: order.company_id,
                    product_id: allocation.product_id,
                    movement_type: MovementType::Outbound,
                    from_warehouse_id: Some(order.warehouse_id),
                    to_warehouse_id: None,
                    lot_number: after.lot_number.clone(),
                    quantity: allocation.quantity,
                    quantity_before: after.quantity + allocation.quantity,
                    quantity_after: after.quantity,
                    destination_quantity_before: None,
                    destination_quantity_after: None,
                    reference: Some(order.order_number.clone()),
                    reason: Some("order fulfilment".to_string()),
                    processed_by,
                },
            )
            .await?,
        );
    }
    Ok(movements)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use regex::Regex;
    use rust_decimal_macros::dec;

    fn line(product_id: Uuid, quantity: i32, price: Decimal) -> order_item::Model {
        order_item::Model {
            id: Uuid::new_v4(),
            order_id: Uuid::new_v4(),
            product_id,
            quantity,
            unit_price: price,
            line_total: price * Decimal::from(quantity),
        }
    }

    #[test]
    fn order_numbers_carry_the_date() {
        let at = Utc.with_ymd_and_hms(2024, 3, 7, 12, 0, 0).unwrap();
        let number = generate_order_number(at);
        let pattern = Regex::new(r"^ORD-20240307-\d{6}$").unwrap();
        assert!(pattern.is_match(&number), "{}", number);
    }

    #[test]
    fn quantities_are_summed_per_product() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let items = vec![line(a, 2, dec!(1)), line(b, 1, dec!(1)), line(a, 3, dec!(1))];
        let totals =
            quantities_by_product(items.iter().map(|item| (item.product_id, item.quantity)))
                .unwrap();
        assert_eq!(totals, vec![(a, 5), (b, 1)]);
    }

    #[test]
    fn summed_quantities_that_overflow_are_rejected() {
        let a = Uuid::new_v4();
        let result = quantities_by_product([(a, 2_000_000_000), (a, 2_000_000_000)]);
        assert!(matches!(result, Err(ServiceError::ValidationError(_))));

        let at_limit = quantities_by_product([(a, i32::MAX - 1), (a, 1)]).unwrap();
        assert_eq!(at_limit, vec![(a, i32::MAX)]);
    }

    #[test]
    fn transitions_outside_the_lifecycle_are_rejected() {
        let now = Utc::now();
        let order = order::Model {
            id: Uuid::new_v4(),
            company_id: Uuid::new_v4(),
            order_number: "ORD-20240307-000001".into(),
            customer_name: "Acme".into(),
            customer_email: None,
            warehouse_id: Uuid::new_v4(),
            status: OrderStatus::Fulfilled,
            total_amount: dec!(10),
            currency: "USD".into(),
            notes: None,
            created_by: Uuid::new_v4(),
            confirmed_at: Some(now),
            fulfilled_at: Some(now),
            cancelled_at: None,
            created_at: now,
            updated_at: now,
        };
        assert!(matches!(
            ensure_transition(&order, OrderStatus::Cancelled),
            Err(ServiceError::InvalidOperation(_))
        ));
    }
}
