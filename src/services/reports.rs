//! Read-only aggregates over a company's stock, movements and orders.
//!
//! Reports load the tenant's rows and aggregate in memory, which keeps the
//! arithmetic identical on Postgres and SQLite.

use crate::{
    auth::AuthUser,
    entities::{inventory_item, order, product, stock_movement, warehouse, MovementType, OrderStatus},
    errors::ServiceError,
};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, Iterable, QueryFilter, QueryOrder};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::instrument;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

const DEFAULT_RANGE_DAYS: i64 = 30;
const MAX_EXPIRY_WINDOW_DAYS: i64 = 3650;

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ReportRangeQuery {
    /// Inclusive start, defaults to 30 days before `to`
    pub from: Option<DateTime<Utc>>,
    /// Exclusive end, defaults to now
    pub to: Option<DateTime<Utc>>,
}

impl ReportRangeQuery {
    pub fn resolve(&self, now: DateTime<Utc>) -> Result<(DateTime<Utc>, DateTime<Utc>), ServiceError> {
        let to = self.to.unwrap_or(now);
        let from = self.from.unwrap_or(to - Duration::days(DEFAULT_RANGE_DAYS));
        if from > to {
            return Err(ServiceError::ValidationError(
                "from must not be after to".to_string(),
            ));
        }
        Ok((from, to))
    }
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ExpiringQuery {
    /// Look-ahead window in days, defaults to 30
    pub days: Option<i64>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct WarehouseValuation {
    pub warehouse_id: Uuid,
    pub warehouse_code: String,
    pub warehouse_name: String,
    pub units: i64,
    #[schema(value_type = String)]
    pub value: Decimal,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ValuationReport {
    pub warehouses: Vec<WarehouseValuation>,
    pub total_units: i64,
    #[schema(value_type = String)]
    pub total_value: Decimal,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct LowStockEntry {
    pub product_id: Uuid,
    pub sku: String,
    pub name: String,
    pub on_hand: i64,
    pub available: i64,
    pub reorder_point: i32,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct MovementTypeSummary {
    pub movement_type: MovementType,
    pub count: u64,
    pub units: i64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct MovementReport {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub by_type: Vec<MovementTypeSummary>,
    pub total_movements: u64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OrderStatusSummary {
    pub status: OrderStatus,
    pub count: u64,
    #[schema(value_type = String)]
    pub value: Decimal,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OrderReport {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub by_status: Vec<OrderStatusSummary>,
    pub total_orders: u64,
    #[schema(value_type = String)]
    pub fulfilled_revenue: Decimal,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ExpiringLot {
    pub item_id: Uuid,
    pub product_id: Uuid,
    pub sku: String,
    pub warehouse_id: Uuid,
    pub lot_number: Option<String>,
    pub expiry_date: NaiveDate,
    pub quantity: i32,
    /// Negative when the lot has already expired
    pub days_left: i64,
}

#[derive(Clone)]
pub struct ReportService {
    db: Arc<DatabaseConnection>,
}

impl ReportService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    async fn stock_with_products(
        &self,
        company_id: Uuid,
    ) -> Result<Vec<(inventory_item::Model, product::Model)>, ServiceError> {
        let rows = inventory_item::Entity::find()
            .filter(inventory_item::Column::CompanyId.eq(company_id))
            .find_also_related(product::Entity)
            .all(self.db.as_ref())
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|(item, product)| product.map(|p| (item, p)))
            .collect())
    }

    /// Units and value on hand per warehouse, valued at cost price
    /// (falling back to the selling price).
    #[instrument(skip(self), fields(company_id = %caller.company_id))]
    pub async fn inventory_valuation(&self, caller: &AuthUser) -> Result<ValuationReport, ServiceError> {
        let warehouses = warehouse::Entity::find()
            .filter(warehouse::Column::CompanyId.eq(caller.company_id))
            .order_by_asc(warehouse::Column::Code)
            .all(self.db.as_ref())
            .await?;
        let stock = self.stock_with_products(caller.company_id).await?;
        Ok(build_valuation(&warehouses, &stock, Utc::now()))
    }

    /// Active products whose available units across all warehouses are at
    /// or below their reorder point.
    #[instrument(skip(self), fields(company_id = %caller.company_id))]
    pub async fn low_stock(&self, caller: &AuthUser) -> Result<Vec<LowStockEntry>, ServiceError> {
        let products = product::Entity::find()
            .filter(product::Column::CompanyId.eq(caller.company_id))
            .filter(product::Column::Active.eq(true))
            .order_by_asc(product::Column::Sku)
            .all(self.db.as_ref())
            .await?;
        let items = inventory_item::Entity::find()
            .filter(inventory_item::Column::CompanyId.eq(caller.company_id))
            .all(self.db.as_ref())
            .await?;
        Ok(build_low_stock(&products, &items))
    }

    #[instrument(skip(self, range), fields(company_id = %caller.company_id))]
    pub async fn stock_movements(
        &self,
        caller: &AuthUser,
        range: ReportRangeQuery,
    ) -> Result<MovementReport, ServiceError> {
        let (from, to) = range.resolve(Utc::now())?;
        let movements = stock_movement::Entity::find()
            .filter(stock_movement::Column::CompanyId.eq(caller.company_id))
            .filter(stock_movement::Column::CreatedAt.gte(from))
            .filter(stock_movement::Column::CreatedAt.lt(to))
            .all(self.db.as_ref())
            .await?;
        Ok(build_movement_report(&movements, from, to))
    }

    #[instrument(skip(self, range), fields(company_id = %caller.company_id))]
    pub async fn orders(
        &self,
        caller: &AuthUser,
        range: ReportRangeQuery,
    ) -> Result<OrderReport, ServiceError> {
        let (from, to) = range.resolve(Utc::now())?;
        let orders = order::Entity::find()
            .filter(order::Column::CompanyId.eq(caller.company_id))
            .filter(order::Column::CreatedAt.gte(from))
            .filter(order::Column::CreatedAt.lt(to))
            .all(self.db.as_ref())
            .await?;
        Ok(build_order_report(&orders, from, to))
    }

    /// Lots with stock that expire within `days` days, including lots already past expiry.
    #[instrument(skip(self, query), fields(company_id = %caller.company_id))]
    pub async fn expiring(
        &self,
        caller: &AuthUser,
        query: ExpiringQuery,
    ) -> Result<Vec<ExpiringLot>, ServiceError> {
        let days = query.days.unwrap_or(DEFAULT_RANGE_DAYS);
        if !(0..=MAX_EXPIRY_WINDOW_DAYS).contains(&days) {
            return Err(ServiceError::ValidationError(format!(
                "days must be between 0 and {}",
                MAX_EXPIRY_WINDOW_DAYS
            )));
        }
        let today = Utc::now().date_naive();
        let cutoff = today + Duration::days(days);

        let rows = inventory_item::Entity::find()
            .filter(inventory_item::Column::CompanyId.eq(caller.company_id))
            .filter(inventory_item::Column::Quantity.gt(0))
            .filter(inventory_item::Column::ExpiryDate.is_not_null())
            .filter(inventory_item::Column::ExpiryDate.lte(cutoff))
            .find_also_related(product::Entity)
            .all(self.db.as_ref())
            .await?;

        let mut lots: Vec<ExpiringLot> = rows
            .into_iter()
            .filter_map(|(item, product)| {
                let expiry_date = item.expiry_date?;
                Some(ExpiringLot {
                    item_id: item.id,
                    product_id: item.product_id,
                    sku: product.map(|p| p.sku).unwrap_or_default(),
                    warehouse_id: item.warehouse_id,
                    lot_number: item.lot_number,
                    expiry_date,
                    quantity: item.quantity,
                    days_left: (expiry_date - today).num_days(),
                })
            })
            .collect();
        lots.sort_by(|a, b| a.expiry_date.cmp(&b.expiry_date).then(a.sku.cmp(&b.sku)));
        Ok(lots)
    }
}

fn build_valuation(
    warehouses: &[warehouse::Model],
    stock: &[(inventory_item::Model, product::Model)],
    generated_at: DateTime<Utc>,
) -> ValuationReport {
    let mut per_warehouse: HashMap<Uuid, (i64, Decimal)> = HashMap::new();
    for (item, product) in stock {
        let entry = per_warehouse.entry(item.warehouse_id).or_default();
        entry.0 += i64::from(item.quantity);
        entry.1 += product.unit_value() * Decimal::from(item.quantity);
    }

    let rows: Vec<WarehouseValuation> = warehouses
        .iter()
        .map(|wh| {
            let (units, value) = per_warehouse.get(&wh.id).copied().unwrap_or_default();
            WarehouseValuation {
                warehouse_id: wh.id,
                warehouse_code: wh.code.clone(),
                warehouse_name: wh.name.clone(),
                units,
                value,
            }
        })
        .collect();

    ValuationReport {
        total_units: rows.iter().map(|r| r.units).sum(),
        total_value: rows.iter().map(|r| r.value).sum(),
        warehouses: rows,
        generated_at,
    }
}

fn build_low_stock(products: &[product::Model], items: &[inventory_item::Model]) -> Vec<LowStockEntry> {
    let mut totals: HashMap<Uuid, (i64, i64)> = HashMap::new();
    for item in items {
        let entry = totals.entry(item.product_id).or_default();
        entry.0 += i64::from(item.quantity);
        entry.1 += i64::from(item.available());
    }

    products
        .iter()
        .filter_map(|product| {
            let (on_hand, available) = totals.get(&product.id).copied().unwrap_or_default();
            (available <= i64::from(product.reorder_point)).then(|| LowStockEntry {
                product_id: product.id,
                sku: product.sku.clone(),
                name: product.name.clone(),
                on_hand,
                available,
                reorder_point: product.reorder_point,
            })
        })
        .collect()
}

fn build_movement_report(
    movements: &[stock_movement::Model],
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> MovementReport {
    let mut totals: HashMap<MovementType, (u64, i64)> = HashMap::new();
    for movement in movements {
        let entry = totals.entry(movement.movement_type).or_default();
        entry.0 += 1;
        entry.1 += i64::from(movement.quantity);
    }
    let by_type = MovementType::iter()
        .map(|movement_type| {
            let (count, units) = totals.get(&movement_type).copied().unwrap_or_default();
            MovementTypeSummary {
                movement_type,
                count,
                units,
            }
        })
        .collect();

    MovementReport {
        from,
        to,
        by_type,
        total_movements: movements.len() as u64,
    }
}

fn build_order_report(orders: &[order::Model], from: DateTime<Utc>, to: DateTime<Utc>) -> OrderReport {
    let mut totals: HashMap<OrderStatus, (u64, Decimal)> = HashMap::new();
    for order in orders {
        let entry = totals.entry(order.status).or_default();
        entry.0 += 1;
        entry.1 += order.total_amount;
    }
    let by_status: Vec<OrderStatusSummary> = OrderStatus::iter()
        .map(|status| {
            let (count, value) = totals.get(&status).copied().unwrap_or_default();
            OrderStatusSummary {
                status,
                count,
                value,
            }
        })
        .collect();
    let fulfilled_revenue = by_status
        .iter()
        .find(|s| s.status == OrderStatus::Fulfilled)
        .map(|s| s.value)
        .unwrap_or_default();

    OrderReport {
        from,
        to,
        by_status,
        total_orders: orders.len() as u64,
        fulfilled_revenue,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn product(price: Decimal, cost: Option<Decimal>, reorder_point: i32) -> product::Model {
        let now = Utc::now();
        product::Model {
            id: Uuid::new_v4(),
            company_id: Uuid::new_v4(),
            sku: "SKU".into(),
            name: "Thing".into(),
            description: None,
            category: None,
            price,
            cost_price: cost,
            currency: "USD".into(),
            reorder_point,
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn warehouse(code: &str) -> warehouse::Model {
        let now = Utc::now();
        warehouse::Model {
            id: Uuid::new_v4(),
            company_id: Uuid::new_v4(),
            name: format!("Warehouse {}", code),
            code: code.into(),
            address: None,
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn item(product: &product::Model, warehouse_id: Uuid, quantity: i32, reserved: i32) -> inventory_item::Model {
        let now = Utc::now();
        inventory_item::Model {
            id: Uuid::new_v4(),
            company_id: product.company_id,
            product_id: product.id,
            warehouse_id,
            lot_number: None,
            expiry_date: None,
            quantity,
            reserved_quantity: reserved,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn valuation_uses_cost_then_price() {
        let a = warehouse("A");
        let b = warehouse("B");
        let costed = product(dec!(10), Some(dec!(4)), 0);
        let priced = product(dec!(2.5), None, 0);
        let stock = vec![
            (item(&costed, a.id, 3, 0), costed.clone()),
            (item(&priced, a.id, 2, 0), priced.clone()),
        ];

        let report = build_valuation(&[a.clone(), b.clone()], &stock, Utc::now());
        assert_eq!(report.warehouses.len(), 2);
        assert_eq!(report.warehouses[0].units, 5);
        assert_eq!(report.warehouses[0].value, dec!(17));
        assert_eq!(report.warehouses[1].units, 0);
        assert_eq!(report.total_value, dec!(17));
    }

    #[test]
    fn low_stock_compares_available_units() {
        let wh = Uuid::new_v4();
        let reserved_out = product(dec!(1), None, 5);
        let healthy = product(dec!(1), None, 5);
        let items = vec![item(&reserved_out, wh, 10, 6), item(&healthy, wh, 10, 0)];

        let low = build_low_stock(&[reserved_out.clone(), healthy], &items);
        assert_eq!(low.len(), 1);
        assert_eq!(low[0].product_id, reserved_out.id);
        assert_eq!(low[0].available, 4);
        assert_eq!(low[0].on_hand, 10);
    }

    #[test]
    fn range_defaults_and_ordering() {
        let now = Utc::now();
        let (from, to) = ReportRangeQuery::default().resolve(now).unwrap();
        assert_eq!(to, now);
        assert_eq!(to - from, Duration::days(DEFAULT_RANGE_DAYS));

        let inverted = ReportRangeQuery {
            from: Some(now),
            to: Some(now - Duration::days(1)),
        };
        assert!(inverted.resolve(now).is_err());
    }
}
