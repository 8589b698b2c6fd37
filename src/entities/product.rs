use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::Set;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Catalogue entry. `sku` is unique per company.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize, ToSchema)]
#[sea_orm(table_name = "products")]
#[schema(as = Product)]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub company_id: Uuid,
    pub sku: String,
    pub name: String,
    #[sea_orm(column_type = "Text", nullable)]
    pub description: Option<String>,
    pub category: Option<String>,
    /// Selling price
    pub price: Decimal,
    /// Purchase cost used for valuation; falls back to `price` when absent
    pub cost_price: Option<Decimal>,
    pub currency: String,
    /// Available quantity at or below which the product is reported as low stock
    pub reorder_point: i32,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    /// Unit value used by the valuation report.
    pub fn unit_value(&self) -> Decimal {
        self.cost_price.unwrap_or(self.price)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::company::Entity",
        from = "Column::CompanyId",
        to = "super::company::Column::Id"
    )]
    Company,
    #[sea_orm(has_many = "super::inventory_item::Entity")]
    InventoryItems,
    #[sea_orm(has_many = "super::product_supplier::Entity")]
    ProductSuppliers,
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItems,
}

impl Related<super::company::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Company.def()
    }
}

impl Related<super::inventory_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::InventoryItems.def()
    }
}

impl Related<super::product_supplier::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ProductSuppliers.def()
    }
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItems.def()
    }
}

impl Related<super::supplier::Entity> for Entity {
    fn to() -> RelationDef {
        super::product_supplier::Relation::Supplier.def()
    }

    fn via() -> Option<RelationDef> {
        Some(super::product_supplier::Relation::Product.def().rev())
    }
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C>(mut self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let now = Utc::now();
        if insert && self.created_at.is_not_set() {
            self.created_at = Set(now);
        }
        self.updated_at = Set(now);
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn product(cost_price: Option<Decimal>) -> Model {
        Model {
            id: Uuid::new_v4(),
            company_id: Uuid::new_v4(),
            sku: "SKU-1".into(),
            name: "Widget".into(),
            description: None,
            category: None,
            price: dec!(12.50),
            cost_price,
            currency: "USD".into(),
            reorder_point: 0,
            active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn unit_value_prefers_cost_price() {
        assert_eq!(product(Some(dec!(7.25))).unit_value(), dec!(7.25));
        assert_eq!(product(None).unit_value(), dec!(12.50));
    }
}
