use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::Set;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use utoipa::ToSchema;

/// Role assigned to a user inside their company
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum UserRole {
    #[sea_orm(string_value = "admin")]
    Admin,
    #[sea_orm(string_value = "manager")]
    Manager,
    #[sea_orm(string_value = "staff")]
    Staff,
    #[sea_orm(string_value = "viewer")]
    Viewer,
}

/// Database entity for user accounts
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize, ToSchema)]
#[sea_orm(table_name = "users")]
#[schema(as = User)]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub company_id: Uuid,
    pub name: String,
    #[sea_orm(unique)]
    pub email: String,
    /// Absent for accounts that only sign in with codes, links or OAuth
    #[sea_orm(column_type = "Text", nullable)]
    #[serde(skip_serializing, default)]
    #[schema(ignore)]
    pub password_hash: Option<String>,
    pub role: UserRole,
    #[sea_orm(column_type = "Text", nullable)]
    #[serde(skip_serializing, default)]
    #[schema(ignore)]
    pub pin_hash: Option<String>,
    pub pin_set_at: Option<DateTime<Utc>>,
    pub active: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    pub fn has_pin(&self) -> bool {
        self.pin_hash.is_some()
    }
}

/// Database relationships for User entity
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "crate::entities::company::Entity",
        from = "Column::CompanyId",
        to = "crate::entities::company::Column::Id"
    )]
    Company,
    #[sea_orm(has_many = "crate::auth::refresh_token::Entity")]
    RefreshTokens,
    #[sea_orm(has_many = "crate::auth::oauth_account::Entity")]
    OAuthAccounts,
}

impl Related<crate::entities::company::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Company.def()
    }
}

impl Related<crate::auth::refresh_token::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::RefreshTokens.def()
    }
}

impl Related<crate::auth::oauth_account::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OAuthAccounts.def()
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
    use std::str::FromStr;

    #[test]
    fn hashes_never_serialize() {
        let user = Model {
            id: Uuid::new_v4(),
            company_id: Uuid::new_v4(),
            name: "Ada".into(),
            email: "ada@example.com".into(),
            password_hash: Some("$argon2id$secret".into()),
            role: UserRole::Staff,
            pin_hash: Some("$argon2id$pin".into()),
            pin_set_at: None,
            active: true,
            last_login_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("password_hash").is_none());
        assert!(json.get("pin_hash").is_none());
        assert_eq!(json["role"], "staff");
    }

    #[test]
    fn roles_parse_from_snake_case() {
        assert_eq!(UserRole::from_str("manager").unwrap(), UserRole::Manager);
        assert!(UserRole::from_str("owner").is_err());
    }
}
