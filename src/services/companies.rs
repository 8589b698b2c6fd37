use crate::{
    auth::AuthUser,
    entities::company,
    errors::ServiceError,
    services::accounts::slugify,
};
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use validator::Validate;

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct UpdateCompanyRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: Option<String>,
    #[validate(length(min = 2, max = 64))]
    pub slug: Option<String>,
}

/// The caller's own tenant record.
#[derive(Clone)]
pub struct CompanyService {
    db: Arc<DatabaseConnection>,
}

impl CompanyService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn get_company(&self, user: &AuthUser) -> Result<company::Model, ServiceError> {
        company::Entity::find_by_id(user.company_id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| ServiceError::not_found("Company", user.company_id))
    }

    #[instrument(skip(self, input), fields(company_id = %user.company_id))]
    pub async fn update_company(
        &self,
        user: &AuthUser,
        input: UpdateCompanyRequest,
    ) -> Result<company::Model, ServiceError> {
        let existing = self.get_company(user).await?;
        let mut active: company::ActiveModel = existing.into();

        if let Some(name) = input.name {
            active.name = Set(name.trim().to_string());
        }
        if let Some(slug) = input.slug {
            let slug = slugify(&slug);
            if slug.is_empty() {
                return Err(ServiceError::ValidationError(
                    "slug must contain letters or digits".to_string(),
                ));
            }
            let taken = company::Entity::find()
                .filter(company::Column::Slug.eq(slug.as_str()))
                .filter(company::Column::Id.ne(user.company_id))
                .one(self.db.as_ref())
                .await?
                .is_some();
            if taken {
                return Err(ServiceError::Conflict(format!(
                    "company slug {} is already taken",
                    slug
                )));
            }
            active.slug = Set(slug);
        }

        let updated = active.update(self.db.as_ref()).await?;
        info!("Company updated");
        Ok(updated)
    }
}
