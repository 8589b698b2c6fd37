use crate::{
    auth::{password::hash_secret, password::PasswordPolicy, revoke_refresh_tokens, user, AuthUser, UserRole},
    entities::{order, stock_movement},
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        accounts::{find_user_by_email, normalize_email},
        contains_ci, fetch_page, non_blank, Page, PageRequest,
    },
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
pub struct ListUsersQuery {
    pub role: Option<UserRole>,
    pub active: Option<bool>,
    /// Matches name or email
    pub search: Option<String>,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateUserRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(email)]
    pub email: String,
    pub role: UserRole,
    /// Users without a password sign in with codes, links or OAuth
    pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct UpdateUserRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: Option<String>,
    pub role: Option<UserRole>,
    pub active: Option<bool>,
}

#[derive(Clone)]
pub struct UserService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
    password_policy: PasswordPolicy,
}

impl UserService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self {
            db,
            event_sender,
            password_policy: PasswordPolicy::default(),
        }
    }

    pub async fn list_users(
        &self,
        caller: &AuthUser,
        query: ListUsersQuery,
        page: PageRequest,
    ) -> Result<Page<user::Model>, ServiceError> {
        let mut select = user::Entity::find()
            .filter(user::Column::CompanyId.eq(caller.company_id))
            .order_by_asc(user::Column::Name);

        if let Some(role) = query.role {
            select = select.filter(user::Column::Role.eq(role));
        }
        if let Some(active) = query.active {
            select = select.filter(user::Column::Active.eq(active));
        }
        if let Some(term) = non_blank(query.search) {
            select = select.filter(
                Condition::any()
                    .add(contains_ci(user::Column::Name, &term))
                    .add(contains_ci(user::Column::Email, &term)),
            );
        }

        fetch_page(self.db.as_ref(), select, page).await
    }

    pub async fn get_user(&self, caller: &AuthUser, id: Uuid) -> Result<user::Model, ServiceError> {
        user::Entity::find_by_id(id)
            .filter(user::Column::CompanyId.eq(caller.company_id))
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| ServiceError::not_found("User", id))
    }

    #[instrument(skip(self, input), fields(company_id = %caller.company_id))]
    pub async fn create_user(
        &self,
        caller: &AuthUser,
        input: CreateUserRequest,
    ) -> Result<user::Model, ServiceError> {
        let email = normalize_email(&input.email);
        if find_user_by_email(self.db.as_ref(), &email).await?.is_some() {
            return Err(ServiceError::Conflict(format!(
                "a user with email {} already exists",
                email
            )));
        }

        let password_hash = match non_blank(input.password) {
            Some(password) => {
                self.password_policy.validate(&password, Some(&email))?;
                Some(hash_secret(&password)?)
            }
            None => None,
        };

        let created = user::ActiveModel {
            id: Set(Uuid::new_v4()),
            company_id: Set(caller.company_id),
            name: Set(input.name.trim().to_string()),
            email: Set(email),
            password_hash: Set(password_hash),
            role: Set(input.role),
            pin_hash: Set(None),
            pin_set_at: Set(None),
            active: Set(true),
            last_login_at: Set(None),
            ..Default::default()
        }
        .insert(self.db.as_ref())
        .await?;

        info!(user_id = %created.id, role = %created.role, "User created");
        self.event_sender
            .send_or_log(Event::UserCreated {
                company_id: caller.company_id,
                user_id: created.id,
            })
            .await;
        Ok(created)
    }

    /// Updates name, role or active flag. Deactivation ends the user's sessions.
    #[instrument(skip(self, input), fields(company_id = %caller.company_id))]
    pub async fn update_user(
        &self,
        caller: &AuthUser,
        id: Uuid,
        input: UpdateUserRequest,
    ) -> Result<user::Model, ServiceError> {
        let existing = self.get_user(caller, id).await?;

        if id == caller.user_id {
            if input.active == Some(false) {
                return Err(ServiceError::BadRequest(
                    "you cannot deactivate your own account".to_string(),
                ));
            }
            if input.role.is_some_and(|role| role != existing.role) {
                return Err(ServiceError::BadRequest(
                    "you cannot change your own role".to_string(),
                ));
            }
        }

        let deactivating = existing.active && input.active == Some(false);
        let mut active: user::ActiveModel = existing.into();
        if let Some(name) = input.name {
            active.name = Set(name.trim().to_string());
        }
        if let Some(role) = input.role {
            active.role = Set(role);
        }
        if let Some(flag) = input.active {
            active.active = Set(flag);
        }
        let updated = active.update(self.db.as_ref()).await?;

        if deactivating {
            let revoked = revoke_refresh_tokens(self.db.as_ref(), updated.id).await?;
            info!(user_id = %updated.id, revoked, "User deactivated");
        }

        self.event_sender
            .send_or_log(Event::UserUpdated {
                company_id: caller.company_id,
                user_id: updated.id,
            })
            .await;
        Ok(updated)
    }

    /// Deletes a user that never touched stock or orders. Users with history
    /// should be deactivated instead.
    #[instrument(skip(self), fields(company_id = %caller.company_id))]
    pub async fn delete_user(&self, caller: &AuthUser, id: Uuid) -> Result<(), ServiceError> {
        if id == caller.user_id {
            return Err(ServiceError::BadRequest(
                "you cannot delete your own account".to_string(),
            ));
        }
        let existing = self.get_user(caller, id).await?;

        let movements = stock_movement::Entity::find()
            .filter(stock_movement::Column::ProcessedBy.eq(id))
            .count(self.db.as_ref())
            .await?;
        let orders = order::Entity::find()
            .filter(order::Column::CreatedBy.eq(id))
            .count(self.db.as_ref())
            .await?;
        if movements > 0 || orders > 0 {
            return Err(ServiceError::Conflict(
                "user has recorded stock movements or orders; deactivate instead".to_string(),
            ));
        }

        existing.delete(self.db.as_ref()).await?;
        info!(user_id = %id, "User deleted");
        self.event_sender
            .send_or_log(Event::UserDeleted {
                company_id: caller.company_id,
                user_id: id,
            })
            .await;
        Ok(())
    }
}
