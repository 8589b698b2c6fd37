/*!
 * # Role-Based Access Control (RBAC) Module
 *
 * Static mapping from user roles to the permissions carried in access tokens.
 */

use super::permissions::{consts, permission_implies};
use super::user::UserRole;
use lazy_static::lazy_static;
use std::collections::{BTreeSet, HashMap};

/// Role definition with associated permissions
#[derive(Debug, Clone)]
pub struct Role {
    pub name: UserRole,
    pub description: &'static str,
    pub permissions: Vec<&'static str>,
}

lazy_static! {
    pub static ref ROLES: HashMap<UserRole, Role> = {
        let mut roles = HashMap::new();

        roles.insert(
            UserRole::Admin,
            Role {
                name: UserRole::Admin,
                description: "Full access to the company account",
                permissions: vec!["*"],
            },
        );

        roles.insert(
            UserRole::Manager,
            Role {
                name: UserRole::Manager,
                description: "Runs the catalogue, stock and orders",
                permissions: vec![
                    consts::COMPANY_READ,
                    consts::USERS_READ,
                    "suppliers:*",
                    "warehouses:*",
                    "products:*",
                    "inventory:*",
                    "orders:*",
                    consts::REPORTS_READ,
                ],
            },
        );

        roles.insert(
            UserRole::Staff,
            Role {
                name: UserRole::Staff,
                description: "Moves stock and handles orders",
                permissions: vec![
                    consts::COMPANY_READ,
                    consts::SUPPLIERS_READ,
                    consts::WAREHOUSES_READ,
                    consts::PRODUCTS_READ,
                    consts::INVENTORY_READ,
                    consts::INVENTORY_ADJUST,
                    consts::INVENTORY_TRANSFER,
                    consts::ORDERS_READ,
                    consts::ORDERS_CREATE,
                    consts::ORDERS_UPDATE,
                ],
            },
        );

        roles.insert(
            UserRole::Viewer,
            Role {
                name: UserRole::Viewer,
                description: "Read-only access and reports",
                permissions: vec![
                    consts::COMPANY_READ,
                    consts::SUPPLIERS_READ,
                    consts::WAREHOUSES_READ,
                    consts::PRODUCTS_READ,
                    consts::INVENTORY_READ,
                    consts::ORDERS_READ,
                    consts::REPORTS_READ,
                ],
            },
        );

        roles
    };
}

/// Permissions granted to a role, sorted for stable token contents.
pub fn permissions_for_role(role: UserRole) -> Vec<String> {
    ROLES
        .get(&role)
        .map(|r| {
            r.permissions
                .iter()
                .map(|p| p.to_string())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect()
        })
        .unwrap_or_default()
}

/// Whether any of `granted` covers `required`.
pub fn grants(granted: &[String], required: &str) -> bool {
    granted.iter().any(|p| permission_implies(p, required))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn every_role_is_defined() {
        for role in [
            UserRole::Admin,
            UserRole::Manager,
            UserRole::Staff,
            UserRole::Viewer,
        ] {
            assert!(!permissions_for_role(role).is_empty(), "{role} has no permissions");
        }
    }

    #[rstest]
    #[case(UserRole::Admin, consts::USERS_DELETE, true)]
    #[case(UserRole::Manager, consts::PRODUCTS_DELETE, true)]
    #[case(UserRole::Manager, consts::USERS_CREATE, false)]
    #[case(UserRole::Staff, consts::INVENTORY_TRANSFER, true)]
    #[case(UserRole::Staff, consts::PRODUCTS_CREATE, false)]
    #[case(UserRole::Staff, consts::ORDERS_CONFIRM, false)]
    #[case(UserRole::Viewer, consts::REPORTS_READ, true)]
    #[case(UserRole::Viewer, consts::INVENTORY_ADJUST, false)]
    fn role_grants(#[case] role: UserRole, #[case] permission: &str, #[case] expected: bool) {
        assert_eq!(grants(&permissions_for_role(role), permission), expected);
    }
}
