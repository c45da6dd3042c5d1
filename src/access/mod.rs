//! Access predicates.
//!
//! Each predicate maps the (possibly anonymous) caller to a decision:
//! deny, allow unrestricted, or allow through a query filter. Predicates are
//! pure and recomputed on every call.
//!
//! Role and permission checks only consider resolved references. A user
//! loaded without populated roles fails every permission check.

use crate::db::query::Where;
use crate::db::{User, ADMINISTRATOR_ROLE};
use crate::services::ServiceError;

/// Outcome of an access predicate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Access {
    Deny,
    Allow,
    Filter(Where),
}

impl Access {
    /// `Deny` becomes an error; `Allow` means no extra filter
    pub fn into_filter(self) -> Result<Option<Where>, ServiceError> {
        match self {
            Access::Deny => Err(ServiceError::forbidden("Access denied")),
            Access::Allow => Ok(None),
            Access::Filter(filter) => Ok(Some(filter)),
        }
    }

    /// Check a single record against the decision
    pub fn permits(&self, lookup: &dyn Fn(&str) -> Option<String>) -> bool {
        match self {
            Access::Deny => false,
            Access::Allow => true,
            Access::Filter(filter) => filter.matches(lookup),
        }
    }
}

pub fn is_authenticated(user: Option<&User>) -> bool {
    user.is_some()
}

pub fn is_admin(user: Option<&User>) -> bool {
    user.is_some_and(|u| {
        u.roles
            .iter()
            .filter_map(|r| r.resolved())
            .any(|role| role.name == ADMINISTRATOR_ROLE)
    })
}

pub fn has_permission(user: Option<&User>, action: &str, resource: &str) -> bool {
    let Some(u) = user else {
        return false;
    };
    if is_admin(user) {
        return true;
    }

    u.roles
        .iter()
        .filter_map(|r| r.resolved())
        .flat_map(|role| role.permissions.iter())
        .filter_map(|p| p.resolved())
        .any(|p| p.action == action && p.resource == resource)
}

/// `field ∈ assigned restaurants`
pub fn restaurant_scoped(user: Option<&User>, field: &str) -> Access {
    let Some(u) = user else {
        return Access::Deny;
    };
    if is_admin(user) {
        return Access::Allow;
    }
    if u.restaurants.is_empty() {
        return Access::Deny;
    }
    Access::Filter(Where::in_list(field, u.restaurants.clone()))
}

/// `(owner_field = me) OR (field ∈ assigned restaurants)`
pub fn restaurant_scoped_or_owned(user: Option<&User>, field: &str, owner_field: &str) -> Access {
    let Some(u) = user else {
        return Access::Deny;
    };
    if is_admin(user) {
        return Access::Allow;
    }

    let owned = Where::equals(owner_field, u.id.clone());
    if u.restaurants.is_empty() {
        return Access::Filter(owned);
    }
    Access::Filter(Where::Or(vec![
        owned,
        Where::in_list(field, u.restaurants.clone()),
    ]))
}

/// `field = me`
pub fn user_owned(user: Option<&User>, field: &str) -> Access {
    let Some(u) = user else {
        return Access::Deny;
    };
    if is_admin(user) {
        return Access::Allow;
    }
    Access::Filter(Where::equals(field, u.id.clone()))
}

/// Whether the caller may act on data of one restaurant
pub fn can_access_restaurant(user: Option<&User>, restaurant_id: &str) -> bool {
    restaurant_scoped(user, "restaurant_id").permits(&|field| {
        (field == "restaurant_id").then(|| restaurant_id.to_string())
    })
}

/// Require an authenticated caller holding `(action, resource)`
pub fn require_permission(
    user: Option<&User>,
    action: &str,
    resource: &str,
) -> Result<(), ServiceError> {
    if has_permission(user, action, resource) {
        return Ok(());
    }
    tracing::warn!(
        user_id = user.map(|u| u.id.as_str()),
        action = action,
        resource = resource,
        "Permission denied"
    );
    Err(ServiceError::forbidden(format!(
        "Missing permission {} on {}",
        action, resource
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Permission, PermissionRef, Role, RoleRef};

    fn role(name: &str, grants: &[(&str, &str)]) -> RoleRef {
        RoleRef::Resolved(Role {
            id: format!("role-{}", name),
            name: name.to_string(),
            description: None,
            permissions: grants
                .iter()
                .map(|(a, r)| {
                    PermissionRef::Resolved(Permission {
                        id: format!("{}:{}", a, r),
                        action: a.to_string(),
                        resource: r.to_string(),
                    })
                })
                .collect(),
        })
    }

    fn user(roles: Vec<RoleRef>, restaurants: &[&str]) -> User {
        User {
            id: "u1".to_string(),
            email: "u1@example.com".to_string(),
            name: "U1".to_string(),
            roles,
            restaurants: restaurants.iter().map(|s| s.to_string()).collect(),
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    #[test]
    fn test_anonymous_is_denied_everything() {
        assert!(!is_authenticated(None));
        assert!(!is_admin(None));
        assert!(!has_permission(None, "read", "orders"));
        assert_eq!(restaurant_scoped(None, "restaurant_id"), Access::Deny);
        assert_eq!(restaurant_scoped_or_owned(None, "restaurant_id", "user_id"), Access::Deny);
        assert_eq!(user_owned(None, "user_id"), Access::Deny);
    }

    #[test]
    fn test_administrator_bypasses_permissions() {
        let admin = user(vec![role(ADMINISTRATOR_ROLE, &[])], &[]);
        assert!(is_admin(Some(&admin)));
        for (action, resource) in [("delete", "users"), ("fly", "spaceships")] {
            assert!(has_permission(Some(&admin), action, resource));
        }
        assert_eq!(restaurant_scoped(Some(&admin), "restaurant_id"), Access::Allow);
        assert_eq!(user_owned(Some(&admin), "user_id"), Access::Allow);
    }

    #[test]
    fn test_permission_requires_exact_pair() {
        let staff = user(vec![role("Staff", &[("read", "orders")])], &["A"]);
        assert!(has_permission(Some(&staff), "read", "orders"));
        assert!(!has_permission(Some(&staff), "update", "orders"));
        assert!(!has_permission(Some(&staff), "read", "order"));
        assert!(require_permission(Some(&staff), "delete", "orders").is_err());
    }

    #[test]
    fn test_unresolved_references_fail_closed() {
        let shallow = user(vec![RoleRef::Unresolved("role-Administrator".to_string())], &[]);
        assert!(!is_admin(Some(&shallow)));
        assert!(!has_permission(Some(&shallow), "read", "orders"));

        let half = user(
            vec![RoleRef::Resolved(Role {
                id: "r".to_string(),
                name: "Staff".to_string(),
                description: None,
                permissions: vec![PermissionRef::Unresolved("read:orders".to_string())],
            })],
            &[],
        );
        assert!(!has_permission(Some(&half), "read", "orders"));
    }

    #[test]
    fn test_restaurant_scoped_filters_assigned() {
        let staff = user(vec![role("Staff", &[])], &["A", "B"]);
        assert_eq!(
            restaurant_scoped(Some(&staff), "restaurant_id"),
            Access::Filter(Where::in_list(
                "restaurant_id",
                vec!["A".to_string(), "B".to_string()]
            ))
        );
        assert!(can_access_restaurant(Some(&staff), "A"));
        assert!(!can_access_restaurant(Some(&staff), "C"));
    }

    #[test]
    fn test_no_assigned_restaurants_denies() {
        let staff = user(vec![role("Staff", &[])], &[]);
        assert_eq!(restaurant_scoped(Some(&staff), "restaurant_id"), Access::Deny);
        assert!(restaurant_scoped(Some(&staff), "restaurant_id").into_filter().is_err());
    }

    #[test]
    fn test_scoped_or_owned() {
        let customer = user(vec![role("Customer", &[])], &[]);
        let access = restaurant_scoped_or_owned(Some(&customer), "restaurant_id", "user_id");
        assert_eq!(access, Access::Filter(Where::equals("user_id", "u1")));

        let staff = user(vec![role("Staff", &[])], &["A"]);
        let access = restaurant_scoped_or_owned(Some(&staff), "restaurant_id", "user_id");
        let foreign_own_order = |f: &str| match f {
            "user_id" => Some("u1".to_string()),
            "restaurant_id" => Some("Z".to_string()),
            _ => None,
        };
        let foreign_other_order = |f: &str| match f {
            "user_id" => Some("u2".to_string()),
            "restaurant_id" => Some("Z".to_string()),
            _ => None,
        };
        assert!(access.permits(&foreign_own_order));
        assert!(!access.permits(&foreign_other_order));
    }
}
