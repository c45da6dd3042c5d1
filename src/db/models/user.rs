//! User, role, permission and session models.
//!
//! Roles and permissions may be loaded shallow (ids only) or resolved into
//! full objects. Access checks only trust resolved entries, so callers that
//! need permission checks load users with [`ResolveDepth::Permissions`].

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

use super::common::one_or_many;

/// Role name that bypasses every permission and scoping check
pub const ADMINISTRATOR_ROLE: &str = "Administrator";

/// Stored user row, including the password hash
#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    pub id: String,
    pub email: String,
    pub password_hash: String,
    pub name: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Permission {
    pub id: String,
    pub action: String,
    pub resource: String,
}

/// A permission reference as it arrives on a role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PermissionRef {
    Unresolved(String),
    Resolved(Permission),
}

impl PermissionRef {
    pub fn resolved(&self) -> Option<&Permission> {
        match self {
            PermissionRef::Resolved(permission) => Some(permission),
            PermissionRef::Unresolved(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub permissions: Vec<PermissionRef>,
}

/// A role reference as it arrives on a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RoleRef {
    Unresolved(String),
    Resolved(Role),
}

impl RoleRef {
    pub fn id(&self) -> &str {
        match self {
            RoleRef::Unresolved(id) => id,
            RoleRef::Resolved(role) => &role.id,
        }
    }

    pub fn resolved(&self) -> Option<&Role> {
        match self {
            RoleRef::Resolved(role) => Some(role),
            RoleRef::Unresolved(_) => None,
        }
    }
}

/// An authenticated principal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    #[serde(default, deserialize_with = "one_or_many")]
    pub roles: Vec<RoleRef>,
    /// Assigned restaurant ids, in assignment order
    #[serde(default, deserialize_with = "one_or_many")]
    pub restaurants: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// How far role and permission relations are populated
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ResolveDepth {
    /// Role ids only
    Ids,
    /// Roles resolved, permission ids only
    Roles,
    /// Roles and their permissions resolved
    Permissions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: String,
    pub email: String,
    pub name: String,
    pub roles: Vec<String>,
    pub restaurants: Vec<String>,
}

impl From<&User> for UserResponse {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            email: user.email.clone(),
            name: user.name.clone(),
            roles: user
                .roles
                .iter()
                .map(|r| match r {
                    RoleRef::Resolved(role) => role.name.clone(),
                    RoleRef::Unresolved(id) => id.clone(),
                })
                .collect(),
            restaurants: user.restaurants.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub token_hash: String,
    pub expires_at: String,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: UserResponse,
}

#[derive(FromRow)]
struct RoleRow {
    id: String,
    name: String,
    description: Option<String>,
}

pub async fn find_user_row_by_email(
    pool: &SqlitePool,
    email: &str,
) -> Result<Option<UserRow>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM users WHERE email = ? COLLATE NOCASE")
        .bind(email)
        .fetch_optional(pool)
        .await
}

/// Load a user with roles populated to the requested depth
pub async fn load_user(
    pool: &SqlitePool,
    user_id: &str,
    depth: ResolveDepth,
) -> Result<Option<User>, sqlx::Error> {
    let row: Option<UserRow> = sqlx::query_as("SELECT * FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_optional(pool)
        .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let role_rows: Vec<RoleRow> = sqlx::query_as(
        r#"
        SELECT r.id, r.name, r.description FROM roles r
        INNER JOIN user_roles ur ON ur.role_id = r.id
        WHERE ur.user_id = ?
        ORDER BY ur.position ASC, r.name ASC
        "#,
    )
    .bind(&row.id)
    .fetch_all(pool)
    .await?;

    let mut roles = Vec::with_capacity(role_rows.len());
    for role in role_rows {
        let role_ref = match depth {
            ResolveDepth::Ids => RoleRef::Unresolved(role.id),
            ResolveDepth::Roles | ResolveDepth::Permissions => {
                let permissions = load_role_permissions(pool, &role.id, depth).await?;
                RoleRef::Resolved(Role {
                    id: role.id,
                    name: role.name,
                    description: role.description,
                    permissions,
                })
            }
        };
        roles.push(role_ref);
    }

    let restaurants: Vec<(String,)> = sqlx::query_as(
        "SELECT restaurant_id FROM user_restaurants WHERE user_id = ? ORDER BY position ASC, restaurant_id ASC",
    )
    .bind(&row.id)
    .fetch_all(pool)
    .await?;

    Ok(Some(User {
        id: row.id,
        email: row.email,
        name: row.name,
        roles,
        restaurants: restaurants.into_iter().map(|(id,)| id).collect(),
        created_at: row.created_at,
        updated_at: row.updated_at,
    }))
}

async fn load_role_permissions(
    pool: &SqlitePool,
    role_id: &str,
    depth: ResolveDepth,
) -> Result<Vec<PermissionRef>, sqlx::Error> {
    let permissions: Vec<Permission> = sqlx::query_as(
        r#"
        SELECT p.id, p.action, p.resource FROM permissions p
        INNER JOIN role_permissions rp ON rp.permission_id = p.id
        WHERE rp.role_id = ?
        ORDER BY p.resource ASC, p.action ASC
        "#,
    )
    .bind(role_id)
    .fetch_all(pool)
    .await?;

    Ok(permissions
        .into_iter()
        .map(|p| {
            if depth == ResolveDepth::Permissions {
                PermissionRef::Resolved(p)
            } else {
                PermissionRef::Unresolved(p.id)
            }
        })
        .collect())
}

/// Create a user with the given roles (by name). Unknown role names are ignored.
pub async fn create_user(
    pool: &SqlitePool,
    email: &str,
    password_hash: &str,
    name: &str,
    role_names: &[&str],
) -> Result<String, sqlx::Error> {
    let id = uuid::Uuid::new_v4().to_string();
    let now = super::common::now_timestamp();

    sqlx::query(
        "INSERT INTO users (id, email, password_hash, name, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(email)
    .bind(password_hash)
    .bind(name)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    for (position, role_name) in role_names.iter().enumerate() {
        sqlx::query(
            "INSERT OR IGNORE INTO user_roles (user_id, role_id, position) SELECT ?, id, ? FROM roles WHERE name = ?",
        )
        .bind(&id)
        .bind(position as i64)
        .bind(role_name)
        .execute(pool)
        .await?;
    }

    Ok(id)
}

/// Assign a restaurant to a user, appending it after existing assignments
pub async fn assign_restaurant(
    pool: &SqlitePool,
    user_id: &str,
    restaurant_id: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT OR IGNORE INTO user_restaurants (user_id, restaurant_id, position)
        SELECT ?, ?, COALESCE(MAX(position) + 1, 0) FROM user_restaurants WHERE user_id = ?
        "#,
    )
    .bind(user_id)
    .bind(restaurant_id)
    .bind(user_id)
    .execute(pool)
    .await?;
    Ok(())
}
