//! Built-in roles, permissions and the bootstrap administrator.
//!
//! Runs on every startup; existing rows are left untouched so permission
//! edits made by operators survive restarts.

use anyhow::Result;
use sqlx::SqlitePool;

use super::models::{create_user, find_user_row_by_email, now_timestamp, ADMINISTRATOR_ROLE};

pub const ACTIONS: &[&str] = &["create", "read", "update", "delete"];

pub const RESOURCES: &[&str] = &[
    "orders",
    "restaurants",
    "menu-items",
    "carts",
    "analytics",
    "users",
];

/// Default role grants as (role, description, [(action, resource)])
fn role_grants() -> Vec<(&'static str, &'static str, Vec<(&'static str, &'static str)>)> {
    let all_but_users: Vec<(&str, &str)> = RESOURCES
        .iter()
        .filter(|r| **r != "users")
        .flat_map(|r| ACTIONS.iter().map(move |a| (*a, *r)))
        .collect();

    vec![
        (
            ADMINISTRATOR_ROLE,
            "Unrestricted access to every restaurant and resource",
            Vec::new(),
        ),
        ("Manager", "Manages assigned restaurants", all_but_users),
        (
            "Staff",
            "Works the orders of assigned restaurants",
            vec![
                ("read", "orders"),
                ("update", "orders"),
                ("read", "menu-items"),
                ("read", "restaurants"),
            ],
        ),
        ("Customer", "Storefront customer", Vec::new()),
    ]
}

pub async fn seed_roles_and_permissions(pool: &SqlitePool) -> Result<()> {
    for resource in RESOURCES {
        for action in ACTIONS {
            sqlx::query("INSERT OR IGNORE INTO permissions (id, action, resource) VALUES (?, ?, ?)")
                .bind(format!("{}:{}", action, resource))
                .bind(action)
                .bind(resource)
                .execute(pool)
                .await?;
        }
    }

    for (name, description, grants) in role_grants() {
        let existing: Option<(String,)> = sqlx::query_as("SELECT id FROM roles WHERE name = ?")
            .bind(name)
            .fetch_optional(pool)
            .await?;
        if existing.is_some() {
            continue;
        }

        let role_id = uuid::Uuid::new_v4().to_string();
        sqlx::query("INSERT INTO roles (id, name, description, created_at) VALUES (?, ?, ?, ?)")
            .bind(&role_id)
            .bind(name)
            .bind(description)
            .bind(now_timestamp())
            .execute(pool)
            .await?;

        for (action, resource) in grants {
            sqlx::query(
                "INSERT OR IGNORE INTO role_permissions (role_id, permission_id) SELECT ?, id FROM permissions WHERE action = ? AND resource = ?",
            )
            .bind(&role_id)
            .bind(action)
            .bind(resource)
            .execute(pool)
            .await?;
        }

        tracing::debug!(role = name, "Seeded role");
    }

    Ok(())
}

/// Create the configured administrator account if it does not exist yet
pub async fn ensure_admin_user(pool: &SqlitePool, email: &str, password_hash: &str) -> Result<bool> {
    if find_user_row_by_email(pool, email).await?.is_some() {
        return Ok(false);
    }

    create_user(pool, email, password_hash, "Administrator", &[ADMINISTRATOR_ROLE]).await?;
    tracing::info!(email = email, "Created bootstrap administrator");
    Ok(true)
}
